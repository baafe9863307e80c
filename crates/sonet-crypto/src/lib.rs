//! sonet-crypto — Sonet end-to-end encryption core, primitives engine.
//!
//! Single authoritative surface for cryptographic operations (spec §4.A).
//! Every other component in the workspace uses this crate; this crate
//! uses no other component.
//!
//! # Module layout
//! - `key`       — `CryptoKey`, the opaque key type shared workspace-wide
//! - `aead`      — AEAD encrypt/decrypt (AES-256-GCM, ChaCha20-Poly1305,
//!                 XChaCha20-Poly1305, legacy AES-256-CBC decrypt)
//! - `hash`      — SHA-256/SHA-512/BLAKE2b, plus BLAKE3 utilities
//! - `kdf`       — HKDF-SHA256
//! - `dh`        — X25519 (and P-256/Ed25519 keypair generation)
//! - `signature` — Ed25519 sign/verify
//! - `random`    — CSPRNG surface
//! - `cache`     — bounded key cache, including the legacy simple-session
//!                 key type
//! - `error`     — unified error type

pub mod aead;
pub mod cache;
pub mod dh;
pub mod error;
pub mod hash;
pub mod kdf;
pub mod key;
pub mod random;
pub mod signature;

use chrono::Duration;
use parking_lot::Mutex;
use tracing::trace;

pub use error::CryptoError;
pub use key::{Algorithm, CryptoKey};

use aead::{AeadAlgorithm, TAG_LEN};
use cache::{KeyCache, SimpleSessionKey};
use dh::KeypairProtocol;
use hash::HashAlgorithm;

/// The primitives engine. Owns the bounded key cache (spec §5's "key-cache
/// lock", the innermost lock in the hierarchy). Cheap to construct;
/// callers typically keep one `Engine` per process.
pub struct Engine {
    cache: Mutex<KeyCache<CryptoKey>>,
    simple_sessions: Mutex<KeyCache<SimpleSessionKey>>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    pub fn new() -> Self {
        Self {
            cache: Mutex::new(KeyCache::default()),
            simple_sessions: Mutex::new(KeyCache::default()),
        }
    }

    pub fn with_cache_capacity(capacity: usize) -> Self {
        Self {
            cache: Mutex::new(KeyCache::new(capacity)),
            simple_sessions: Mutex::new(KeyCache::new(capacity)),
        }
    }

    /// Generate a fresh symmetric key and place it in the bounded cache.
    pub fn generate_symmetric_key(
        &self,
        algorithm: Algorithm,
        owner_user: impl Into<String>,
        owner_device: impl Into<String>,
        ttl: Duration,
    ) -> Result<CryptoKey, CryptoError> {
        if !matches!(algorithm, Algorithm::Aes256Gcm | Algorithm::ChaCha20Poly1305) {
            return Err(CryptoError::UnsupportedAlgorithm(algorithm.to_string()));
        }
        let material = random::random_bytes(32)?;
        let key = CryptoKey::new(algorithm, material, owner_user, owner_device, ttl, false);
        self.cache_insert(key.id.clone(), key.clone());
        Ok(key)
    }

    /// Generate a DH or signing keypair as a `(private, public)` pair of
    /// `CryptoKey`s.
    pub fn generate_keypair(
        &self,
        protocol: KeypairProtocol,
        owner_user: impl Into<String>,
        owner_device: impl Into<String>,
        ttl: Duration,
        is_ephemeral: bool,
    ) -> Result<(CryptoKey, CryptoKey), CryptoError> {
        let raw = dh::generate_keypair(protocol)?;
        let owner_user = owner_user.into();
        let owner_device = owner_device.into();
        let priv_key = CryptoKey::new(
            raw.algorithm,
            raw.private,
            owner_user.clone(),
            owner_device.clone(),
            ttl,
            is_ephemeral,
        );
        let pub_key = CryptoKey::new(
            raw.algorithm,
            raw.public,
            owner_user,
            owner_device,
            ttl,
            is_ephemeral,
        );
        Ok((priv_key, pub_key))
    }

    /// X25519 scalar multiplication. Fails unless both keys are tagged
    /// X25519 and the result is not the all-zero point.
    pub fn dh(&self, priv_key: &CryptoKey, pub_key: &CryptoKey) -> Result<[u8; 32], CryptoError> {
        if priv_key.algorithm != Algorithm::X25519 || pub_key.algorithm != Algorithm::X25519 {
            return Err(CryptoError::UnsupportedAlgorithm(
                "dh() requires both keys to be X25519".into(),
            ));
        }
        self.check_not_expired(priv_key)?;
        let priv_bytes: [u8; 32] = priv_key
            .material()
            .try_into()
            .map_err(|_| CryptoError::InvalidKeyLength { expected: 32, got: priv_key.material().len() })?;
        let pub_bytes: [u8; 32] = pub_key
            .material()
            .try_into()
            .map_err(|_| CryptoError::InvalidKeyLength { expected: 32, got: pub_key.material().len() })?;
        dh::dh(&priv_bytes, &pub_bytes)
    }

    pub fn hkdf(&self, ikm: &[u8], salt: &[u8], info: &[u8], length: usize) -> Result<Vec<u8>, CryptoError> {
        let mut out = vec![0u8; length];
        kdf::hkdf(ikm, salt, info, &mut out)?;
        Ok(out)
    }

    pub fn aead_encrypt(
        &self,
        alg: AeadAlgorithm,
        key: &CryptoKey,
        nonce: &[u8],
        aad: &[u8],
        plaintext: &[u8],
    ) -> Result<(Vec<u8>, [u8; TAG_LEN]), CryptoError> {
        self.check_not_expired(key)?;
        aead::aead_encrypt(alg, key.material(), nonce, aad, plaintext)
    }

    pub fn aead_decrypt(
        &self,
        alg: AeadAlgorithm,
        key: &CryptoKey,
        nonce: &[u8],
        aad: &[u8],
        ciphertext: &[u8],
        tag: &[u8; TAG_LEN],
    ) -> Result<Vec<u8>, CryptoError> {
        self.check_not_expired(key)?;
        aead::aead_decrypt(alg, key.material(), nonce, aad, ciphertext, tag)
    }

    pub fn hash(&self, alg: HashAlgorithm, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        hash::hash(alg, data)
    }

    pub fn sign(&self, priv_key: &CryptoKey, message: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if priv_key.algorithm != Algorithm::Ed25519 {
            return Err(CryptoError::UnsupportedAlgorithm(
                "sign() requires an Ed25519 key".into(),
            ));
        }
        let priv_bytes: [u8; 32] = priv_key
            .material()
            .try_into()
            .map_err(|_| CryptoError::InvalidKeyLength { expected: 32, got: priv_key.material().len() })?;
        Ok(signature::sign(&priv_bytes, message))
    }

    pub fn verify(&self, pub_key: &CryptoKey, message: &[u8], sig: &[u8]) -> Result<bool, CryptoError> {
        let pub_bytes: [u8; 32] = pub_key
            .material()
            .try_into()
            .map_err(|_| CryptoError::InvalidKeyLength { expected: 32, got: pub_key.material().len() })?;
        signature::verify(&pub_bytes, message, sig)
    }

    pub fn random_bytes(&self, n: usize) -> Result<Vec<u8>, CryptoError> {
        random::random_bytes(n)
    }

    pub fn random_hex(&self, n: usize) -> Result<String, CryptoError> {
        random::random_hex(n)
    }

    pub fn random_u64(&self) -> Result<u64, CryptoError> {
        random::random_u64()
    }

    pub fn fingerprint(&self, key: &CryptoKey) -> String {
        key.fingerprint()
    }

    fn check_not_expired(&self, key: &CryptoKey) -> Result<(), CryptoError> {
        if key.is_expired() {
            return Err(CryptoError::ExpiredKey(key.expires_at));
        }
        Ok(())
    }

    /// Insert a key into the bounded cache, evicting (and zeroizing, by
    /// drop) the least-recently-inserted entry on overflow.
    fn cache_insert(&self, id: String, key: CryptoKey) {
        let mut cache = self.cache.lock();
        if let Some(evicted) = cache.insert(id, key) {
            trace!(evicted_key_id = %evicted.id, "cache_evict");
        }
    }

    pub fn cache_len(&self) -> usize {
        self.cache.lock().len()
    }

    /// Internal use only: stash a bare `(chat_id, user_id)` session key
    /// in the cache. See `cache::SimpleSessionKey` for why this exists
    /// and why it is not part of the public session-establishment API.
    pub fn cache_put_simple_session(&self, chat_id: &str, user_id: &str, material: [u8; 32]) {
        let id = format!("{chat_id}:{user_id}");
        self.simple_sessions.lock().insert(id, SimpleSessionKey::new(material));
    }

    pub fn cache_get_simple_session(&self, chat_id: &str, user_id: &str) -> Option<[u8; 32]> {
        let id = format!("{chat_id}:{user_id}");
        self.simple_sessions.lock().get(&id).map(|k| *k.material)
    }
}
