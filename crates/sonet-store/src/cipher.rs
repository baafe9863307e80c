//! `BlobCipher` — at-rest encryption for opaque state blobs (spec §4.F:
//! "serialized blobs MUST be encrypted at rest by the store").
//!
//! Grounded on `dl_store::db::Store::{encrypt_value, decrypt_value}`'s
//! vault-key-wraps-a-column pattern, re-expressed over `sonet-crypto`'s
//! AEAD surface instead of a free `dl_crypto::aead` function pair, and
//! storing ciphertext as hex rather than base64 to match this workspace's
//! existing `CryptoKey`/`KeyBundle` text encoding convention.

use sonet_crypto::aead::{self, AeadAlgorithm, TAG_LEN};
use sonet_crypto::{CryptoKey, CryptoError};

const AEAD_ALG: AeadAlgorithm = AeadAlgorithm::Aes256Gcm;
/// Prefixed to every plaintext blob before encryption so a future format
/// change can be detected on load instead of silently misparsed.
const BLOB_VERSION: [u8; 2] = [1, 0];

pub struct BlobCipher {
    key: CryptoKey,
}

impl BlobCipher {
    pub fn new(key: CryptoKey) -> Self {
        Self { key }
    }

    /// Encrypt `plaintext` (already-serialized session or epoch state),
    /// returning a single hex string: `nonce || ciphertext || tag`.
    pub fn seal(&self, plaintext: &[u8], aad: &[u8]) -> Result<String, CryptoError> {
        let mut versioned = Vec::with_capacity(2 + plaintext.len());
        versioned.extend_from_slice(&BLOB_VERSION);
        versioned.extend_from_slice(plaintext);

        let nonce = aead::fresh_nonce(AEAD_ALG)?;
        let (ct, tag) = aead::aead_encrypt(AEAD_ALG, self.key.material(), &nonce, aad, &versioned)?;

        let mut out = Vec::with_capacity(nonce.len() + ct.len() + TAG_LEN);
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ct);
        out.extend_from_slice(&tag);
        Ok(hex::encode(out))
    }

    /// Decrypt and strip the version prefix, returning the original
    /// plaintext blob. Rejects an unrecognized version rather than
    /// attempting to parse it.
    pub fn open(&self, sealed_hex: &str, aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let raw = hex::decode(sealed_hex)?;
        let nonce_len = AEAD_ALG.nonce_len();
        if raw.len() < nonce_len + TAG_LEN {
            return Err(CryptoError::AuthenticationFailed);
        }
        let (nonce, rest) = raw.split_at(nonce_len);
        let (ct, tag_bytes) = rest.split_at(rest.len() - TAG_LEN);
        let mut tag = [0u8; TAG_LEN];
        tag.copy_from_slice(tag_bytes);

        let versioned = aead::aead_decrypt(AEAD_ALG, self.key.material(), nonce, aad, ct, &tag)?;
        if versioned.len() < 2 {
            return Err(CryptoError::AuthenticationFailed);
        }
        let (version, plaintext) = versioned.split_at(2);
        if version != BLOB_VERSION {
            return Err(CryptoError::UnsupportedAlgorithm(format!(
                "unrecognized blob version {:?}",
                version
            )));
        }
        Ok(plaintext.to_vec())
    }
}
