//! `KeyBundle` and `DeviceState` (spec §3, §4.B).
//!
//! A bundle is the publishable advertisement a peer fetches to initiate
//! X3DH; `DeviceState` is the private counterpart that never leaves the
//! device boundary. Grounded on `dl_crypto::identity::{IdentityKeyPair,
//! DeviceCert}` and `dl_proto::api::UserKeysResponse`'s bundle JSON shape.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sonet_crypto::{Algorithm, CryptoKey, Engine};

use crate::error::RegistryError;

/// A single one-time prekey, public half only, as advertised in a bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OneTimePrekeyPublic {
    pub id: String,
    pub pub_hex: String,
}

/// Publishable key bundle (spec §6 wire format: public-only JSON).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyBundle {
    pub user_id: String,
    pub device_id: String,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub last_refresh: DateTime<Utc>,
    pub is_stale: bool,
    pub identity_key_pub_hex: String,
    pub signed_prekey_pub_hex: String,
    pub one_time_prekeys: Vec<OneTimePrekeyPublic>,
    pub signature_hex: String,
}

impl KeyBundle {
    /// Canonical payload signed by the identity key: identity/version
    /// metadata plus every public key the bundle advertises, serialized
    /// as sorted-key JSON so signer and verifier agree on byte layout.
    /// Covering the key material itself (not just the metadata fields)
    /// is what lets `verify_bundle` catch a tampered `signed_prekey_pub`
    /// or one-time prekey, mirroring `dl_crypto::identity::DeviceCert`'s
    /// payload scope.
    fn signing_payload(
        user_id: &str,
        device_id: &str,
        version: u64,
        created_at: DateTime<Utc>,
        identity_key_pub_hex: &str,
        signed_prekey_pub_hex: &str,
        one_time_prekeys: &[OneTimePrekeyPublic],
    ) -> Result<Vec<u8>, RegistryError> {
        let payload = serde_json::json!({
            "created_at": created_at.to_rfc3339(),
            "device_id": device_id,
            "identity_key_pub_hex": identity_key_pub_hex,
            "one_time_prekeys": one_time_prekeys,
            "signed_prekey_pub_hex": signed_prekey_pub_hex,
            "user_id": user_id,
            "version": version,
        });
        Ok(serde_json::to_vec(&payload)?)
    }
}

/// Private counterpart of a `KeyBundle`. Owned entirely by one device;
/// never serialized to the wire (spec §3: "never leaves the device
/// boundary").
pub struct DeviceState {
    pub user_id: String,
    pub device_id: String,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub last_refresh: DateTime<Utc>,
    pub identity_priv: CryptoKey,
    pub identity_pub: CryptoKey,
    pub signed_prekey_priv: CryptoKey,
    pub signed_prekey_pub: CryptoKey,
    pub signed_prekey_created_at: DateTime<Utc>,
    pub one_time_prekeys: Vec<(String, CryptoKey, CryptoKey)>,
}

impl DeviceState {
    /// `register_device(user, device, identity_pub)` (spec §4.B). The
    /// identity keypair is generated here rather than accepted as a
    /// parameter — callers that already hold an identity keypair should
    /// use [`DeviceState::with_identity`] instead.
    pub fn register(
        engine: &Engine,
        user_id: impl Into<String>,
        device_id: impl Into<String>,
        otk_pool_size: usize,
    ) -> Result<Self, RegistryError> {
        let (identity_priv, identity_pub) = engine.generate_keypair(
            sonet_crypto::dh::KeypairProtocol::Ed25519,
            user_id,
            device_id,
            Duration::days(3650),
            false,
        )?;
        Self::with_identity(engine, identity_priv, identity_pub, otk_pool_size)
    }

    /// Build device state from an existing identity keypair — the path
    /// used when a device is re-registering after restart.
    pub fn with_identity(
        engine: &Engine,
        identity_priv: CryptoKey,
        identity_pub: CryptoKey,
        otk_pool_size: usize,
    ) -> Result<Self, RegistryError> {
        let user_id = identity_priv.owner_user.clone();
        let device_id = identity_priv.owner_device.clone();
        let now = Utc::now();

        let (signed_prekey_priv, signed_prekey_pub) = engine.generate_keypair(
            sonet_crypto::dh::KeypairProtocol::X25519,
            user_id.clone(),
            device_id.clone(),
            Duration::days(30),
            false,
        )?;

        let one_time_prekeys = Self::generate_otks(engine, &user_id, &device_id, otk_pool_size)?;

        Ok(Self {
            user_id,
            device_id,
            version: 1,
            created_at: now,
            last_refresh: now,
            identity_priv,
            identity_pub,
            signed_prekey_priv,
            signed_prekey_pub,
            signed_prekey_created_at: now,
            one_time_prekeys,
        })
    }

    fn generate_otks(
        engine: &Engine,
        user_id: &str,
        device_id: &str,
        count: usize,
    ) -> Result<Vec<(String, CryptoKey, CryptoKey)>, RegistryError> {
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            let (priv_key, pub_key) = engine.generate_keypair(
                sonet_crypto::dh::KeypairProtocol::X25519,
                user_id,
                device_id,
                Duration::days(90),
                true,
            )?;
            let id = engine.random_hex(8)?;
            out.push((id, priv_key, pub_key));
        }
        Ok(out)
    }

    /// Sign and serialize this device's public bundle (spec §4.B
    /// `register_device` / `get_bundle`).
    pub fn sign_bundle(&self, engine: &Engine) -> Result<KeyBundle, RegistryError> {
        let identity_key_pub_hex = hex::encode(self.identity_pub.expose_material());
        let signed_prekey_pub_hex = hex::encode(self.signed_prekey_pub.expose_material());
        let one_time_prekeys: Vec<OneTimePrekeyPublic> = self
            .one_time_prekeys
            .iter()
            .map(|(id, _priv, pub_key)| OneTimePrekeyPublic {
                id: id.clone(),
                pub_hex: hex::encode(pub_key.expose_material()),
            })
            .collect();

        let payload = KeyBundle::signing_payload(
            &self.user_id,
            &self.device_id,
            self.version,
            self.created_at,
            &identity_key_pub_hex,
            &signed_prekey_pub_hex,
            &one_time_prekeys,
        )?;
        let signature = engine.sign(&self.identity_priv, &payload)?;

        Ok(KeyBundle {
            user_id: self.user_id.clone(),
            device_id: self.device_id.clone(),
            version: self.version,
            created_at: self.created_at,
            last_refresh: self.last_refresh,
            is_stale: false,
            identity_key_pub_hex,
            signed_prekey_pub_hex,
            one_time_prekeys,
            signature_hex: hex::encode(signature),
        })
    }

    /// Spend one one-time prekey, returning its private half — used when
    /// this device is the X3DH responder. Returns `None` if the pool is
    /// empty (spec §4.B: session continues without the OTK contribution).
    pub fn consume_one_time_prekey_priv(&mut self, id: &str) -> Option<CryptoKey> {
        let pos = self.one_time_prekeys.iter().position(|(otk_id, _, _)| otk_id == id)?;
        let (_, priv_key, _) = self.one_time_prekeys.remove(pos);
        Some(priv_key)
    }

    pub fn otk_pool_len(&self) -> usize {
        self.one_time_prekeys.len()
    }

    /// Replenish the one-time prekey pool up to `target`.
    pub fn replenish_otks(&mut self, engine: &Engine, target: usize) -> Result<usize, RegistryError> {
        if self.one_time_prekeys.len() >= target {
            return Ok(0);
        }
        let needed = target - self.one_time_prekeys.len();
        let fresh = Self::generate_otks(engine, &self.user_id, &self.device_id, needed)?;
        let added = fresh.len();
        self.one_time_prekeys.extend(fresh);
        self.version += 1;
        Ok(added)
    }

    /// Rotate the signed prekey (spec §4.B: default every 7 days, or on
    /// demand).
    pub fn rotate_signed_prekey(&mut self, engine: &Engine) -> Result<(), RegistryError> {
        let (priv_key, pub_key) = engine.generate_keypair(
            sonet_crypto::dh::KeypairProtocol::X25519,
            self.user_id.clone(),
            self.device_id.clone(),
            Duration::days(30),
            false,
        )?;
        self.signed_prekey_priv = priv_key;
        self.signed_prekey_pub = pub_key;
        self.signed_prekey_created_at = Utc::now();
        self.version += 1;
        Ok(())
    }

    pub fn signed_prekey_age_days(&self) -> i64 {
        (Utc::now() - self.signed_prekey_created_at).num_days()
    }
}

/// `verify_bundle(bundle) → bool` (spec §4.B): checks the signature under
/// the claimed identity key. Never panics on malformed hex — malformed
/// input is treated as a failed verification.
pub fn verify_bundle(engine: &Engine, bundle: &KeyBundle) -> Result<bool, RegistryError> {
    let identity_pub_bytes = match hex::decode(&bundle.identity_key_pub_hex) {
        Ok(b) => b,
        Err(_) => return Ok(false),
    };
    let signature = match hex::decode(&bundle.signature_hex) {
        Ok(b) => b,
        Err(_) => return Ok(false),
    };
    if identity_pub_bytes.len() != 32 {
        return Ok(false);
    }

    let identity_pub = CryptoKey::new(
        Algorithm::Ed25519,
        identity_pub_bytes,
        bundle.user_id.clone(),
        bundle.device_id.clone(),
        Duration::days(3650),
        false,
    );

    let payload = KeyBundle::signing_payload(
        &bundle.user_id,
        &bundle.device_id,
        bundle.version,
        bundle.created_at,
        &bundle.identity_key_pub_hex,
        &bundle.signed_prekey_pub_hex,
        &bundle.one_time_prekeys,
    )?;

    Ok(engine.verify(&identity_pub, &payload, &signature)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registered_device_produces_a_verifiable_bundle() {
        let engine = Engine::new();
        let device = DeviceState::register(&engine, "alice", "device-1", 10).unwrap();
        let bundle = device.sign_bundle(&engine).unwrap();
        assert!(verify_bundle(&engine, &bundle).unwrap());
        assert_eq!(bundle.one_time_prekeys.len(), 10);
    }

    #[test]
    fn tampered_signed_prekey_fails_verification() {
        let engine = Engine::new();
        let device = DeviceState::register(&engine, "bob", "device-1", 5).unwrap();
        let mut bundle = device.sign_bundle(&engine).unwrap();

        let mut raw = hex::decode(&bundle.signed_prekey_pub_hex).unwrap();
        raw[0] ^= 0x01;
        bundle.signed_prekey_pub_hex = hex::encode(raw);

        assert!(!verify_bundle(&engine, &bundle).unwrap());
    }

    #[test]
    fn tampered_signature_fails_verification() {
        let engine = Engine::new();
        let device = DeviceState::register(&engine, "carol", "device-1", 5).unwrap();
        let mut bundle = device.sign_bundle(&engine).unwrap();

        let mut sig = hex::decode(&bundle.signature_hex).unwrap();
        sig[0] ^= 0xFF;
        bundle.signature_hex = hex::encode(sig);

        assert!(!verify_bundle(&engine, &bundle).unwrap());
    }

    #[test]
    fn consuming_one_time_prekey_removes_it_from_the_pool() {
        let engine = Engine::new();
        let mut device = DeviceState::register(&engine, "dave", "device-1", 3).unwrap();
        let bundle = device.sign_bundle(&engine).unwrap();
        let first_id = bundle.one_time_prekeys[0].id.clone();

        let consumed = device.consume_one_time_prekey_priv(&first_id);
        assert!(consumed.is_some());
        assert_eq!(device.otk_pool_len(), 2);
        assert!(device.consume_one_time_prekey_priv(&first_id).is_none());
    }

    #[test]
    fn replenish_tops_up_to_target_and_bumps_version() {
        let engine = Engine::new();
        let mut device = DeviceState::register(&engine, "erin", "device-1", 2).unwrap();
        let before_version = device.version;
        let added = device.replenish_otks(&engine, 10).unwrap();
        assert_eq!(added, 8);
        assert_eq!(device.otk_pool_len(), 10);
        assert!(device.version > before_version);
    }
}
