//! The key registry itself (spec §4.B): publishes and serves key
//! bundles, rotates prekeys, and keeps the append-only key-change log.
//!
//! Guarded by a single `parking_lot::RwLock` over the `DeviceState` map —
//! the outermost lock in the hierarchy from spec §5 ("Key registry lock
//! (guards DeviceState / KeyBundle maps)").

use chrono::{Duration, Utc};
use parking_lot::RwLock;
use sonet_crypto::Engine;
use std::collections::HashMap;

use crate::bundle::{self, DeviceState, KeyBundle};
use crate::error::RegistryError;
use crate::log::{KeyLog, KeyLogEntry, KeyOperation};

pub const DEFAULT_OTK_POOL_SIZE: usize = 100;
pub const DEFAULT_OTK_WATERMARK: usize = 10;
pub const DEFAULT_SPK_ROTATION_DAYS: i64 = 7;
pub const DEFAULT_BUNDLE_TTL: Duration = Duration::hours(24);

pub struct RegistryConfig {
    pub otk_pool_size: usize,
    pub otk_watermark: usize,
    pub spk_rotation_days: i64,
    pub bundle_ttl: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            otk_pool_size: DEFAULT_OTK_POOL_SIZE,
            otk_watermark: DEFAULT_OTK_WATERMARK,
            spk_rotation_days: DEFAULT_SPK_ROTATION_DAYS,
            bundle_ttl: DEFAULT_BUNDLE_TTL,
        }
    }
}

type DeviceKey = (String, String);

pub struct Registry {
    config: RegistryConfig,
    devices: RwLock<HashMap<DeviceKey, DeviceState>>,
    log: RwLock<KeyLog>,
    /// Last identity key observed for each `(user, device)`, as of the
    /// most recent successful `get_bundle`. Grounded on
    /// `dl_crypto::identity`'s key-change policy: republishing a bundle
    /// under a different identity key must never happen silently.
    known_identities: RwLock<HashMap<DeviceKey, String>>,
}

impl Registry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            devices: RwLock::new(HashMap::new()),
            log: RwLock::new(KeyLog::new()),
            known_identities: RwLock::new(HashMap::new()),
        }
    }

    /// `register_device(user, device, identity_pub)` (spec §4.B):
    /// generates a signed prekey and the full one-time prekey pool,
    /// stores `DeviceState`, and returns the signed publishable bundle.
    pub fn register_device(
        &self,
        engine: &Engine,
        user_id: &str,
        device_id: &str,
    ) -> Result<KeyBundle, RegistryError> {
        let key = (user_id.to_string(), device_id.to_string());
        {
            let devices = self.devices.read();
            if devices.contains_key(&key) {
                return Err(RegistryError::AlreadyRegistered {
                    user_id: user_id.to_string(),
                    device_id: device_id.to_string(),
                });
            }
        }

        let device = DeviceState::register(engine, user_id, device_id, self.config.otk_pool_size)?;
        let bundle = device.sign_bundle(engine)?;

        tracing::info!(user_id, device_id, "device registered");
        self.log.write().append(KeyLogEntry {
            user_id: user_id.to_string(),
            device_id: device_id.to_string(),
            operation: KeyOperation::Register,
            old_key_fingerprint: None,
            new_key_fingerprint: Some(device.identity_pub.fingerprint()),
            timestamp: Utc::now(),
            signature_hex: bundle.signature_hex.clone(),
            reason: None,
        });

        self.devices.write().insert(key, device);
        Ok(bundle)
    }

    /// `rotate_one_time_prekeys(user, count)` (spec §4.B): replenishes the
    /// pool back up to `count` (or the configured default if `count` is
    /// `None`).
    pub fn rotate_one_time_prekeys(
        &self,
        engine: &Engine,
        user_id: &str,
        device_id: &str,
        count: Option<usize>,
    ) -> Result<usize, RegistryError> {
        let mut devices = self.devices.write();
        let device = devices
            .get_mut(&(user_id.to_string(), device_id.to_string()))
            .ok_or_else(|| RegistryError::UnknownDevice {
                user_id: user_id.to_string(),
                device_id: device_id.to_string(),
            })?;

        let target = count.unwrap_or(self.config.otk_pool_size);
        let added = device.replenish_otks(engine, target)?;

        if added > 0 {
            tracing::debug!(user_id, device_id, added, "one-time prekeys replenished");
            self.log.write().append(KeyLogEntry {
                user_id: user_id.to_string(),
                device_id: device_id.to_string(),
                operation: KeyOperation::RotateOtk,
                old_key_fingerprint: None,
                new_key_fingerprint: None,
                timestamp: Utc::now(),
                signature_hex: String::new(),
                reason: Some(format!("replenished {added} one-time prekeys")),
            });
        }
        Ok(added)
    }

    /// Rotate the signed prekey if it is older than the configured
    /// rotation interval, or unconditionally if `force` is set.
    pub fn rotate_signed_prekey_if_due(
        &self,
        engine: &Engine,
        user_id: &str,
        device_id: &str,
        force: bool,
    ) -> Result<bool, RegistryError> {
        let mut devices = self.devices.write();
        let device = devices
            .get_mut(&(user_id.to_string(), device_id.to_string()))
            .ok_or_else(|| RegistryError::UnknownDevice {
                user_id: user_id.to_string(),
                device_id: device_id.to_string(),
            })?;

        if !force && device.signed_prekey_age_days() < self.config.spk_rotation_days {
            return Ok(false);
        }

        let old_fingerprint = device.signed_prekey_pub.fingerprint();
        device.rotate_signed_prekey(engine)?;
        let new_fingerprint = device.signed_prekey_pub.fingerprint();

        tracing::info!(user_id, device_id, "signed prekey rotated");
        self.log.write().append(KeyLogEntry {
            user_id: user_id.to_string(),
            device_id: device_id.to_string(),
            operation: KeyOperation::RotateSpk,
            old_key_fingerprint: Some(old_fingerprint),
            new_key_fingerprint: Some(new_fingerprint),
            timestamp: Utc::now(),
            signature_hex: String::new(),
            reason: None,
        });
        Ok(true)
    }

    /// `get_bundle(user, device) → KeyBundle` (spec §4.B): marks the
    /// bundle stale if `now - last_refresh > bundle_ttl`. Refuses to
    /// republish under an identity key that differs from the one last
    /// observed for this `(user, device)` — the never-silently-fall-back
    /// half of the key-change policy; callers that want to accept the
    /// change must re-verify out of band first.
    pub fn get_bundle(&self, engine: &Engine, user_id: &str, device_id: &str) -> Result<KeyBundle, RegistryError> {
        let devices = self.devices.read();
        let device = devices
            .get(&(user_id.to_string(), device_id.to_string()))
            .ok_or_else(|| RegistryError::UnknownDevice {
                user_id: user_id.to_string(),
                device_id: device_id.to_string(),
            })?;

        let mut bundle = device.sign_bundle(engine)?;
        if Utc::now() - bundle.last_refresh > self.config.bundle_ttl {
            bundle.is_stale = true;
        }

        let key = (user_id.to_string(), device_id.to_string());
        let mut known = self.known_identities.write();
        match known.get(&key) {
            Some(seen) if seen != &bundle.identity_key_pub_hex => {
                tracing::warn!(user_id, device_id, "identity key changed since last observed");
                self.log.write().append(KeyLogEntry {
                    user_id: user_id.to_string(),
                    device_id: device_id.to_string(),
                    operation: KeyOperation::IdentityChanged,
                    old_key_fingerprint: Some(seen.clone()),
                    new_key_fingerprint: Some(bundle.identity_key_pub_hex.clone()),
                    timestamp: Utc::now(),
                    signature_hex: bundle.signature_hex.clone(),
                    reason: None,
                });
                return Err(RegistryError::IdentityKeyChanged {
                    user_id: user_id.to_string(),
                    device_id: device_id.to_string(),
                });
            }
            _ => {
                known.insert(key, bundle.identity_key_pub_hex.clone());
            }
        }

        Ok(bundle)
    }

    /// `consume_one_time_prekey(user, device) → prekey_pub` (spec §4.B):
    /// atomically removes one prekey, returning its id and private half
    /// so the caller (the X3DH responder) can complete the handshake.
    /// Returns `None` if the pool is empty.
    pub fn consume_one_time_prekey(
        &self,
        user_id: &str,
        device_id: &str,
        opk_id: &str,
    ) -> Result<Option<sonet_crypto::CryptoKey>, RegistryError> {
        let mut devices = self.devices.write();
        let device = devices
            .get_mut(&(user_id.to_string(), device_id.to_string()))
            .ok_or_else(|| RegistryError::UnknownDevice {
                user_id: user_id.to_string(),
                device_id: device_id.to_string(),
            })?;
        Ok(device.consume_one_time_prekey_priv(opk_id))
    }

    /// `verify_bundle(bundle) → bool` (spec §4.B).
    pub fn verify_bundle(&self, engine: &Engine, bundle: &KeyBundle) -> Result<bool, RegistryError> {
        bundle::verify_bundle(engine, bundle)
    }

    /// Run `f` against the local device's private state. Callers outside
    /// this crate (the X3DH and session layers) need direct access to
    /// `DeviceState` to compute DH outputs, but nothing should be able to
    /// clone or outlive the private material — a closure held under the
    /// registry lock (spec §5's outermost lock) is the boundary.
    pub fn with_device<R>(
        &self,
        user_id: &str,
        device_id: &str,
        f: impl FnOnce(&DeviceState) -> R,
    ) -> Result<R, RegistryError> {
        let devices = self.devices.read();
        let device = devices
            .get(&(user_id.to_string(), device_id.to_string()))
            .ok_or_else(|| RegistryError::UnknownDevice { user_id: user_id.to_string(), device_id: device_id.to_string() })?;
        Ok(f(device))
    }

    /// Mutable counterpart of [`Registry::with_device`] — used for
    /// consuming a one-time prekey as part of responding to X3DH.
    pub fn with_device_mut<R>(
        &self,
        user_id: &str,
        device_id: &str,
        f: impl FnOnce(&mut DeviceState) -> R,
    ) -> Result<R, RegistryError> {
        let mut devices = self.devices.write();
        let device = devices
            .get_mut(&(user_id.to_string(), device_id.to_string()))
            .ok_or_else(|| RegistryError::UnknownDevice { user_id: user_id.to_string(), device_id: device_id.to_string() })?;
        Ok(f(device))
    }

    pub fn device_exists(&self, user_id: &str, device_id: &str) -> bool {
        self.devices
            .read()
            .contains_key(&(user_id.to_string(), device_id.to_string()))
    }

    pub fn log_len(&self) -> usize {
        self.log.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_get_bundle_roundtrips() {
        let engine = Engine::new();
        let registry = Registry::new(RegistryConfig::default());
        let bundle = registry.register_device(&engine, "alice", "d1").unwrap();
        assert!(registry.verify_bundle(&engine, &bundle).unwrap());

        let fetched = registry.get_bundle(&engine, "alice", "d1").unwrap();
        assert_eq!(fetched.user_id, "alice");
        assert!(!fetched.is_stale);
    }

    #[test]
    fn double_registration_is_rejected() {
        let engine = Engine::new();
        let registry = Registry::new(RegistryConfig::default());
        registry.register_device(&engine, "bob", "d1").unwrap();
        let result = registry.register_device(&engine, "bob", "d1");
        assert!(matches!(result, Err(RegistryError::AlreadyRegistered { .. })));
    }

    #[test]
    fn consuming_unknown_device_prekey_errors() {
        let registry = Registry::new(RegistryConfig::default());
        let result = registry.consume_one_time_prekey("ghost", "d1", "opk-0");
        assert!(matches!(result, Err(RegistryError::UnknownDevice { .. })));
    }

    #[test]
    fn with_device_exposes_private_state_under_the_registry_lock() {
        let engine = Engine::new();
        let registry = Registry::new(RegistryConfig::default());
        registry.register_device(&engine, "frank", "d1").unwrap();

        let pool_len = registry.with_device("frank", "d1", |device| device.otk_pool_len()).unwrap();
        assert_eq!(pool_len, DEFAULT_OTK_POOL_SIZE);

        let consumed = registry
            .with_device_mut("frank", "d1", |device| {
                let id = device.sign_bundle(&engine).unwrap().one_time_prekeys[0].id.clone();
                device.consume_one_time_prekey_priv(&id)
            })
            .unwrap();
        assert!(consumed.is_some());

        let result = registry.with_device("ghost", "d1", |device| device.otk_pool_len());
        assert!(matches!(result, Err(RegistryError::UnknownDevice { .. })));
    }

    #[test]
    fn rotating_prekeys_appends_to_the_key_log() {
        let engine = Engine::new();
        let registry = Registry::new(RegistryConfig::default());
        registry.register_device(&engine, "carol", "d1").unwrap();
        assert_eq!(registry.log_len(), 1);

        let bundle = registry.get_bundle(&engine, "carol", "d1").unwrap();
        let opk_id = bundle.one_time_prekeys[0].id.clone();
        registry.consume_one_time_prekey("carol", "d1", &opk_id).unwrap();

        let added = registry
            .rotate_one_time_prekeys(&engine, "carol", "d1", Some(DEFAULT_OTK_POOL_SIZE))
            .unwrap();
        assert_eq!(added, 1);
        assert_eq!(registry.log_len(), 2);
    }

    #[test]
    fn signed_prekey_rotation_is_skipped_unless_due_or_forced() {
        let engine = Engine::new();
        let registry = Registry::new(RegistryConfig::default());
        registry.register_device(&engine, "dave", "d1").unwrap();

        let rotated = registry
            .rotate_signed_prekey_if_due(&engine, "dave", "d1", false)
            .unwrap();
        assert!(!rotated, "freshly registered SPK should not be due for rotation");

        let forced = registry
            .rotate_signed_prekey_if_due(&engine, "dave", "d1", true)
            .unwrap();
        assert!(forced);
        assert_eq!(registry.log_len(), 2);
    }

    #[test]
    fn get_bundle_rejects_an_identity_key_that_changed_since_last_seen() {
        let engine = Engine::new();
        let registry = Registry::new(RegistryConfig::default());
        registry.register_device(&engine, "grace", "d1").unwrap();

        registry.get_bundle(&engine, "grace", "d1").unwrap();

        let (swapped_priv, swapped_pub) = engine
            .generate_keypair(
                sonet_crypto::dh::KeypairProtocol::Ed25519,
                "grace",
                "d1",
                chrono::Duration::days(3650),
                false,
            )
            .unwrap();
        registry
            .with_device_mut("grace", "d1", |device| {
                device.identity_priv = swapped_priv;
                device.identity_pub = swapped_pub;
            })
            .unwrap();

        let result = registry.get_bundle(&engine, "grace", "d1");
        assert!(matches!(result, Err(RegistryError::IdentityKeyChanged { .. })));
        assert_eq!(registry.log_len(), 2);
    }
}
