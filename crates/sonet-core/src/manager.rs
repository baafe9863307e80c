//! `SonetEngine` — the orchestration façade (spec §2 "data flow": caller →
//! registry → X3DH → ratchet, persisted via the store; group path: caller
//! → group manager → primitives engine → store).
//!
//! Ties `sonet-crypto`, `sonet-registry`, `sonet-session`, `sonet-group`
//! and (optionally) `sonet-store` together behind one surface, enforcing
//! spec §5's lock acquisition order: registry lock, then session-state
//! lock, then group-state lock, then the primitives engine's own
//! key-cache lock. No public method here acquires locks out of that
//! order. Grounded on `sonet_registry::Registry`'s own lock-scoping style
//! — this is the same pattern one level up.

use std::collections::HashMap;

use parking_lot::{Mutex, RwLock};
use sonet_crypto::Engine as CryptoEngine;
use sonet_group::{EpochDistribution, GroupHeader, GroupManager, GroupMember, GroupPolicies};
use sonet_registry::{KeyBundle, Registry, RegistryConfig};
use sonet_session::{x3dh, RatchetMessage, RatchetState, SessionError};
use sonet_store::{BlobCipher, CleanupReport, SessionStore};

use crate::config::SonetConfig;
use crate::error::CoreError;

/// Everything the app layer must transport to the responder to complete
/// X3DH (spec §4.C step 8: "return session_id and our initial ratchet
/// public key"). `consumed_opk_id` travels alongside so the responder can
/// release the matching one-time prekey from its own device state.
pub struct SessionInit {
    pub session_id: String,
    pub chat_id: String,
    pub our_identity_pub_hex: String,
    pub ephemeral_pub: [u8; 32],
    pub salt: [u8; 32],
    pub consumed_opk_id: Option<String>,
    /// Whether the initiator mixed DH3 (our identity × peer signed prekey)
    /// into the root key — the responder must mirror this exactly or the
    /// two sides derive different keys (spec §4.C).
    pub dh3_included: bool,
}

pub struct SonetEngine {
    crypto: CryptoEngine,
    registry: Registry,
    sessions: RwLock<HashMap<String, Mutex<RatchetState>>>,
    groups: GroupManager,
    store: Option<SessionStore>,
    config: SonetConfig,
}

impl SonetEngine {
    pub fn new(config: SonetConfig) -> Self {
        let registry_config = RegistryConfig {
            otk_pool_size: config.one_time_prekey_pool_size,
            spk_rotation_days: config.signed_prekey_rotation_days,
            ..RegistryConfig::default()
        };
        Self {
            crypto: CryptoEngine::new(),
            registry: Registry::new(registry_config),
            sessions: RwLock::new(HashMap::new()),
            groups: GroupManager::new(config.epoch_key_retention_count),
            store: None,
            config,
        }
    }

    /// Attach a session store backed by `db_path`, running pending
    /// migrations on open (spec §4.F).
    pub async fn with_store(mut self, db_path: &std::path::Path) -> Result<Self, CoreError> {
        let store = SessionStore::open(db_path).await?;
        self.store = Some(store);
        Ok(self)
    }

    /// Start the periodic cleanup sweep (spec §4.F / §5 "background
    /// threads"). Dropping the returned handle does not stop the task —
    /// abort it explicitly on shutdown if that's desired.
    pub fn spawn_cleanup(&self) -> Result<tokio::task::JoinHandle<()>, CoreError> {
        let store = self.store.clone().ok_or(CoreError::PersistenceUnavailable)?;
        Ok(sonet_store::spawn_default_cleanup_loop(store, self.config.epoch_key_retention_count as i64))
    }

    // ---- key registry (spec §4.B) ----

    pub fn register_device(&self, user_id: &str, device_id: &str) -> Result<KeyBundle, CoreError> {
        Ok(self.registry.register_device(&self.crypto, user_id, device_id)?)
    }

    pub fn fetch_bundle(&self, user_id: &str, device_id: &str) -> Result<KeyBundle, CoreError> {
        Ok(self.registry.get_bundle(&self.crypto, user_id, device_id)?)
    }

    pub fn rotate_one_time_prekeys(&self, user_id: &str, device_id: &str) -> Result<usize, CoreError> {
        Ok(self.registry.rotate_one_time_prekeys(&self.crypto, user_id, device_id, None)?)
    }

    pub fn rotate_signed_prekey_if_due(&self, user_id: &str, device_id: &str) -> Result<bool, CoreError> {
        Ok(self.registry.rotate_signed_prekey_if_due(&self.crypto, user_id, device_id, false)?)
    }

    // ---- session establishment (spec §4.C) ----

    /// Initiate a pairwise session as the X3DH initiator. Acquires the
    /// registry lock (via `Registry::with_device`) to read our own
    /// identity private key, then the session-state lock to insert the
    /// new `RatchetState` — registry-before-session, per spec §5.
    pub fn initiate_session(
        &self,
        our_user_id: &str,
        our_device_id: &str,
        chat_id: &str,
        peer_user_id: &str,
        peer_device_id: &str,
    ) -> Result<SessionInit, CoreError> {
        let peer_bundle = self.registry.get_bundle(&self.crypto, peer_user_id, peer_device_id)?;

        let (x3dh_result, our_identity_pub_hex, our_identity_pub) = self
            .registry
            .with_device(our_user_id, our_device_id, |device| -> Result<_, CoreError> {
                let result = x3dh::initiate(&self.crypto, device, Some(&device.identity_priv), &peer_bundle)?;
                let our_identity_pub_hex = hex::encode(device.identity_pub.expose_material());
                let our_identity_pub: [u8; 32] = device
                    .identity_pub
                    .expose_material()
                    .try_into()
                    .map_err(|_| SessionError::InvalidHeader("identity key must be 32 bytes".into()))?;
                Ok((result, our_identity_pub_hex, our_identity_pub))
            })??;

        let their_identity_pub = hex32(&peer_bundle.identity_key_pub_hex)?;
        let their_initial_ratchet_pub = hex32(&peer_bundle.signed_prekey_pub_hex)?;
        let ratchet = RatchetState::init_initiator(
            x3dh_result.session_id.clone(),
            chat_id,
            our_identity_pub,
            their_identity_pub,
            x3dh_result.root_key,
            their_initial_ratchet_pub,
        )?;

        self.sessions.write().insert(x3dh_result.session_id.clone(), Mutex::new(ratchet));
        tracing::info!(session_id = %x3dh_result.session_id, our_user_id, peer_user_id, "session initiated");

        Ok(SessionInit {
            session_id: x3dh_result.session_id,
            chat_id: chat_id.to_string(),
            our_identity_pub_hex,
            ephemeral_pub: x3dh_result.ephemeral_pub,
            salt: x3dh_result.salt,
            consumed_opk_id: x3dh_result.consumed_opk_id,
            dh3_included: true,
        })
    }

    /// Accept an X3DH initiation as the responder, consuming the matching
    /// one-time prekey (if any) from our own device state and building
    /// the mirrored `RatchetState`.
    pub fn accept_session(&self, our_user_id: &str, our_device_id: &str, init: &SessionInit) -> Result<(), CoreError> {
        let (root_key, our_identity_pub, our_ratchet_priv, our_ratchet_pub) = self
            .registry
            .with_device_mut(our_user_id, our_device_id, |device| -> Result<_, CoreError> {
                let otk_priv = init.consumed_opk_id.as_deref().and_then(|id| device.consume_one_time_prekey_priv(id));
                let root_key = x3dh::respond(
                    &self.crypto,
                    device,
                    &device.signed_prekey_priv,
                    otk_priv.as_ref(),
                    &init.our_identity_pub_hex,
                    &init.ephemeral_pub,
                    &init.salt,
                    init.dh3_included,
                )?;
                let our_identity_pub: [u8; 32] = device
                    .identity_pub
                    .expose_material()
                    .try_into()
                    .map_err(|_| SessionError::InvalidHeader("identity key must be 32 bytes".into()))?;
                let our_ratchet_priv: [u8; 32] = device
                    .signed_prekey_priv
                    .expose_material()
                    .try_into()
                    .map_err(|_| SessionError::InvalidHeader("signed prekey must be 32 bytes".into()))?;
                let our_ratchet_pub: [u8; 32] = device
                    .signed_prekey_pub
                    .expose_material()
                    .try_into()
                    .map_err(|_| SessionError::InvalidHeader("signed prekey must be 32 bytes".into()))?;
                Ok((root_key, our_identity_pub, our_ratchet_priv, our_ratchet_pub))
            })??;

        let their_identity_pub = hex32(&init.our_identity_pub_hex)?;
        let ratchet = RatchetState::init_responder(
            init.session_id.clone(),
            init.chat_id.clone(),
            our_identity_pub,
            their_identity_pub,
            root_key,
            our_ratchet_priv,
            our_ratchet_pub,
        );

        self.sessions.write().insert(init.session_id.clone(), Mutex::new(ratchet));
        tracing::info!(session_id = %init.session_id, our_user_id, "session accepted");
        Ok(())
    }

    // ---- pairwise transport (spec §4.D) ----

    pub fn encrypt(&self, session_id: &str, plaintext: &[u8], aad: &[u8]) -> Result<RatchetMessage, CoreError> {
        let sessions = self.sessions.read();
        let session = sessions.get(session_id).ok_or_else(|| CoreError::UnknownSession(session_id.to_string()))?;
        let result = session.lock().encrypt(plaintext, aad)?;
        Ok(result)
    }

    pub fn decrypt(&self, session_id: &str, msg: &RatchetMessage, aad: &[u8]) -> Result<Vec<u8>, CoreError> {
        let sessions = self.sessions.read();
        let session = sessions.get(session_id).ok_or_else(|| CoreError::UnknownSession(session_id.to_string()))?;
        let result = session.lock().decrypt(msg, aad)?;
        Ok(result)
    }

    pub fn has_session(&self, session_id: &str) -> bool {
        self.sessions.read().contains_key(session_id)
    }

    // ---- group manager (spec §4.E) ----

    pub fn create_group(
        &self,
        group_id: &str,
        admin_user_id: &str,
        admin_device_id: &str,
        policies: GroupPolicies,
    ) -> Result<EpochDistribution, CoreError> {
        self.registry.with_device(admin_user_id, admin_device_id, |device| -> Result<_, CoreError> {
            let identity_pub_hex = hex::encode(device.identity_pub.expose_material());
            Ok(self.groups.create_group(&self.crypto, group_id, admin_user_id, &device.identity_priv, identity_pub_hex, policies)?)
        })?
    }

    pub fn accept_group_epoch(&self, dist: EpochDistribution) {
        self.groups.accept_epoch(dist);
    }

    pub fn add_group_member(
        &self,
        group_id: &str,
        actor_user_id: &str,
        actor_device_id: &str,
        new_member: GroupMember,
    ) -> Result<EpochDistribution, CoreError> {
        self.registry.with_device(actor_user_id, actor_device_id, |device| -> Result<_, CoreError> {
            Ok(self.groups.add_member(&self.crypto, group_id, actor_user_id, &device.identity_priv, new_member)?)
        })?
    }

    pub fn remove_group_member(
        &self,
        group_id: &str,
        actor_user_id: &str,
        actor_device_id: &str,
        target_user_id: &str,
    ) -> Result<EpochDistribution, CoreError> {
        self.registry.with_device(actor_user_id, actor_device_id, |device| -> Result<_, CoreError> {
            Ok(self.groups.remove_member(&self.crypto, group_id, actor_user_id, &device.identity_priv, target_user_id)?)
        })?
    }

    pub fn encrypt_group(&self, group_id: &str, plaintext: &[u8], aad: &[u8]) -> Result<(GroupHeader, Vec<u8>, [u8; 16]), CoreError> {
        Ok(self.groups.encrypt(&self.crypto, group_id, plaintext, aad)?)
    }

    pub fn decrypt_group(
        &self,
        group_id: &str,
        header: &GroupHeader,
        ciphertext: &[u8],
        tag: &[u8; 16],
        aad: &[u8],
    ) -> Result<Vec<u8>, CoreError> {
        Ok(self.groups.decrypt(group_id, header, ciphertext, tag, aad)?)
    }

    // ---- persistence (spec §4.F) ----

    /// Serialize and persist one session's ratchet state. The
    /// session-state lock is held only long enough to snapshot the
    /// state, released before the store is awaited.
    pub async fn persist_session(&self, session_id: &str, cipher: &BlobCipher) -> Result<(), CoreError> {
        let store = self.store.as_ref().ok_or(CoreError::PersistenceUnavailable)?;
        let blob = {
            let sessions = self.sessions.read();
            let session = sessions.get(session_id).ok_or_else(|| CoreError::UnknownSession(session_id.to_string()))?;
            let snapshot = session.lock().to_snapshot();
            serde_json::to_vec(&snapshot)?
        };
        store.save_session(cipher, session_id, &blob).await?;
        Ok(())
    }

    /// Load and install a previously-persisted session.
    pub async fn restore_session(&self, session_id: &str, cipher: &BlobCipher) -> Result<(), CoreError> {
        let store = self.store.as_ref().ok_or(CoreError::PersistenceUnavailable)?;
        let blob = store.load_session(cipher, session_id).await?;
        let snapshot = serde_json::from_slice(&blob)?;
        let ratchet = RatchetState::from_snapshot(snapshot)?;
        self.sessions.write().insert(session_id.to_string(), Mutex::new(ratchet));
        Ok(())
    }

    /// Persist the current epoch key and roster for a group, for recovery
    /// after restart.
    pub async fn persist_group_epoch(&self, group_id: &str, cipher: &BlobCipher) -> Result<(), CoreError> {
        let store = self.store.as_ref().ok_or(CoreError::PersistenceUnavailable)?;
        let (roster, epoch_key, epoch) = self
            .groups
            .export_current_epoch(group_id)
            .ok_or_else(|| sonet_group::GroupError::UnknownGroup(group_id.to_string()))?;
        let blob = serde_json::to_vec(&(roster, hex::encode(epoch_key)))?;
        store.save_epoch_key(cipher, group_id, epoch, &blob).await?;
        Ok(())
    }

    pub async fn run_cleanup(&self) -> Result<CleanupReport, CoreError> {
        let store = self.store.as_ref().ok_or(CoreError::PersistenceUnavailable)?;
        let idle_retention = chrono::Duration::days(sonet_store::SESSION_IDLE_RETENTION_DAYS);
        Ok(store.cleanup(idle_retention, self.config.epoch_key_retention_count as i64).await?)
    }
}

fn hex32(s: &str) -> Result<[u8; 32], CoreError> {
    let bytes = hex::decode(s).map_err(sonet_crypto::CryptoError::from)?;
    let len = bytes.len();
    bytes
        .try_into()
        .map_err(|_| CoreError::Crypto(sonet_crypto::CryptoError::InvalidKeyLength { expected: 32, got: len }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sonet_crypto::Algorithm;
    use sonet_group::GroupRole;

    #[test]
    fn full_pairwise_handshake_and_exchange() {
        let engine = SonetEngine::new(SonetConfig::default());
        engine.register_device("alice", "d1").unwrap();
        engine.register_device("bob", "d1").unwrap();

        let init = engine.initiate_session("alice", "d1", "chat-1", "bob", "d1").unwrap();
        engine.accept_session("bob", "d1", &init).unwrap();

        let msg = engine.encrypt(&init.session_id, b"hello bob", b"").unwrap();
        let plaintext = engine.decrypt(&init.session_id, &msg, b"").unwrap();
        assert_eq!(plaintext, b"hello bob");

        let reply = engine.encrypt(&init.session_id, b"hi alice", b"").unwrap();
        let plaintext = engine.decrypt(&init.session_id, &reply, b"").unwrap();
        assert_eq!(plaintext, b"hi alice");
    }

    #[test]
    fn encrypt_on_unknown_session_fails() {
        let engine = SonetEngine::new(SonetConfig::default());
        let result = engine.encrypt("ghost", b"hi", b"");
        assert!(matches!(result, Err(CoreError::UnknownSession(_))));
    }

    #[test]
    fn group_lifecycle_through_the_facade() {
        let engine = SonetEngine::new(SonetConfig::default());
        engine.register_device("alice", "d1").unwrap();
        engine.register_device("bob", "d1").unwrap();
        let bob_bundle = engine.fetch_bundle("bob", "d1").unwrap();

        engine.create_group("group-1", "alice", "d1", GroupPolicies::default()).unwrap();
        engine
            .add_group_member(
                "group-1",
                "alice",
                "d1",
                GroupMember {
                    user_id: "bob".into(),
                    identity_pub_hex: bob_bundle.identity_key_pub_hex.clone(),
                    role: GroupRole::Member,
                    joined_at: chrono::Utc::now(),
                },
            )
            .unwrap();

        let (header, ct, tag) = engine.encrypt_group("group-1", b"group hello", b"").unwrap();
        let plaintext = engine.decrypt_group("group-1", &header, &ct, &tag, b"").unwrap();
        assert_eq!(plaintext, b"group hello");
    }

    #[tokio::test]
    async fn session_persists_and_restores_across_a_simulated_restart() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("sessions.db");
        let engine = SonetEngine::new(SonetConfig::default()).with_store(&db_path).await.unwrap();
        engine.register_device("alice", "d1").unwrap();
        engine.register_device("bob", "d1").unwrap();

        let init = engine.initiate_session("alice", "d1", "chat-1", "bob", "d1").unwrap();
        engine.accept_session("bob", "d1", &init).unwrap();
        engine.encrypt(&init.session_id, b"before restart", b"").unwrap();

        let key = engine
            .crypto
            .generate_symmetric_key(Algorithm::Aes256Gcm, "store", "local", chrono::Duration::days(365))
            .unwrap();
        let cipher = BlobCipher::new(key);

        engine.persist_session(&init.session_id, &cipher).await.unwrap();

        let restored_engine = SonetEngine::new(SonetConfig::default()).with_store(&db_path).await.unwrap();
        restored_engine.restore_session(&init.session_id, &cipher).await.unwrap();
        assert!(restored_engine.has_session(&init.session_id));
    }
}
