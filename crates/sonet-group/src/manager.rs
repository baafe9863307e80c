//! `GroupManager` — per-participant group state (spec §4.E).
//!
//! Each device runs its own `GroupManager`; there is no shared server-side
//! group object in this crate, mirroring how `sonet-session::RatchetState`
//! is per-pairwise-session rather than global. A membership change (add or
//! remove) produces a new signed roster and a fresh epoch key that the
//! admin distributes to the *remaining* members over their individual
//! pairwise ratchet sessions (`sonet-session`) — that distribution is the
//! caller's job, not this crate's. A participant who is removed, or who
//! was never a member, simply never receives the new epoch's
//! [`EpochDistribution`], so their local `EpochKeyRing` has no entry for
//! it and `decrypt` on a message from that epoch fails with
//! [`GroupError::UnknownEpoch`] — the removal is enforced by omission, not
//! by a check against a membership list at decrypt time.
//!
//! Grounded on `sonet-registry::Registry`'s `RwLock<HashMap<...>>`-guarded
//! state pattern (spec §5's lock hierarchy places the group-state lock
//! just inside the session-state lock).

use std::collections::HashMap;

use parking_lot::RwLock;
use sonet_crypto::aead::{self, AeadAlgorithm, TAG_LEN};
use sonet_crypto::{CryptoKey, Engine};

use crate::epoch::{EpochKey, EpochKeyRing, DEFAULT_RETENTION};
use crate::error::GroupError;
use crate::header::{self, GroupHeader};
use crate::roster::{GroupMember, GroupPolicies, GroupRole, GroupRoster};

const AEAD_ALG: AeadAlgorithm = AeadAlgorithm::ChaCha20Poly1305;

/// Everything a newly-admitted or newly-rekeyed member needs, handed to
/// the caller for out-of-band distribution over each remaining member's
/// pairwise session.
pub struct EpochDistribution {
    pub roster: GroupRoster,
    pub epoch_key: [u8; 32],
}

struct GroupState {
    roster: GroupRoster,
    epochs: EpochKeyRing,
}

pub struct GroupManager {
    retention: usize,
    groups: RwLock<HashMap<String, GroupState>>,
}

impl Default for GroupManager {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION)
    }
}

impl GroupManager {
    pub fn new(retention: usize) -> Self {
        Self { retention, groups: RwLock::new(HashMap::new()) }
    }

    /// Create a new group with a single founding admin, at epoch 1, under
    /// the given policies (spec §4.E's `GroupPolicies` descriptor —
    /// [`GroupPolicies::default`] for the common case).
    pub fn create_group(
        &self,
        engine: &Engine,
        group_id: impl Into<String>,
        admin_user_id: impl Into<String>,
        admin_identity_priv: &CryptoKey,
        admin_identity_pub_hex: String,
        policies: GroupPolicies,
    ) -> Result<EpochDistribution, GroupError> {
        let group_id = group_id.into();
        let admin_user_id = admin_user_id.into();
        let members = vec![GroupMember {
            user_id: admin_user_id.clone(),
            identity_pub_hex: admin_identity_pub_hex,
            role: GroupRole::Admin,
            joined_at: chrono::Utc::now(),
        }];
        let roster = GroupRoster::sign(engine, group_id.clone(), 1, members, policies, admin_identity_priv, admin_user_id)?;
        let epoch_key = self.fresh_epoch_key(engine)?;

        let mut ring = EpochKeyRing::new(self.retention);
        ring.insert(EpochKey::new(1, epoch_key));

        tracing::info!(group_id = %roster.group_id, epoch = roster.epoch, "group created");
        self.groups.write().insert(roster.group_id.clone(), GroupState { roster: roster.clone(), epochs: ring });

        Ok(EpochDistribution { roster, epoch_key })
    }

    /// Accept a roster and epoch key distributed by the admin — called by
    /// every member (including the admin) after a membership change, once
    /// they've received `dist` over their own pairwise session.
    pub fn accept_epoch(&self, dist: EpochDistribution) {
        let mut groups = self.groups.write();
        let entry = groups.entry(dist.roster.group_id.clone()).or_insert_with(|| GroupState {
            roster: dist.roster.clone(),
            epochs: EpochKeyRing::new(self.retention),
        });
        entry.roster = dist.roster.clone();
        entry.epochs.insert(EpochKey::new(dist.roster.epoch, dist.epoch_key));
        tracing::debug!(group_id = %dist.roster.group_id, epoch = dist.roster.epoch, "epoch accepted");
    }

    /// Add a member, incrementing the epoch and minting a fresh epoch key.
    /// `actor_user_id` must be a current member; if the group's
    /// `admin_only_invite` policy is set, only a current admin may call
    /// this. Fails with `MembershipLimitExceeded` if the roster is
    /// already at `policies.max_members`.
    pub fn add_member(
        &self,
        engine: &Engine,
        group_id: &str,
        actor_user_id: &str,
        actor_identity_priv: &CryptoKey,
        new_member: GroupMember,
    ) -> Result<EpochDistribution, GroupError> {
        self.mutate_roster(engine, group_id, actor_user_id, actor_identity_priv, false, |roster| {
            if roster.policies.admin_only_invite && !roster.is_admin(actor_user_id) {
                return Err(GroupError::InviteNotPermitted {
                    group_id: group_id.to_string(),
                    user_id: actor_user_id.to_string(),
                });
            }
            if roster.members.len() as u32 >= roster.policies.max_members {
                return Err(GroupError::MembershipLimitExceeded {
                    group_id: group_id.to_string(),
                    max_members: roster.policies.max_members,
                });
            }
            let mut members = roster.members.clone();
            members.push(new_member);
            Ok(members)
        })
    }

    /// Remove a member, incrementing the epoch and minting a fresh epoch
    /// key. The removed member is not handed the resulting
    /// `EpochDistribution` by the caller — that omission is what keeps
    /// them locked out of the new epoch. Only a current admin may remove.
    pub fn remove_member(
        &self,
        engine: &Engine,
        group_id: &str,
        actor_user_id: &str,
        actor_identity_priv: &CryptoKey,
        target_user_id: &str,
    ) -> Result<EpochDistribution, GroupError> {
        self.mutate_roster(engine, group_id, actor_user_id, actor_identity_priv, true, |roster| {
            let mut members = roster.members.clone();
            members.retain(|m| m.user_id != target_user_id);
            Ok(members)
        })
    }

    /// `require_actor_is_member` always holds; the admin-only checks live
    /// in each caller's `edit` closure since add/remove have different
    /// permission rules under `GroupPolicies`.
    fn mutate_roster(
        &self,
        engine: &Engine,
        group_id: &str,
        actor_user_id: &str,
        actor_identity_priv: &CryptoKey,
        require_admin: bool,
        edit: impl FnOnce(&GroupRoster) -> Result<Vec<GroupMember>, GroupError>,
    ) -> Result<EpochDistribution, GroupError> {
        let mut groups = self.groups.write();
        let state = groups.get_mut(group_id).ok_or_else(|| GroupError::UnknownGroup(group_id.to_string()))?;

        let actor_is_member = state.roster.find(actor_user_id).is_some();
        if !actor_is_member || (require_admin && !state.roster.is_admin(actor_user_id)) {
            return Err(GroupError::NotAMember { group_id: group_id.to_string(), user_id: actor_user_id.to_string() });
        }

        let members = edit(&state.roster)?;
        let next_epoch = state.roster.epoch + 1;
        let policies = state.roster.policies.clone();
        let roster = GroupRoster::sign(engine, group_id, next_epoch, members, policies, actor_identity_priv, actor_user_id)?;
        let epoch_key = self.fresh_epoch_key(engine)?;

        state.roster = roster.clone();
        state.epochs.insert(EpochKey::new(next_epoch, epoch_key));
        tracing::info!(group_id, epoch = next_epoch, "group roster changed");

        Ok(EpochDistribution { roster, epoch_key })
    }

    /// Encrypt a group message under the current (latest known) epoch.
    /// The wire header (spec §6: group id fingerprint, epoch, nonce) is
    /// bound into the AEAD associated data alongside the caller's `aad`,
    /// the same way `sonet-session::ratchet` binds its header.
    pub fn encrypt(
        &self,
        engine: &Engine,
        group_id: &str,
        plaintext: &[u8],
        aad: &[u8],
    ) -> Result<(GroupHeader, Vec<u8>, [u8; TAG_LEN]), GroupError> {
        let groups = self.groups.read();
        let state = groups.get(group_id).ok_or_else(|| GroupError::UnknownGroup(group_id.to_string()))?;
        let epoch = state.epochs.current_epoch().ok_or_else(|| GroupError::UnknownGroup(group_id.to_string()))?;
        let key = state.epochs.get(epoch).expect("current_epoch always has a matching entry");

        let nonce_vec = aead::fresh_nonce(AEAD_ALG)?;
        let mut nonce = [0u8; 12];
        nonce.copy_from_slice(&nonce_vec);
        let header = GroupHeader {
            group_id_fingerprint: header::group_id_fingerprint(group_id),
            epoch_number: epoch as u32,
            nonce,
        };

        let mut full_aad = Vec::with_capacity(aad.len() + header::HEADER_LEN);
        full_aad.extend_from_slice(aad);
        full_aad.extend_from_slice(&header.to_bytes());

        let (ct, tag) = aead::aead_encrypt(AEAD_ALG, key.material(), &nonce, &full_aad, plaintext)?;
        let _ = engine;
        Ok((header, ct, tag))
    }

    /// Decrypt a group message carrying `header`. Fails with
    /// `UnknownEpoch` if this participant never received that epoch's key
    /// (either it predates their join, postdates their removal, or fell
    /// outside the retention window).
    pub fn decrypt(
        &self,
        group_id: &str,
        header: &GroupHeader,
        ciphertext: &[u8],
        tag: &[u8; TAG_LEN],
        aad: &[u8],
    ) -> Result<Vec<u8>, GroupError> {
        if header.group_id_fingerprint != header::group_id_fingerprint(group_id) {
            return Err(GroupError::AuthenticationFailed);
        }
        let epoch = header.epoch_number as u64;
        let groups = self.groups.read();
        let state = groups.get(group_id).ok_or_else(|| GroupError::UnknownGroup(group_id.to_string()))?;
        let key = state.epochs.get(epoch).ok_or_else(|| GroupError::UnknownEpoch {
            group_id: group_id.to_string(),
            epoch_number: epoch,
        })?;

        let mut full_aad = Vec::with_capacity(aad.len() + header::HEADER_LEN);
        full_aad.extend_from_slice(aad);
        full_aad.extend_from_slice(&header.to_bytes());
        Ok(aead::aead_decrypt(AEAD_ALG, key.material(), &header.nonce, &full_aad, ciphertext, tag)?)
    }

    pub fn current_epoch(&self, group_id: &str) -> Option<u64> {
        self.groups.read().get(group_id).and_then(|s| s.epochs.current_epoch())
    }

    /// Current roster and epoch key material, for the caller to hand to
    /// persistence (`sonet-store`) — this crate stays opaque to how or
    /// whether it's saved.
    pub fn export_current_epoch(&self, group_id: &str) -> Option<(GroupRoster, [u8; 32], u64)> {
        let groups = self.groups.read();
        let state = groups.get(group_id)?;
        let epoch = state.epochs.current_epoch()?;
        let key = state.epochs.get(epoch)?;
        Some((state.roster.clone(), *key.material(), epoch))
    }

    pub fn is_member(&self, group_id: &str, user_id: &str) -> bool {
        self.groups.read().get(group_id).map(|s| s.roster.find(user_id).is_some()).unwrap_or(false)
    }

    fn fresh_epoch_key(&self, engine: &Engine) -> Result<[u8; 32], GroupError> {
        let bytes = engine.random_bytes(32)?;
        let mut key = [0u8; 32];
        key.copy_from_slice(&bytes);
        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sonet_crypto::dh::KeypairProtocol;

    fn identity(engine: &Engine, user: &str) -> (CryptoKey, String) {
        let (priv_key, pub_key) = engine
            .generate_keypair(KeypairProtocol::Ed25519, user, "d1", chrono::Duration::days(1), false)
            .unwrap();
        (priv_key, hex::encode(pub_key.expose_material()))
    }

    #[test]
    fn group_remove_locks_the_removed_member_out_of_the_new_epoch() {
        let engine = Engine::new();
        let (alice_priv, alice_pub) = identity(&engine, "alice");
        let (_bob_priv, bob_pub) = identity(&engine, "bob");

        let alice_mgr = GroupManager::default();
        let bob_mgr = GroupManager::default();

        let dist1 = alice_mgr.create_group(&engine, "group-1", "alice", &alice_priv, alice_pub, GroupPolicies::default()).unwrap();
        bob_mgr.accept_epoch(EpochDistribution { roster: dist1.roster.clone(), epoch_key: dist1.epoch_key });

        let add_dist = alice_mgr
            .add_member(
                &engine,
                "group-1",
                "alice",
                &alice_priv,
                GroupMember { user_id: "bob".into(), identity_pub_hex: bob_pub, role: GroupRole::Member, joined_at: chrono::Utc::now() },
            )
            .unwrap();
        bob_mgr.accept_epoch(EpochDistribution { roster: add_dist.roster.clone(), epoch_key: add_dist.epoch_key });
        assert!(bob_mgr.is_member("group-1", "bob"));

        let (header, ct, tag) = alice_mgr.encrypt(&engine, "group-1", b"hi bob", b"").unwrap();
        assert_eq!(bob_mgr.decrypt("group-1", &header, &ct, &tag, b"").unwrap(), b"hi bob");

        let remove_dist = alice_mgr.remove_member(&engine, "group-1", "alice", &alice_priv, "bob").unwrap();
        // bob is never handed `remove_dist` — that's the removal.
        let _ = remove_dist;

        let (header2, ct2, tag2) = alice_mgr.encrypt(&engine, "group-1", b"secret", b"").unwrap();
        let result = bob_mgr.decrypt("group-1", &header2, &ct2, &tag2, b"");
        assert!(matches!(result, Err(GroupError::UnknownEpoch { .. })));
    }

    #[test]
    fn non_admin_cannot_change_membership() {
        let engine = Engine::new();
        let (alice_priv, alice_pub) = identity(&engine, "alice");
        let (bob_priv, bob_pub) = identity(&engine, "bob");

        let mgr = GroupManager::default();
        mgr.create_group(&engine, "group-1", "alice", &alice_priv, alice_pub, GroupPolicies::default()).unwrap();
        mgr.add_member(
            &engine,
            "group-1",
            "alice",
            &alice_priv,
            GroupMember { user_id: "bob".into(), identity_pub_hex: bob_pub, role: GroupRole::Member, joined_at: chrono::Utc::now() },
        )
        .unwrap();

        let result = mgr.remove_member(&engine, "group-1", "bob", &bob_priv, "alice");
        assert!(matches!(result, Err(GroupError::NotAMember { .. })));
    }

    #[test]
    fn tampered_group_ciphertext_fails_authentication() {
        let engine = Engine::new();
        let (alice_priv, alice_pub) = identity(&engine, "alice");
        let mgr = GroupManager::default();
        mgr.create_group(&engine, "group-1", "alice", &alice_priv, alice_pub, GroupPolicies::default()).unwrap();

        let (header, mut ct, tag) = mgr.encrypt(&engine, "group-1", b"hello", b"").unwrap();
        let last = ct.len() - 1;
        ct[last] ^= 0x01;
        let result = mgr.decrypt("group-1", &header, &ct, &tag, b"");
        assert!(result.is_err());
    }

    #[test]
    fn admin_only_invite_blocks_a_non_admin_member() {
        let engine = Engine::new();
        let (alice_priv, alice_pub) = identity(&engine, "alice");
        let (bob_priv, bob_pub) = identity(&engine, "bob");
        let (_carol_priv, carol_pub) = identity(&engine, "carol");

        let policies = GroupPolicies { admin_only_invite: true, ..GroupPolicies::default() };
        let mgr = GroupManager::default();
        mgr.create_group(&engine, "group-1", "alice", &alice_priv, alice_pub, policies).unwrap();
        mgr.add_member(
            &engine,
            "group-1",
            "alice",
            &alice_priv,
            GroupMember { user_id: "bob".into(), identity_pub_hex: bob_pub, role: GroupRole::Member, joined_at: chrono::Utc::now() },
        )
        .unwrap();

        let result = mgr.add_member(
            &engine,
            "group-1",
            "bob",
            &bob_priv,
            GroupMember { user_id: "carol".into(), identity_pub_hex: carol_pub, role: GroupRole::Member, joined_at: chrono::Utc::now() },
        );
        assert!(matches!(result, Err(GroupError::InviteNotPermitted { .. })));
    }

    #[test]
    fn a_member_can_invite_when_admin_only_invite_is_not_set() {
        let engine = Engine::new();
        let (alice_priv, alice_pub) = identity(&engine, "alice");
        let (bob_priv, bob_pub) = identity(&engine, "bob");
        let (_carol_priv, carol_pub) = identity(&engine, "carol");

        let mgr = GroupManager::default();
        mgr.create_group(&engine, "group-1", "alice", &alice_priv, alice_pub, GroupPolicies::default()).unwrap();
        mgr.add_member(
            &engine,
            "group-1",
            "alice",
            &alice_priv,
            GroupMember { user_id: "bob".into(), identity_pub_hex: bob_pub, role: GroupRole::Member, joined_at: chrono::Utc::now() },
        )
        .unwrap();

        let result = mgr.add_member(
            &engine,
            "group-1",
            "bob",
            &bob_priv,
            GroupMember { user_id: "carol".into(), identity_pub_hex: carol_pub, role: GroupRole::Member, joined_at: chrono::Utc::now() },
        );
        assert!(result.is_ok());
        assert!(mgr.is_member("group-1", "carol"));
    }

    #[test]
    fn membership_limit_is_enforced() {
        let engine = Engine::new();
        let (alice_priv, alice_pub) = identity(&engine, "alice");
        let (_bob_priv, bob_pub) = identity(&engine, "bob");

        let policies = GroupPolicies { max_members: 1, ..GroupPolicies::default() };
        let mgr = GroupManager::default();
        mgr.create_group(&engine, "group-1", "alice", &alice_priv, alice_pub, policies).unwrap();

        let result = mgr.add_member(
            &engine,
            "group-1",
            "alice",
            &alice_priv,
            GroupMember { user_id: "bob".into(), identity_pub_hex: bob_pub, role: GroupRole::Member, joined_at: chrono::Utc::now() },
        );
        assert!(matches!(result, Err(GroupError::MembershipLimitExceeded { .. })));
    }
}
