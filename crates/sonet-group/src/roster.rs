//! `GroupRoster` — the signed membership descriptor for one epoch.
//!
//! Grounded on `dl_proto::group::GroupState`'s signed-object shape
//! (group_id, epoch, members, policies, signature, signed_by).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sonet_crypto::{Algorithm, CryptoKey, Engine};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupRole {
    Admin,
    Member,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupMember {
    pub user_id: String,
    pub identity_pub_hex: String,
    pub role: GroupRole,
    pub joined_at: DateTime<Utc>,
}

/// How much message history a newly-joined member can see. Enforced by
/// the transport/storage layer that actually holds message history —
/// this crate only carries the setting as part of the signed roster so
/// every member agrees on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryVisibility {
    /// Only messages sent after the member joined.
    Joined,
    /// All history, re-encrypted for the new member out of band.
    Shared,
}

/// Group-level policies that affect security behaviour, carried from
/// `dl_proto::group::GroupPolicies`. `max_members` and `admin_only_invite`
/// are enforced by [`crate::manager::GroupManager::add_member`];
/// `history_visibility` and `disappearing_messages_secs` are descriptors
/// the transport/storage layer is expected to honor — this crate only
/// keeps them part of the signed roster so every member agrees on them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupPolicies {
    pub max_members: u32,
    pub history_visibility: HistoryVisibility,
    pub admin_only_invite: bool,
    pub join_by_link: bool,
    pub disappearing_messages_secs: u64,
}

impl Default for GroupPolicies {
    fn default() -> Self {
        Self {
            max_members: 256,
            history_visibility: HistoryVisibility::Joined,
            admin_only_invite: false,
            join_by_link: false,
            disappearing_messages_secs: 0,
        }
    }
}

/// Signed roster for a single epoch. Every membership change produces a
/// new `GroupRoster` with `epoch` incremented by exactly one, re-signed by
/// the admin who made the change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupRoster {
    pub group_id: String,
    pub epoch: u64,
    pub members: Vec<GroupMember>,
    pub policies: GroupPolicies,
    pub signed_by: String,
    pub signature_hex: String,
    pub created_at: DateTime<Utc>,
}

impl GroupRoster {
    fn canonical_bytes(
        group_id: &str,
        epoch: u64,
        members: &[GroupMember],
        policies: &GroupPolicies,
        signed_by: &str,
        created_at: DateTime<Utc>,
    ) -> Vec<u8> {
        let payload = serde_json::json!({
            "created_at": created_at.to_rfc3339(),
            "epoch": epoch,
            "group_id": group_id,
            "members": members,
            "policies": policies,
            "signed_by": signed_by,
        });
        serde_json::to_vec(&payload).unwrap_or_default()
    }

    pub fn sign(
        engine: &Engine,
        group_id: impl Into<String>,
        epoch: u64,
        members: Vec<GroupMember>,
        policies: GroupPolicies,
        admin_identity_priv: &CryptoKey,
        signed_by: impl Into<String>,
    ) -> Result<Self, sonet_crypto::CryptoError> {
        let group_id = group_id.into();
        let signed_by = signed_by.into();
        let created_at = Utc::now();
        let payload = Self::canonical_bytes(&group_id, epoch, &members, &policies, &signed_by, created_at);
        let signature = engine.sign(admin_identity_priv, &payload)?;
        Ok(Self {
            group_id,
            epoch,
            members,
            policies,
            signed_by,
            signature_hex: hex::encode(signature),
            created_at,
        })
    }

    /// Verify this roster's signature under the claimed signer's identity
    /// public key.
    pub fn verify(&self, engine: &Engine, signer_identity_pub_hex: &str) -> Result<bool, sonet_crypto::CryptoError> {
        let pub_bytes = match hex::decode(signer_identity_pub_hex) {
            Ok(b) if b.len() == 32 => b,
            _ => return Ok(false),
        };
        let signature = match hex::decode(&self.signature_hex) {
            Ok(b) => b,
            Err(_) => return Ok(false),
        };
        let identity_pub = CryptoKey::new(
            Algorithm::Ed25519,
            pub_bytes,
            self.group_id.clone(),
            "roster".to_string(),
            chrono::Duration::days(3650),
            false,
        );
        let payload =
            Self::canonical_bytes(&self.group_id, self.epoch, &self.members, &self.policies, &self.signed_by, self.created_at);
        engine.verify(&identity_pub, &payload, &signature)
    }

    pub fn find(&self, user_id: &str) -> Option<&GroupMember> {
        self.members.iter().find(|m| m.user_id == user_id)
    }

    pub fn is_admin(&self, user_id: &str) -> bool {
        matches!(self.find(user_id), Some(m) if m.role == GroupRole::Admin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sonet_crypto::dh::KeypairProtocol;

    fn member(user_id: &str, role: GroupRole) -> GroupMember {
        GroupMember {
            user_id: user_id.to_string(),
            identity_pub_hex: hex::encode([1u8; 32]),
            role,
            joined_at: Utc::now(),
        }
    }

    #[test]
    fn signed_roster_verifies_under_the_signer_identity() {
        let engine = Engine::new();
        let (admin_priv, admin_pub) = engine
            .generate_keypair(KeypairProtocol::Ed25519, "alice", "d1", chrono::Duration::days(1), false)
            .unwrap();
        let roster = GroupRoster::sign(
            &engine,
            "group-1",
            1,
            vec![member("alice", GroupRole::Admin)],
            GroupPolicies::default(),
            &admin_priv,
            "alice",
        )
        .unwrap();
        let pub_hex = hex::encode(admin_pub.expose_material());
        assert!(roster.verify(&engine, &pub_hex).unwrap());
    }

    #[test]
    fn tampered_roster_fails_verification() {
        let engine = Engine::new();
        let (admin_priv, admin_pub) = engine
            .generate_keypair(KeypairProtocol::Ed25519, "alice", "d1", chrono::Duration::days(1), false)
            .unwrap();
        let mut roster = GroupRoster::sign(
            &engine,
            "group-1",
            1,
            vec![member("alice", GroupRole::Admin)],
            GroupPolicies::default(),
            &admin_priv,
            "alice",
        )
        .unwrap();
        roster.epoch = 2;
        let pub_hex = hex::encode(admin_pub.expose_material());
        assert!(!roster.verify(&engine, &pub_hex).unwrap());
    }
}
