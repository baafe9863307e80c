//! `TrustState` — pairwise trust assertion (spec §3).
//!
//! Grounded on `dl_crypto::identity`'s key-change policy doc comment: a
//! verified contact's identity key changing must block messaging and
//! require explicit re-verification, never a silent fallback.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustLevel {
    Unverified,
    SafetyNumber,
    Qr,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustState {
    pub user_id: String,
    pub peer_user_id: String,
    pub level: TrustLevel,
    pub established_at: DateTime<Utc>,
    pub last_verified_at: DateTime<Utc>,
    pub is_active: bool,
}

/// In-memory trust table keyed by `(user_id, peer_user_id)`. Callers
/// persist this via `sonet-store` like any other registry state.
#[derive(Default)]
pub struct TrustTable {
    entries: HashMap<(String, String), TrustState>,
}

impl TrustTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_verified(&mut self, user_id: &str, peer_user_id: &str, level: TrustLevel) {
        let now = Utc::now();
        let key = (user_id.to_string(), peer_user_id.to_string());
        self.entries
            .entry(key)
            .and_modify(|t| {
                t.level = level;
                t.last_verified_at = now;
                t.is_active = true;
            })
            .or_insert(TrustState {
                user_id: user_id.to_string(),
                peer_user_id: peer_user_id.to_string(),
                level,
                established_at: now,
                last_verified_at: now,
                is_active: true,
            });
    }

    /// Invalidate trust for a peer — called when their identity key
    /// changes. Messaging to this peer must be blocked until the caller
    /// re-verifies.
    pub fn invalidate(&mut self, user_id: &str, peer_user_id: &str) {
        if let Some(state) = self
            .entries
            .get_mut(&(user_id.to_string(), peer_user_id.to_string()))
        {
            state.is_active = false;
        }
    }

    pub fn get(&self, user_id: &str, peer_user_id: &str) -> Option<&TrustState> {
        self.entries.get(&(user_id.to_string(), peer_user_id.to_string()))
    }

    pub fn is_verified_and_active(&self, user_id: &str, peer_user_id: &str) -> bool {
        matches!(
            self.get(user_id, peer_user_id),
            Some(t) if t.is_active && !matches!(t.level, TrustLevel::Unverified)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verifying_a_peer_marks_trust_active() {
        let mut table = TrustTable::new();
        table.set_verified("alice", "bob", TrustLevel::SafetyNumber);
        assert!(table.is_verified_and_active("alice", "bob"));
    }

    #[test]
    fn invalidate_blocks_messaging_without_deleting_history() {
        let mut table = TrustTable::new();
        table.set_verified("alice", "bob", TrustLevel::Qr);
        table.invalidate("alice", "bob");
        assert!(!table.is_verified_and_active("alice", "bob"));
        assert!(table.get("alice", "bob").is_some(), "history retained for UI re-verify prompt");
    }

    #[test]
    fn unverified_peer_is_never_considered_trusted() {
        let mut table = TrustTable::new();
        table.set_verified("alice", "bob", TrustLevel::Unverified);
        assert!(!table.is_verified_and_active("alice", "bob"));
    }
}
