//! `KeyLogEntry` — append-only transparency record (spec §3).
//!
//! Bounded to `MAX_LOG_ENTRIES`, with entries older than 30 days evicted
//! FIFO. Grounded on the append-only audit pattern in
//! `dl_crypto::identity::DeviceCert` (a cert proves provenance; the log
//! proves *when* a key changed and under what operation).

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

pub const MAX_LOG_ENTRIES: usize = 10_000;
pub const LOG_RETENTION: Duration = Duration::days(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyOperation {
    Register,
    RotateSpk,
    RotateOtk,
    Revoke,
    IdentityChanged,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyLogEntry {
    pub user_id: String,
    pub device_id: String,
    pub operation: KeyOperation,
    pub old_key_fingerprint: Option<String>,
    pub new_key_fingerprint: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub signature_hex: String,
    pub reason: Option<String>,
}

/// Append-only, bounded key-change log (spec §3 `KeyLogEntry` invariant).
#[derive(Default)]
pub struct KeyLog {
    entries: VecDeque<KeyLogEntry>,
}

impl KeyLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a new entry, evicting entries older than the retention
    /// window and, failing that, the oldest entry once `MAX_LOG_ENTRIES`
    /// is reached.
    pub fn append(&mut self, entry: KeyLogEntry) {
        self.evict_expired(entry.timestamp);
        if self.entries.len() >= MAX_LOG_ENTRIES {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    fn evict_expired(&mut self, now: DateTime<Utc>) {
        while let Some(front) = self.entries.front() {
            if now - front.timestamp > LOG_RETENTION {
                self.entries.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries_for(&self, user_id: &str, device_id: &str) -> Vec<&KeyLogEntry> {
        self.entries
            .iter()
            .filter(|e| e.user_id == user_id && e.device_id == device_id)
            .collect()
    }
}
