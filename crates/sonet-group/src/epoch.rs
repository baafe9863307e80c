//! Per-epoch symmetric key material and the bounded ring that retains it.
//!
//! Grounded on `dl_crypto::identity`'s key-material wrapper idiom (opaque,
//! zeroize-on-drop) and `sonet-crypto::cache::KeyCache`'s bounded-FIFO
//! eviction pattern — an epoch ring is conceptually identical to the
//! skipped-message-key cache in `sonet-session::ratchet`, just keyed by
//! epoch number instead of `(dh_pub, n)`.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use zeroize::Zeroizing;

/// Default number of past epochs a participant keeps around (spec §4.E,
/// §6 `EPOCH_KEY_RETENTION_COUNT`) — enough to decrypt messages that were
/// in flight across a membership change, not enough to read history from
/// before a participant joined.
pub const DEFAULT_RETENTION: usize = 10;

/// Symmetric key for one group epoch.
pub struct EpochKey {
    pub epoch: u64,
    material: Zeroizing<[u8; 32]>,
    pub created_at: DateTime<Utc>,
}

impl EpochKey {
    pub fn new(epoch: u64, material: [u8; 32]) -> Self {
        Self { epoch, material: Zeroizing::new(material), created_at: Utc::now() }
    }

    pub fn material(&self) -> &[u8; 32] {
        &self.material
    }
}

/// Bounded, epoch-ordered ring of keys for one group, local to a single
/// participant. Membership changes this participant wasn't notified of
/// (e.g. their own removal) simply never add an entry here — decrypting a
/// message from a later epoch then fails with `UnknownEpoch` rather than
/// requiring an explicit exclusion check.
pub struct EpochKeyRing {
    retention: usize,
    keys: VecDeque<EpochKey>,
}

impl EpochKeyRing {
    pub fn new(retention: usize) -> Self {
        Self { retention, keys: VecDeque::with_capacity(retention) }
    }

    pub fn current_epoch(&self) -> Option<u64> {
        self.keys.back().map(|k| k.epoch)
    }

    pub fn get(&self, epoch: u64) -> Option<&EpochKey> {
        self.keys.iter().find(|k| k.epoch == epoch)
    }

    /// Insert a new epoch key, evicting the oldest if the ring is full.
    /// Epochs must arrive in increasing order; an out-of-order or
    /// duplicate insert is a caller bug and is silently ignored rather
    /// than panicking, since a retried key-distribution message is benign.
    pub fn insert(&mut self, key: EpochKey) {
        if self.keys.iter().any(|k| k.epoch == key.epoch) {
            return;
        }
        if let Some(newest) = self.current_epoch() {
            if key.epoch <= newest {
                tracing::trace!(epoch = key.epoch, newest, "ignoring stale epoch key insert");
                return;
            }
        }
        if self.keys.len() == self.retention {
            let evicted = self.keys.pop_front();
            if let Some(evicted) = evicted {
                tracing::trace!(epoch = evicted.epoch, "epoch key retention window exceeded; oldest evicted");
            }
        }
        self.keys.push_back(key);
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
