//! Bounded key cache (spec §4.A design points: "bounded LRU, default 1000
//! entries; on overflow, evict least-recently-inserted after zeroing
//! material").
//!
//! This module also carries the legacy "simple session key" path described
//! in `dl_crypto::session` (a bare AEAD key tied to `(chat_id, user_id)`,
//! predating the full Double Ratchet). Spec §9's first Open Question
//! resolves the ambiguity between that path and the Double Ratchet by
//! demoting the simple session key to an internal cache entry type that is
//! never exposed as a session-establishment mechanism — `sonet-session`
//! does not know this type exists.

use std::collections::{HashMap, VecDeque};

use zeroize::Zeroizing;

pub const DEFAULT_CACHE_CAPACITY: usize = 1000;

/// A bare symmetric key tied to `(chat_id, user_id)`, predating the
/// Double Ratchet. Kept only so the primitives engine's cache has
/// somewhere to put opportunistically-derived keys; not a supported
/// session-establishment path.
pub struct SimpleSessionKey {
    pub material: Zeroizing<[u8; 32]>,
}

impl SimpleSessionKey {
    pub fn new(material: [u8; 32]) -> Self {
        Self {
            material: Zeroizing::new(material),
        }
    }
}

/// FIFO-eviction bounded cache, keyed by an opaque string id (a
/// `CryptoKey::id`, or a `"{chat_id}:{user_id}"` composite for simple
/// session keys). Zeroizes evicted values by construction, since `V` is
/// required to own its zeroizing wrapper.
pub struct KeyCache<V> {
    capacity: usize,
    order: VecDeque<String>,
    entries: HashMap<String, V>,
}

impl<V> KeyCache<V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            entries: HashMap::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert `value` under `id`, evicting the least-recently-inserted
    /// entry if the cache is at capacity. Returns the evicted entry, if
    /// any, so the caller can observe it (e.g. emit a `tracing` event)
    /// before it drops and zeroizes.
    pub fn insert(&mut self, id: String, value: V) -> Option<V> {
        if self.entries.contains_key(&id) {
            // Re-inserting an existing id does not change its eviction
            // order — it is still "as old" as its original insertion.
            return self.entries.insert(id, value);
        }

        let evicted = if self.entries.len() >= self.capacity {
            self.order.pop_front().and_then(|oldest_id| self.entries.remove(&oldest_id))
        } else {
            None
        };

        self.order.push_back(id.clone());
        self.entries.insert(id, value);
        evicted
    }

    pub fn get(&self, id: &str) -> Option<&V> {
        self.entries.get(id)
    }

    pub fn remove(&mut self, id: &str) -> Option<V> {
        self.entries.remove(id)
    }
}

impl<V> Default for KeyCache<V> {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}
