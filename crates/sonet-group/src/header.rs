//! Group message header — wire format (spec §6):
//!
//! ```text
//!  0         16        20                32
//!  +---------+---------+-----------------+
//!  |group_id |  epoch  |      nonce       |
//!  +---------+---------+-----------------+
//! ```
//!
//! 16 bytes `group_id`, 4 bytes `epoch_number` (u32 BE), 12 bytes AEAD
//! nonce, followed by ciphertext and a trailing 16-byte tag (spec §6).
//! `group_id` here is a fixed-size fingerprint of the manager's own
//! string group id (BLAKE3, truncated), not the id itself — mirroring
//! `sonet_crypto::key::fingerprint_bytes`'s truncate-a-hash idiom, since
//! `sonet-group::manager` keys groups by an arbitrary caller-chosen
//! string rather than a 16-byte identifier.

use crate::error::GroupError;

pub const HEADER_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupHeader {
    pub group_id_fingerprint: [u8; 16],
    pub epoch_number: u32,
    pub nonce: [u8; 12],
}

impl GroupHeader {
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[..16].copy_from_slice(&self.group_id_fingerprint);
        buf[16..20].copy_from_slice(&self.epoch_number.to_be_bytes());
        buf[20..32].copy_from_slice(&self.nonce);
        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, GroupError> {
        if bytes.len() != HEADER_LEN {
            return Err(GroupError::AuthenticationFailed);
        }
        let mut group_id_fingerprint = [0u8; 16];
        group_id_fingerprint.copy_from_slice(&bytes[..16]);
        let epoch_number = u32::from_be_bytes(bytes[16..20].try_into().unwrap());
        let mut nonce = [0u8; 12];
        nonce.copy_from_slice(&bytes[20..32]);
        Ok(Self { group_id_fingerprint, epoch_number, nonce })
    }
}

/// Derive the wire-format 16-byte group identifier from the manager's
/// own string `group_id`.
pub fn group_id_fingerprint(group_id: &str) -> [u8; 16] {
    let hash = blake3::hash(group_id.as_bytes());
    let mut out = [0u8; 16];
    out.copy_from_slice(&hash.as_bytes()[..16]);
    out
}
