//! Hashing (spec §4.A) — SHA-256, SHA-512, BLAKE2b for the general
//! `hash()` surface, plus BLAKE3 utilities carried from
//! `dl_crypto::hash` for message IDs and tamper-evident chain links (used
//! by `sonet-store` and message-layer callers, not mandated by spec §4.A
//! but needed to ground the hash-chain invariant referenced in spec §9's
//! design notes).

use blake2::Blake2b512;
use sha2::{Digest, Sha256, Sha512};

use crate::error::CryptoError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    Sha256,
    Sha512,
    Blake2b,
}

/// General-purpose hash (spec §4.A `hash(alg, data) -> digest`).
pub fn hash(alg: HashAlgorithm, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    Ok(match alg {
        HashAlgorithm::Sha256 => Sha256::digest(data).to_vec(),
        HashAlgorithm::Sha512 => Sha512::digest(data).to_vec(),
        HashAlgorithm::Blake2b => Blake2b512::digest(data).to_vec(),
    })
}

/// BLAKE3 of arbitrary bytes — used for fingerprints and content addressing.
pub fn blake3_hash(data: &[u8]) -> [u8; 32] {
    blake3::hash(data).into()
}

/// Keyed BLAKE3 hash for domain-separated MACs.
pub fn blake3_keyed_hash(key: &[u8; 32], data: &[u8]) -> [u8; 32] {
    blake3::keyed_hash(key, data).into()
}

/// Deterministic message ID derived from sender, recipient, timestamp and
/// plaintext — grounded on `dl_crypto::hash::message_id`.
pub fn message_id(sender_id: &str, recipient_id: &str, plaintext: &[u8], ts_nanos: i64) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"sonet-msg-id-v1\x00");
    hasher.update(sender_id.as_bytes());
    hasher.update(b"\x00");
    hasher.update(recipient_id.as_bytes());
    hasher.update(b"\x00");
    hasher.update(&ts_nanos.to_le_bytes());
    hasher.update(b"\x00");
    hasher.update(plaintext);
    hex::encode(hasher.finalize().as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_matches_known_length() {
        let digest = hash(HashAlgorithm::Sha256, b"hello").unwrap();
        assert_eq!(digest.len(), 32);
    }

    #[test]
    fn sha512_matches_known_length() {
        let digest = hash(HashAlgorithm::Sha512, b"hello").unwrap();
        assert_eq!(digest.len(), 64);
    }

    #[test]
    fn blake2b_matches_known_length() {
        let digest = hash(HashAlgorithm::Blake2b, b"hello").unwrap();
        assert_eq!(digest.len(), 64);
    }

    #[test]
    fn message_id_is_deterministic() {
        let a = message_id("alice", "bob", b"hi", 1000);
        let b = message_id("alice", "bob", b"hi", 1000);
        assert_eq!(a, b);
    }
}
