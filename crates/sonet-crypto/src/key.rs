//! `CryptoKey` — the opaque key type shared by every component (spec §3).
//!
//! Material is never copied into logs, serialized forms, or long-lived
//! caches past `expires_at`; it is wiped on drop via `zeroize`.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

/// Algorithm tag for a `CryptoKey`'s material (spec §4.A).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    X25519,
    Ed25519,
    Aes256Gcm,
    ChaCha20Poly1305,
    HkdfIkm,
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Algorithm::X25519 => "X25519",
            Algorithm::Ed25519 => "Ed25519",
            Algorithm::Aes256Gcm => "AES-256-GCM",
            Algorithm::ChaCha20Poly1305 => "ChaCha20-Poly1305",
            Algorithm::HkdfIkm => "HKDF-IKM",
        };
        f.write_str(s)
    }
}

/// An opaque key. `material` is wiped on drop; it is never `Debug`-printed
/// or serialized — callers that need to persist a key must explicitly
/// export its bytes via [`CryptoKey::expose_material`].
pub struct CryptoKey {
    pub id: String,
    pub algorithm: Algorithm,
    material: Zeroizing<Vec<u8>>,
    pub owner_user: String,
    pub owner_device: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub is_ephemeral: bool,
}

impl fmt::Debug for CryptoKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CryptoKey")
            .field("id", &self.id)
            .field("algorithm", &self.algorithm)
            .field("owner_user", &self.owner_user)
            .field("owner_device", &self.owner_device)
            .field("is_ephemeral", &self.is_ephemeral)
            .field("material", &"<redacted>")
            .finish()
    }
}

/// 128-bit random hex identifier, matching the `CryptoKey::id` invariant.
pub fn random_key_id() -> String {
    let mut buf = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut buf);
    hex::encode(buf)
}

impl CryptoKey {
    pub fn new(
        algorithm: Algorithm,
        material: Vec<u8>,
        owner_user: impl Into<String>,
        owner_device: impl Into<String>,
        ttl: Duration,
        is_ephemeral: bool,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: random_key_id(),
            algorithm,
            material: Zeroizing::new(material),
            owner_user: owner_user.into(),
            owner_device: owner_device.into(),
            created_at: now,
            expires_at: now + ttl,
            is_ephemeral,
        }
    }

    pub fn material(&self) -> &[u8] {
        &self.material
    }

    /// Explicit, named accessor for exporting key bytes (e.g. to hand to an
    /// AEAD cipher). Never call this to build a log line.
    pub fn expose_material(&self) -> &[u8] {
        &self.material
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    /// Hash of the public material — safe to log, publish, and compare
    /// out-of-band (spec §4.A `fingerprint`).
    ///
    /// Format matches the upstream safety-number display: BLAKE3 truncated
    /// to 20 bytes, hex-encoded in groups of 4.
    pub fn fingerprint(&self) -> String {
        fingerprint_bytes(&self.material)
    }

    /// Numeric fingerprint (12 groups of 5 digits) for QR / safety-number
    /// display, matching Signal's format.
    pub fn numeric_fingerprint(&self) -> String {
        numeric_fingerprint_bytes(&self.material)
    }
}

impl Clone for CryptoKey {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            algorithm: self.algorithm,
            material: self.material.clone(),
            owner_user: self.owner_user.clone(),
            owner_device: self.owner_device.clone(),
            created_at: self.created_at,
            expires_at: self.expires_at,
            is_ephemeral: self.is_ephemeral,
        }
    }
}

pub fn fingerprint_bytes(data: &[u8]) -> String {
    let hash = blake3::hash(data);
    let hex = hex::encode(&hash.as_bytes()[..20]);
    hex.chars()
        .collect::<Vec<_>>()
        .chunks(4)
        .map(|c| c.iter().collect::<String>())
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn numeric_fingerprint_bytes(data: &[u8]) -> String {
    let hash = blake3::hash(data);
    let bytes = hash.as_bytes();
    let mut groups = Vec::with_capacity(12);
    for i in 0..12 {
        let offset = i * 5 / 2;
        let val = if i % 2 == 0 {
            ((bytes[offset] as u32) << 12)
                | ((bytes[offset + 1] as u32) << 4)
                | ((bytes[offset + 2] as u32) >> 4)
        } else {
            (((bytes[offset] & 0x0F) as u32) << 16)
                | ((bytes[offset + 1] as u32) << 8)
                | (bytes[offset + 2] as u32)
        };
        groups.push(format!("{:05}", val % 100_000));
    }
    groups.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_is_based_on_ttl() {
        let k = CryptoKey::new(
            Algorithm::Aes256Gcm,
            vec![0u8; 32],
            "alice",
            "device-1",
            Duration::seconds(-1),
            true,
        );
        assert!(k.is_expired());
    }

    #[test]
    fn debug_never_prints_material() {
        let k = CryptoKey::new(
            Algorithm::Aes256Gcm,
            vec![0xAAu8; 32],
            "alice",
            "device-1",
            Duration::hours(1),
            false,
        );
        let dump = format!("{:?}", k);
        assert!(!dump.contains("aaaa"));
        assert!(dump.contains("redacted"));
    }

    #[test]
    fn fingerprint_is_stable_and_order_sensitive() {
        let a = fingerprint_bytes(b"key-material-a");
        let b = fingerprint_bytes(b"key-material-a");
        let c = fingerprint_bytes(b"key-material-b");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
