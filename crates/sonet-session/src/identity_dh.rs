//! Ed25519 identity key → X25519 conversion, used only at X3DH time to
//! let a long-term Ed25519 identity key participate in Diffie-Hellman.
//!
//! Grounded on `dl_crypto::x3dh::{ed25519_secret_to_x25519,
//! ed25519_pub_to_x25519}`.

use curve25519_dalek::edwards::CompressedEdwardsY;
use sha2::{Digest, Sha512};
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::Zeroize;

use crate::error::SessionError;

/// Convert an Ed25519 signing key's 32-byte seed into an X25519 static
/// secret via the same clamped SHA-512 expansion ed25519-dalek uses
/// internally.
pub fn ed25519_secret_to_x25519(ed_secret: &[u8; 32]) -> StaticSecret {
    let mut h = Sha512::digest(ed_secret);
    h[0] &= 248;
    h[31] &= 127;
    h[31] |= 64;
    let mut key = [0u8; 32];
    key.copy_from_slice(&h[..32]);
    h.as_mut_slice().zeroize();
    StaticSecret::from(key)
}

/// Convert an Ed25519 verifying key to its birationally-equivalent X25519
/// public key.
pub fn ed25519_pub_to_x25519(ed_pub: &[u8; 32]) -> Result<X25519Public, SessionError> {
    let compressed = CompressedEdwardsY::from_slice(ed_pub)
        .map_err(|_| SessionError::InvalidHeader("invalid Ed25519 public key".into()))?;
    let point = compressed
        .decompress()
        .ok_or_else(|| SessionError::InvalidHeader("Ed25519 public key decompression failed".into()))?;
    Ok(X25519Public::from(point.to_montgomery().to_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;

    #[test]
    fn conversion_is_consistent_between_secret_and_public() {
        let signing_key = SigningKey::generate(&mut OsRng);
        let ed_secret = signing_key.to_bytes();
        let ed_pub = signing_key.verifying_key().to_bytes();

        let x_secret = ed25519_secret_to_x25519(&ed_secret);
        let x_pub_from_secret = X25519Public::from(&x_secret);
        let x_pub_from_conversion = ed25519_pub_to_x25519(&ed_pub).unwrap();

        assert_eq!(x_pub_from_secret.as_bytes(), x_pub_from_conversion.as_bytes());
    }
}
