//! Key derivation (spec §4.A `hkdf`).
//!
//! `hkdf()` is HKDF-SHA256. When `salt` is empty, a deterministic salt
//! derived from `SHA256(info || ikm)` is substituted — this avoids the
//! uninitialized-salt footgun the spec calls out explicitly, rather than
//! silently falling back to an all-zero salt.

use hkdf::Hkdf;
use sha2::{Digest, Sha256};

use crate::error::CryptoError;

/// HKDF-SHA256 expand into `output.len()` bytes. Missing salt is replaced
/// by `SHA256(info || ikm)` rather than an implicit zero salt.
pub fn hkdf(ikm: &[u8], salt: &[u8], info: &[u8], output: &mut [u8]) -> Result<(), CryptoError> {
    let owned_salt;
    let salt = if salt.is_empty() {
        let mut hasher = Sha256::new();
        hasher.update(info);
        hasher.update(ikm);
        owned_salt = hasher.finalize().to_vec();
        owned_salt.as_slice()
    } else {
        salt
    };

    let hk = Hkdf::<Sha256>::new(Some(salt), ikm);
    hk.expand(info, output)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))
}

/// Convenience wrapper returning a fixed 32-byte key.
pub fn hkdf32(ikm: &[u8], salt: &[u8], info: &[u8]) -> Result<[u8; 32], CryptoError> {
    let mut out = [0u8; 32];
    hkdf(ikm, salt, info, &mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hkdf_with_explicit_salt_is_deterministic() {
        let a = hkdf32(b"ikm", b"salt", b"info").unwrap();
        let b = hkdf32(b"ikm", b"salt", b"info").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn empty_salt_substitutes_deterministic_salt_not_zero() {
        let with_empty_salt = hkdf32(b"ikm", b"", b"info").unwrap();

        // Manually compute what a zero-salt HKDF would produce, to prove
        // the two differ (i.e. we did not silently fall back to a zero salt).
        let mut zero_salt_out = [0u8; 32];
        let hk = Hkdf::<Sha256>::new(Some(&[0u8; 32]), b"ikm");
        hk.expand(b"info", &mut zero_salt_out).unwrap();

        assert_ne!(with_empty_salt, zero_salt_out);
    }
}
