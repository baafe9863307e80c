//! Authenticated Encryption with Associated Data (spec §4.A).
//!
//! AES-256-GCM and ChaCha20-Poly1305 are the mandatory algorithms; nonces
//! are 12 bytes for both, 24 bytes for XChaCha20-Poly1305. Tags are always
//! 16 bytes. Nonces are never derived from the key or reused — callers pass
//! a freshly generated nonce per call (reuse under the same key is a
//! defined fault, per the design points in spec §4.A).
//!
//! AES-256-CBC is carried only for legacy decryption of pre-existing
//! ciphertext; it is never used for new encryptions and has no tag (it
//! relies on the caller's own MAC, historically absent — hence "not
//! secure").

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, KeyIvInit};
use aes_gcm::{aead::Aead as GcmAeadTrait, Aes256Gcm, KeyInit as _, Nonce as GcmNonce};
use chacha20poly1305::{
    aead::Aead as ChaChaAeadTrait, ChaCha20Poly1305, KeyInit as _, Nonce as ChaChaNonce,
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;

use crate::error::CryptoError;

pub const TAG_LEN: usize = 16;

/// AEAD algorithm tag (spec §4.A).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AeadAlgorithm {
    Aes256Gcm,
    ChaCha20Poly1305,
    XChaCha20Poly1305,
    /// Legacy, decrypt-only. Flagged "not secure" per spec §4.A.
    Aes256CbcLegacy,
}

impl AeadAlgorithm {
    pub fn nonce_len(self) -> usize {
        match self {
            AeadAlgorithm::Aes256Gcm | AeadAlgorithm::ChaCha20Poly1305 => 12,
            AeadAlgorithm::XChaCha20Poly1305 => 24,
            AeadAlgorithm::Aes256CbcLegacy => 16, // IV, not a nonce in the AEAD sense
        }
    }
}

/// Generate a fresh nonce of the correct length for `alg`. Must be called
/// per encryption — never cache or derive a nonce from key material.
pub fn fresh_nonce(alg: AeadAlgorithm) -> Result<Vec<u8>, CryptoError> {
    if alg == AeadAlgorithm::Aes256CbcLegacy {
        return Err(CryptoError::UnsupportedAlgorithm(
            "AES-256-CBC is decrypt-only (legacy)".into(),
        ));
    }
    let mut nonce = vec![0u8; alg.nonce_len()];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    Ok(nonce)
}

/// Encrypt `plaintext`, returning `(ciphertext, tag)` separately, per
/// spec §4.A's `aead_encrypt` signature.
pub fn aead_encrypt(
    alg: AeadAlgorithm,
    key: &[u8],
    nonce: &[u8],
    aad: &[u8],
    plaintext: &[u8],
) -> Result<(Vec<u8>, [u8; TAG_LEN]), CryptoError> {
    if key.len() != 32 {
        return Err(CryptoError::InvalidKeyLength {
            expected: 32,
            got: key.len(),
        });
    }
    if nonce.len() != alg.nonce_len() {
        return Err(CryptoError::InvalidNonceLength {
            expected: alg.nonce_len(),
            got: nonce.len(),
        });
    }

    let mut combined = match alg {
        AeadAlgorithm::Aes256Gcm => {
            let cipher = Aes256Gcm::new_from_slice(key)
                .map_err(|_| CryptoError::InvalidKeyLength { expected: 32, got: key.len() })?;
            cipher
                .encrypt(
                    GcmNonce::from_slice(nonce),
                    aes_gcm::aead::Payload { msg: plaintext, aad },
                )
                .map_err(|_| CryptoError::AuthenticationFailed)?
        }
        AeadAlgorithm::ChaCha20Poly1305 => {
            let cipher = ChaCha20Poly1305::new_from_slice(key)
                .map_err(|_| CryptoError::InvalidKeyLength { expected: 32, got: key.len() })?;
            cipher
                .encrypt(
                    ChaChaNonce::from_slice(nonce),
                    chacha20poly1305::aead::Payload { msg: plaintext, aad },
                )
                .map_err(|_| CryptoError::AuthenticationFailed)?
        }
        AeadAlgorithm::XChaCha20Poly1305 => {
            let cipher = XChaCha20Poly1305::new_from_slice(key)
                .map_err(|_| CryptoError::InvalidKeyLength { expected: 32, got: key.len() })?;
            cipher
                .encrypt(
                    XNonce::from_slice(nonce),
                    chacha20poly1305::aead::Payload { msg: plaintext, aad },
                )
                .map_err(|_| CryptoError::AuthenticationFailed)?
        }
        AeadAlgorithm::Aes256CbcLegacy => {
            return Err(CryptoError::UnsupportedAlgorithm(
                "AES-256-CBC is decrypt-only (legacy)".into(),
            ))
        }
    };

    // RustCrypto AEAD implementations append the tag to the ciphertext.
    let tag_start = combined.len() - TAG_LEN;
    let tag_bytes = combined.split_off(tag_start);
    let mut tag = [0u8; TAG_LEN];
    tag.copy_from_slice(&tag_bytes);
    Ok((combined, tag))
}

/// Decrypt `(ciphertext, tag)`. Never returns partial plaintext on
/// authentication failure (spec §4.A).
pub fn aead_decrypt(
    alg: AeadAlgorithm,
    key: &[u8],
    nonce: &[u8],
    aad: &[u8],
    ciphertext: &[u8],
    tag: &[u8; TAG_LEN],
) -> Result<Vec<u8>, CryptoError> {
    if alg == AeadAlgorithm::Aes256CbcLegacy {
        return legacy_cbc_decrypt(key, nonce, ciphertext);
    }

    if key.len() != 32 {
        return Err(CryptoError::InvalidKeyLength {
            expected: 32,
            got: key.len(),
        });
    }
    if nonce.len() != alg.nonce_len() {
        return Err(CryptoError::InvalidNonceLength {
            expected: alg.nonce_len(),
            got: nonce.len(),
        });
    }

    let mut combined = Vec::with_capacity(ciphertext.len() + TAG_LEN);
    combined.extend_from_slice(ciphertext);
    combined.extend_from_slice(tag);

    let plaintext = match alg {
        AeadAlgorithm::Aes256Gcm => {
            let cipher = Aes256Gcm::new_from_slice(key)
                .map_err(|_| CryptoError::InvalidKeyLength { expected: 32, got: key.len() })?;
            cipher
                .decrypt(
                    GcmNonce::from_slice(nonce),
                    aes_gcm::aead::Payload { msg: &combined, aad },
                )
                .map_err(|_| CryptoError::AuthenticationFailed)?
        }
        AeadAlgorithm::ChaCha20Poly1305 => {
            let cipher = ChaCha20Poly1305::new_from_slice(key)
                .map_err(|_| CryptoError::InvalidKeyLength { expected: 32, got: key.len() })?;
            cipher
                .decrypt(
                    ChaChaNonce::from_slice(nonce),
                    chacha20poly1305::aead::Payload { msg: &combined, aad },
                )
                .map_err(|_| CryptoError::AuthenticationFailed)?
        }
        AeadAlgorithm::XChaCha20Poly1305 => {
            let cipher = XChaCha20Poly1305::new_from_slice(key)
                .map_err(|_| CryptoError::InvalidKeyLength { expected: 32, got: key.len() })?;
            cipher
                .decrypt(
                    XNonce::from_slice(nonce),
                    chacha20poly1305::aead::Payload { msg: &combined, aad },
                )
                .map_err(|_| CryptoError::AuthenticationFailed)?
        }
        AeadAlgorithm::Aes256CbcLegacy => unreachable!("handled above"),
    };

    Ok(plaintext)
}

/// AES-256-CBC + PKCS7, with `nonce` reused as the IV. No authentication —
/// callers decrypting legacy ciphertext are expected to have verified
/// integrity out of band (e.g. an envelope-level signature). Never call
/// this for anything other than reading pre-existing legacy data.
fn legacy_cbc_decrypt(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if key.len() != 32 {
        return Err(CryptoError::InvalidKeyLength {
            expected: 32,
            got: key.len(),
        });
    }
    if iv.len() != 16 {
        return Err(CryptoError::InvalidNonceLength {
            expected: 16,
            got: iv.len(),
        });
    }
    type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
    let mut buf = ciphertext.to_vec();
    let decryptor = Aes256CbcDec::new_from_slices(key, iv)
        .map_err(|_| CryptoError::InvalidKey("bad AES-256-CBC key/iv".into()))?;
    let plaintext_len = decryptor
        .decrypt_padded_mut::<Pkcs7>(&mut buf)
        .map_err(|_| CryptoError::AuthenticationFailed)?
        .len();
    buf.truncate(plaintext_len);
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gcm_roundtrip() {
        let key = [7u8; 32];
        let nonce = fresh_nonce(AeadAlgorithm::Aes256Gcm).unwrap();
        let aad = b"header";
        let (ct, tag) =
            aead_encrypt(AeadAlgorithm::Aes256Gcm, &key, &nonce, aad, b"hello world").unwrap();
        let pt = aead_decrypt(AeadAlgorithm::Aes256Gcm, &key, &nonce, aad, &ct, &tag).unwrap();
        assert_eq!(pt, b"hello world");
    }

    #[test]
    fn chacha_roundtrip() {
        let key = [9u8; 32];
        let nonce = fresh_nonce(AeadAlgorithm::ChaCha20Poly1305).unwrap();
        let aad = b"";
        let (ct, tag) =
            aead_encrypt(AeadAlgorithm::ChaCha20Poly1305, &key, &nonce, aad, b"msg").unwrap();
        let pt = aead_decrypt(AeadAlgorithm::ChaCha20Poly1305, &key, &nonce, aad, &ct, &tag)
            .unwrap();
        assert_eq!(pt, b"msg");
    }

    #[test]
    fn xchacha_roundtrip() {
        let key = [3u8; 32];
        let nonce = fresh_nonce(AeadAlgorithm::XChaCha20Poly1305).unwrap();
        let (ct, tag) = aead_encrypt(
            AeadAlgorithm::XChaCha20Poly1305,
            &key,
            &nonce,
            b"aad",
            b"xchacha payload",
        )
        .unwrap();
        let pt =
            aead_decrypt(AeadAlgorithm::XChaCha20Poly1305, &key, &nonce, b"aad", &ct, &tag)
                .unwrap();
        assert_eq!(pt, b"xchacha payload");
    }

    #[test]
    fn bit_flip_in_ciphertext_fails_auth() {
        let key = [1u8; 32];
        let nonce = fresh_nonce(AeadAlgorithm::Aes256Gcm).unwrap();
        let (mut ct, tag) =
            aead_encrypt(AeadAlgorithm::Aes256Gcm, &key, &nonce, b"aad", b"payload").unwrap();
        ct[0] ^= 0x01;
        let result = aead_decrypt(AeadAlgorithm::Aes256Gcm, &key, &nonce, b"aad", &ct, &tag);
        assert!(matches!(result, Err(CryptoError::AuthenticationFailed)));
    }

    #[test]
    fn bit_flip_in_tag_fails_auth() {
        let key = [1u8; 32];
        let nonce = fresh_nonce(AeadAlgorithm::Aes256Gcm).unwrap();
        let (ct, mut tag) =
            aead_encrypt(AeadAlgorithm::Aes256Gcm, &key, &nonce, b"aad", b"payload").unwrap();
        tag[0] ^= 0x01;
        let result = aead_decrypt(AeadAlgorithm::Aes256Gcm, &key, &nonce, b"aad", &ct, &tag);
        assert!(matches!(result, Err(CryptoError::AuthenticationFailed)));
    }

    #[test]
    fn bit_flip_in_aad_fails_auth() {
        let key = [1u8; 32];
        let nonce = fresh_nonce(AeadAlgorithm::Aes256Gcm).unwrap();
        let (ct, tag) =
            aead_encrypt(AeadAlgorithm::Aes256Gcm, &key, &nonce, b"aad", b"payload").unwrap();
        let result = aead_decrypt(AeadAlgorithm::Aes256Gcm, &key, &nonce, b"different", &ct, &tag);
        assert!(matches!(result, Err(CryptoError::AuthenticationFailed)));
    }

    #[test]
    fn bit_flip_in_nonce_fails_auth() {
        let key = [1u8; 32];
        let nonce = fresh_nonce(AeadAlgorithm::Aes256Gcm).unwrap();
        let (ct, tag) =
            aead_encrypt(AeadAlgorithm::Aes256Gcm, &key, &nonce, b"aad", b"payload").unwrap();
        let mut bad_nonce = nonce.clone();
        bad_nonce[0] ^= 0x01;
        let result = aead_decrypt(AeadAlgorithm::Aes256Gcm, &key, &bad_nonce, b"aad", &ct, &tag);
        assert!(matches!(result, Err(CryptoError::AuthenticationFailed)));
    }

    #[test]
    fn legacy_cbc_decrypts_without_auth() {
        use aes::cipher::{BlockEncryptMut, KeyIvInit};
        let key = [5u8; 32];
        let iv = [6u8; 16];
        type Enc = cbc::Encryptor<aes::Aes256>;
        let plaintext = b"legacy payload!!".to_vec(); // 16 bytes, one block
        let mut buf = plaintext.clone();
        buf.resize(32, 0); // room for PKCS7 padding block
        let ct_len = Enc::new_from_slices(&key, &iv)
            .unwrap()
            .encrypt_padded_mut::<aes::cipher::block_padding::Pkcs7>(&mut buf, plaintext.len())
            .unwrap()
            .len();
        buf.truncate(ct_len);

        let pt = legacy_cbc_decrypt(&key, &iv, &buf).unwrap();
        assert_eq!(pt, plaintext);
    }
}
