//! Signing and verification (spec §4.A). Ed25519 is the only supported
//! signature scheme — preferred per spec, and the only one the key
//! registry and X3DH bundle-signing paths need.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};

use crate::error::CryptoError;

pub fn sign(priv_bytes: &[u8; 32], message: &[u8]) -> Vec<u8> {
    let signing_key = SigningKey::from_bytes(priv_bytes);
    signing_key.sign(message).to_bytes().to_vec()
}

pub fn verify(pub_bytes: &[u8; 32], message: &[u8], signature: &[u8]) -> Result<bool, CryptoError> {
    let verifying_key =
        VerifyingKey::from_bytes(pub_bytes).map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    let sig_bytes: [u8; 64] = signature
        .try_into()
        .map_err(|_| CryptoError::InvalidKey("signature must be 64 bytes".into()))?;
    let sig = Signature::from_bytes(&sig_bytes);
    Ok(verifying_key.verify(message, &sig).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dh::{generate_keypair, KeypairProtocol};

    #[test]
    fn sign_and_verify_roundtrip() {
        let kp = generate_keypair(KeypairProtocol::Ed25519).unwrap();
        let priv_bytes: [u8; 32] = kp.private.try_into().unwrap();
        let pub_bytes: [u8; 32] = kp.public.try_into().unwrap();

        let sig = sign(&priv_bytes, b"hello");
        assert!(verify(&pub_bytes, b"hello", &sig).unwrap());
    }

    #[test]
    fn tampered_message_fails_verify() {
        let kp = generate_keypair(KeypairProtocol::Ed25519).unwrap();
        let priv_bytes: [u8; 32] = kp.private.try_into().unwrap();
        let pub_bytes: [u8; 32] = kp.public.try_into().unwrap();

        let sig = sign(&priv_bytes, b"hello");
        assert!(!verify(&pub_bytes, b"goodbye", &sig).unwrap());
    }

    #[test]
    fn tampered_signature_fails_verify() {
        let kp = generate_keypair(KeypairProtocol::Ed25519).unwrap();
        let priv_bytes: [u8; 32] = kp.private.try_into().unwrap();
        let pub_bytes: [u8; 32] = kp.public.try_into().unwrap();

        let mut sig = sign(&priv_bytes, b"hello");
        sig[0] ^= 0xFF;
        assert!(!verify(&pub_bytes, b"hello", &sig).unwrap());
    }
}
