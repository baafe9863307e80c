//! Diffie-Hellman key exchange and keypair generation (spec §4.A).

use p256::{PublicKey as P256PublicKey, SecretKey as P256SecretKey};
use rand::rngs::OsRng;
use x25519_dalek::{PublicKey as X25519Public, StaticSecret as X25519Secret};

use crate::error::CryptoError;
use crate::key::Algorithm;

/// Protocol tag for `generate_keypair` (spec §4.A).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeypairProtocol {
    X25519,
    Ed25519,
    EcdhP256,
}

/// Raw keypair bytes — (private, public). Callers wrap these into
/// `CryptoKey`s with the appropriate owner/ttl metadata.
pub struct RawKeypair {
    pub private: Vec<u8>,
    pub public: Vec<u8>,
    pub algorithm: Algorithm,
}

pub fn generate_keypair(protocol: KeypairProtocol) -> Result<RawKeypair, CryptoError> {
    match protocol {
        KeypairProtocol::X25519 => {
            let secret = X25519Secret::random_from_rng(OsRng);
            let public = X25519Public::from(&secret);
            Ok(RawKeypair {
                private: secret.to_bytes().to_vec(),
                public: public.as_bytes().to_vec(),
                algorithm: Algorithm::X25519,
            })
        }
        KeypairProtocol::Ed25519 => {
            let signing_key = ed25519_dalek::SigningKey::generate(&mut OsRng);
            Ok(RawKeypair {
                private: signing_key.to_bytes().to_vec(),
                public: signing_key.verifying_key().to_bytes().to_vec(),
                algorithm: Algorithm::Ed25519,
            })
        }
        KeypairProtocol::EcdhP256 => {
            let secret = P256SecretKey::random(&mut OsRng);
            let public = secret.public_key();
            Ok(RawKeypair {
                private: secret.to_bytes().to_vec(),
                public: public.to_sec1_bytes().to_vec(),
                algorithm: Algorithm::X25519, // placeholder tag until native P-256 support lands
            })
        }
    }
}

/// X25519 scalar multiplication. Fails if the result is the all-zero point
/// (a low-order point attack indicator), per spec §4.A.
pub fn dh(priv_bytes: &[u8; 32], pub_bytes: &[u8; 32]) -> Result<[u8; 32], CryptoError> {
    let secret = X25519Secret::from(*priv_bytes);
    let public = X25519Public::from(*pub_bytes);
    let shared = secret.diffie_hellman(&public);
    let out = *shared.as_bytes();
    if out == [0u8; 32] {
        return Err(CryptoError::DhLowOrderPoint);
    }
    Ok(out)
}
