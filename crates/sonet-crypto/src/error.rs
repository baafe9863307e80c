use thiserror::Error;

/// Failure modes of the primitives engine (spec §4.A).
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("invalid key length: expected {expected}, got {got}")]
    InvalidKeyLength { expected: usize, got: usize },

    #[error("key expired at {0}")]
    ExpiredKey(chrono::DateTime<chrono::Utc>),

    #[error("AEAD authentication failed — possible tampering")]
    AuthenticationFailed,

    #[error("invalid nonce length: expected {expected}, got {got}")]
    InvalidNonceLength { expected: usize, got: usize },

    #[error("random source failure: {0}")]
    RandomSourceFailure(String),

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("signature verification failed")]
    SignatureVerification,

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("diffie-hellman produced the all-zero point (low-order point attack?)")]
    DhLowOrderPoint,

    #[error("hex decode error: {0}")]
    HexDecode(#[from] hex::FromHexError),

    #[error("serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),
}
