use thiserror::Error;

/// Failure modes of X3DH initiation and the Double Ratchet (spec §4.C,
/// §4.D, §7).
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("peer bundle signature verification failed")]
    InvalidSignature,

    #[error("session is expired")]
    SessionExpired,

    #[error("session is marked compromised; a fresh X3DH is required")]
    Compromised,

    #[error("AEAD authentication failed — possible tampering")]
    AuthenticationFailed,

    #[error("no skipped key found for (dh_pub={dh_pub}, n={n})")]
    SkippedKeyMissing { dh_pub: String, n: u32 },

    #[error("skip budget exceeded: {requested} skipped keys requested, limit is {limit}")]
    SkippedKeyBudgetExceeded { requested: u32, limit: usize },

    #[error("invalid ratchet header: {0}")]
    InvalidHeader(String),

    #[error("message (dh_pub={dh_pub}, n={n}) already delivered")]
    ReplayDetected { dh_pub: String, n: u32 },

    #[error(transparent)]
    Crypto(#[from] sonet_crypto::CryptoError),

    #[error(transparent)]
    Registry(#[from] sonet_registry::RegistryError),

    #[error("serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),
}
