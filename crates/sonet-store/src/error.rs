use thiserror::Error;

/// Failure modes of the session store (spec §4.F).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(String),

    #[error(transparent)]
    Crypto(#[from] sonet_crypto::CryptoError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("no session blob stored under id: {0}")]
    NotFound(String),

    #[error("blob for session {session_id} is corrupt: {reason}")]
    Corrupt { session_id: String, reason: String },
}
