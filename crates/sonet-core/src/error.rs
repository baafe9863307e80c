use thiserror::Error;

/// Failure modes surfaced by the orchestration façade (spec §7). Wraps
/// every sub-crate's error type and adds the handful of faults that only
/// exist once sessions and groups are wired together under shared state.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("unknown session: {0}")]
    UnknownSession(String),

    #[error("session store is not configured for this engine")]
    PersistenceUnavailable,

    #[error(transparent)]
    Crypto(#[from] sonet_crypto::CryptoError),

    #[error(transparent)]
    Registry(#[from] sonet_registry::RegistryError),

    #[error(transparent)]
    Session(#[from] sonet_session::SessionError),

    #[error(transparent)]
    Group(#[from] sonet_group::GroupError),

    #[error(transparent)]
    Store(#[from] sonet_store::StoreError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
