use thiserror::Error;

/// Failure modes of the key registry (spec §4.B).
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("unknown device: {user_id}/{device_id}")]
    UnknownDevice { user_id: String, device_id: String },

    #[error("device already registered: {user_id}/{device_id}")]
    AlreadyRegistered { user_id: String, device_id: String },

    #[error("bundle signature verification failed")]
    InvalidSignature,

    #[error("one-time prekey pool exhausted for {user_id}/{device_id}")]
    OneTimePrekeysExhausted { user_id: String, device_id: String },

    #[error("identity key for {user_id}/{device_id} changed since it was last observed")]
    IdentityKeyChanged { user_id: String, device_id: String },

    #[error(transparent)]
    Crypto(#[from] sonet_crypto::CryptoError),

    #[error("serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),
}
