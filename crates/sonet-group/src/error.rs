use thiserror::Error;

/// Failure modes of the group manager (spec §4.E).
#[derive(Debug, Error)]
pub enum GroupError {
    #[error("unknown group: {0}")]
    UnknownGroup(String),

    #[error("group {group_id} has no record of epoch {epoch_number}")]
    UnknownEpoch { group_id: String, epoch_number: u64 },

    #[error("epoch {epoch_number} for group {group_id} is older than the retention window")]
    EpochTooOld { group_id: String, epoch_number: u64 },

    #[error("{user_id} is not a current member of group {group_id}")]
    NotAMember { group_id: String, user_id: String },

    #[error("group {group_id} already has the maximum {max_members} members")]
    MembershipLimitExceeded { group_id: String, max_members: u32 },

    #[error("{user_id} is not permitted to invite members to group {group_id} (admin_only_invite is set)")]
    InviteNotPermitted { group_id: String, user_id: String },

    #[error("AEAD authentication failed — possible tampering")]
    AuthenticationFailed,

    #[error(transparent)]
    Crypto(#[from] sonet_crypto::CryptoError),

    #[error(transparent)]
    Session(#[from] sonet_session::SessionError),
}
