//! sonet-group — Sonet end-to-end encryption core, group manager with
//! epoch rekeying (spec §4.E).
//!
//! Builds on `sonet-crypto` for AEAD and signing and `sonet-session` only
//! for its error type (actual epoch-key distribution travels over
//! `sonet-session::RatchetState` sessions maintained by the caller, one
//! per member — this crate owns roster/epoch bookkeeping and group
//! message AEAD, not pairwise transport).

pub mod epoch;
pub mod error;
pub mod header;
pub mod manager;
pub mod roster;

pub use epoch::{EpochKey, EpochKeyRing, DEFAULT_RETENTION};
pub use error::GroupError;
pub use header::{GroupHeader, HEADER_LEN};
pub use manager::{EpochDistribution, GroupManager};
pub use roster::{GroupMember, GroupPolicies, GroupRole, GroupRoster, HistoryVisibility};
