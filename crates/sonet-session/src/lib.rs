//! sonet-session — Sonet end-to-end encryption core, pairwise session
//! establishment and transport (spec §4.C, §4.D).
//!
//! `x3dh` derives the initial shared secret between two devices from a
//! key bundle fetched out of `sonet-registry`; `ratchet` then carries that
//! secret forward as a Double Ratchet session, producing a fresh message
//! key per call to `encrypt`/`decrypt`. Depends on `sonet-crypto` for all
//! cryptographic primitives and `sonet-registry` for bundle verification.

pub mod error;
pub mod header;
pub mod identity_dh;
pub mod ratchet;
pub mod x3dh;

pub use error::SessionError;
pub use header::{RatchetHeader, HEADER_LEN};
pub use ratchet::{
    RatchetMessage, RatchetPhase, RatchetSnapshot, RatchetState, MAX_PER_CHAIN, MAX_SKIPPED, REKEY_INTERVAL_HOURS,
};
pub use x3dh::{initiate, respond, X3DHResult};
