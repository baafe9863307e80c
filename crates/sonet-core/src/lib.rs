//! sonet-core — Sonet end-to-end encryption core, orchestration façade
//! (spec §2).
//!
//! Wires the primitives engine (`sonet-crypto`), key registry
//! (`sonet-registry`), pairwise session establishment and transport
//! (`sonet-session`), group manager (`sonet-group`) and encrypted
//! persistence (`sonet-store`) behind one `SonetEngine` surface, enforcing
//! the lock acquisition order spec §5 requires across all of them.

pub mod config;
pub mod error;
pub mod manager;

pub use config::SonetConfig;
pub use error::CoreError;
pub use manager::{SessionInit, SonetEngine};
