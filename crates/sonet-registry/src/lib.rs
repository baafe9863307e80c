//! sonet-registry — Sonet end-to-end encryption core, key bundle /
//! prekey registry (spec §4.B).
//!
//! Publishes signed `KeyBundle`s for asynchronous session establishment,
//! rotates signed and one-time prekeys, and keeps the append-only
//! key-change log (`KeyLogEntry`) and pairwise trust table
//! (`TrustState`). Depends on `sonet-crypto` for all cryptographic
//! operations; used in turn by `sonet-session` to fetch bundles at X3DH
//! time.

pub mod bundle;
pub mod error;
pub mod log;
pub mod registry;
pub mod trust;

pub use bundle::{DeviceState, KeyBundle, OneTimePrekeyPublic};
pub use error::RegistryError;
pub use log::{KeyLog, KeyLogEntry, KeyOperation};
pub use registry::{Registry, RegistryConfig};
pub use trust::{TrustLevel, TrustState, TrustTable};
