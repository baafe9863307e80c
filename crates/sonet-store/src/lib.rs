//! sonet-store — Sonet end-to-end encryption core, encrypted session
//! persistence (spec §4.F).
//!
//! `save`/`load` are the only primitives the rest of the workspace sees —
//! everything here (SQLite, at-rest encryption, background cleanup) is an
//! implementation detail of making those two calls durable and private.

pub mod cipher;
pub mod cleanup;
pub mod db;
pub mod error;

pub use cipher::BlobCipher;
pub use cleanup::{spawn_cleanup_loop, spawn_default_cleanup_loop};
pub use db::{CleanupReport, SessionStore, CLEANUP_INTERVAL_MINS, SESSION_IDLE_RETENTION_DAYS};
pub use error::StoreError;
