//! Background cleanup sweep (spec §4.F). Grounded on
//! `guard-service::connected::heartbeat::spawn_heartbeat_loop`'s
//! `tokio::spawn` + `time::interval` ticker shape.

use chrono::Duration as ChronoDuration;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration};

use crate::db::{SessionStore, CLEANUP_INTERVAL_MINS, SESSION_IDLE_RETENTION_DAYS};

/// Spawn the periodic sweep that drops sessions idle past
/// `idle_retention` and trims each group's epoch-key history down to
/// `epoch_retention_count`. Runs until the handle is dropped or aborted.
pub fn spawn_cleanup_loop(
    store: SessionStore,
    idle_retention: ChronoDuration,
    epoch_retention_count: i64,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(Duration::from_secs(60 * CLEANUP_INTERVAL_MINS as u64));
        loop {
            ticker.tick().await;
            if let Err(err) = store.cleanup(idle_retention, epoch_retention_count).await {
                tracing::warn!(error = %err, "background cleanup sweep failed");
            }
        }
    })
}

/// Default-configured sweep (30-day session idle cutoff).
pub fn spawn_default_cleanup_loop(store: SessionStore, epoch_retention_count: i64) -> JoinHandle<()> {
    spawn_cleanup_loop(store, ChronoDuration::days(SESSION_IDLE_RETENTION_DAYS), epoch_retention_count)
}
