//! `SessionStore` — the persistence boundary (spec §4.F).
//!
//! `save`/`load` are the only primitives the rest of the workspace sees;
//! this module is the only place that knows the blobs live in SQLite.
//! Grounded on `dl_store::db::Store`'s `SqlitePool` + WAL-journal-mode
//! connection setup and migration-on-open pattern.

use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool};

use crate::cipher::BlobCipher;
use crate::error::StoreError;

/// Default interval between background cleanup sweeps (spec §4.F).
pub const CLEANUP_INTERVAL_MINS: i64 = 5;
/// Default retention for an unused pairwise session before cleanup drops
/// it (spec §4.F).
pub const SESSION_IDLE_RETENTION_DAYS: i64 = 30;

#[derive(Clone)]
pub struct SessionStore {
    pool: SqlitePool,
}

impl SessionStore {
    /// Open (or create) the SQLite database at `db_path`, running pending
    /// migrations. WAL mode is set at connect time, not inside a
    /// migration — SQLite rejects `journal_mode` changes inside the
    /// transaction sqlx wraps every migration in.
    pub async fn open(db_path: &Path) -> Result<Self, StoreError> {
        let opts = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);
        let pool = SqlitePool::connect_with(opts).await?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StoreError::Migration(e.to_string()))?;
        Ok(Self { pool })
    }

    /// In-memory store, for tests and short-lived processes.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePool::connect(":memory:").await?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StoreError::Migration(e.to_string()))?;
        Ok(Self { pool })
    }

    /// `save(session_id, state_blob)` (spec §4.F). `blob` is already
    /// caller-serialized; this store only encrypts and persists it.
    pub async fn save_session(
        &self,
        cipher: &BlobCipher,
        session_id: &str,
        state_blob: &[u8],
    ) -> Result<(), StoreError> {
        let sealed = cipher.seal(state_blob, session_id.as_bytes())?;
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO sessions (session_id, blob_enc, created_at, updated_at, last_used_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(session_id) DO UPDATE SET
               blob_enc = excluded.blob_enc,
               updated_at = excluded.updated_at,
               last_used_at = excluded.last_used_at",
        )
        .bind(session_id)
        .bind(&sealed)
        .bind(now)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// `load(session_id) → state_blob` (spec §4.F). A missing row is
    /// reported as `NotFound`, not `Ok(None)` — startup callers must
    /// decide explicitly what to do about a missing or corrupt blob
    /// rather than silently treating it as "no session".
    pub async fn load_session(&self, cipher: &BlobCipher, session_id: &str) -> Result<Vec<u8>, StoreError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT blob_enc FROM sessions WHERE session_id = ?")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?;
        let Some((sealed,)) = row else {
            return Err(StoreError::NotFound(session_id.to_string()));
        };

        sqlx::query("UPDATE sessions SET last_used_at = ? WHERE session_id = ?")
            .bind(Utc::now())
            .bind(session_id)
            .execute(&self.pool)
            .await?;

        cipher.open(&sealed, session_id.as_bytes()).map_err(|e| StoreError::Corrupt {
            session_id: session_id.to_string(),
            reason: e.to_string(),
        })
    }

    /// Persist one group epoch's key material.
    pub async fn save_epoch_key(
        &self,
        cipher: &BlobCipher,
        group_id: &str,
        epoch_number: u64,
        key_blob: &[u8],
    ) -> Result<(), StoreError> {
        let aad = format!("{group_id}:{epoch_number}");
        let sealed = cipher.seal(key_blob, aad.as_bytes())?;
        sqlx::query(
            "INSERT INTO group_epoch_keys (group_id, epoch_number, blob_enc, created_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(group_id, epoch_number) DO UPDATE SET blob_enc = excluded.blob_enc",
        )
        .bind(group_id)
        .bind(epoch_number as i64)
        .bind(&sealed)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn load_epoch_key(
        &self,
        cipher: &BlobCipher,
        group_id: &str,
        epoch_number: u64,
    ) -> Result<Vec<u8>, StoreError> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT blob_enc FROM group_epoch_keys WHERE group_id = ? AND epoch_number = ?",
        )
        .bind(group_id)
        .bind(epoch_number as i64)
        .fetch_optional(&self.pool)
        .await?;
        let Some((sealed,)) = row else {
            return Err(StoreError::NotFound(format!("{group_id}:{epoch_number}")));
        };
        let aad = format!("{group_id}:{epoch_number}");
        cipher.open(&sealed, aad.as_bytes()).map_err(|e| StoreError::Corrupt {
            session_id: format!("{group_id}:{epoch_number}"),
            reason: e.to_string(),
        })
    }

    /// Load the index of persisted session ids (spec §4.F: "startup loads
    /// the persisted index"). Blob contents are not decrypted here.
    pub async fn session_index(&self) -> Result<Vec<String>, StoreError> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT session_id FROM sessions")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Background cleanup sweep (spec §4.F): drop sessions unused for
    /// `idle_retention`, and for each group keep only the newest
    /// `epoch_retention_count` epoch keys.
    pub async fn cleanup(
        &self,
        idle_retention: Duration,
        epoch_retention_count: i64,
    ) -> Result<CleanupReport, StoreError> {
        let cutoff: DateTime<Utc> = Utc::now() - idle_retention;
        let sessions_result = sqlx::query("DELETE FROM sessions WHERE last_used_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        let epochs_result = sqlx::query(
            "DELETE FROM group_epoch_keys
             WHERE (group_id, epoch_number) NOT IN (
               SELECT group_id, epoch_number FROM group_epoch_keys g2
               WHERE g2.group_id = group_epoch_keys.group_id
               ORDER BY g2.epoch_number DESC
               LIMIT ?
             )",
        )
        .bind(epoch_retention_count)
        .execute(&self.pool)
        .await?;

        let report = CleanupReport {
            sessions_dropped: sessions_result.rows_affected(),
            epoch_keys_dropped: epochs_result.rows_affected(),
        };
        if report.sessions_dropped > 0 || report.epoch_keys_dropped > 0 {
            tracing::info!(
                sessions_dropped = report.sessions_dropped,
                epoch_keys_dropped = report.epoch_keys_dropped,
                "background cleanup swept stale state"
            );
        }
        Ok(report)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CleanupReport {
    pub sessions_dropped: u64,
    pub epoch_keys_dropped: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use sonet_crypto::{Algorithm, Engine};

    fn cipher() -> BlobCipher {
        let engine = Engine::new();
        let key = engine
            .generate_symmetric_key(Algorithm::Aes256Gcm, "store", "local", ChronoDuration::days(365))
            .unwrap();
        BlobCipher::new(key)
    }

    #[tokio::test]
    async fn save_then_load_roundtrips() {
        let store = SessionStore::open_in_memory().await.unwrap();
        let cipher = cipher();
        store.save_session(&cipher, "sess-1", b"ratchet bytes").await.unwrap();
        let loaded = store.load_session(&cipher, "sess-1").await.unwrap();
        assert_eq!(loaded, b"ratchet bytes");
    }

    #[tokio::test]
    async fn loading_unknown_session_is_not_found() {
        let store = SessionStore::open_in_memory().await.unwrap();
        let cipher = cipher();
        let result = store.load_session(&cipher, "ghost").await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn cleanup_keeps_only_the_newest_epoch_keys_per_group() {
        let store = SessionStore::open_in_memory().await.unwrap();
        let cipher = cipher();
        for epoch in 1..=5u64 {
            store.save_epoch_key(&cipher, "group-1", epoch, b"key").await.unwrap();
        }
        store.cleanup(ChronoDuration::days(30), 2).await.unwrap();
        assert!(store.load_epoch_key(&cipher, "group-1", 1).await.is_err());
        assert!(store.load_epoch_key(&cipher, "group-1", 4).await.is_ok());
        assert!(store.load_epoch_key(&cipher, "group-1", 5).await.is_ok());
    }

    #[tokio::test]
    async fn session_index_lists_saved_sessions() {
        let store = SessionStore::open_in_memory().await.unwrap();
        let cipher = cipher();
        store.save_session(&cipher, "sess-a", b"a").await.unwrap();
        store.save_session(&cipher, "sess-b", b"b").await.unwrap();
        let mut index = store.session_index().await.unwrap();
        index.sort();
        assert_eq!(index, vec!["sess-a".to_string(), "sess-b".to_string()]);
    }
}
