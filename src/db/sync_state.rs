//! Per-user sync bookkeeping. The `in_progress` column is the only lock a
//! sync takes; it is claimed with a conditional update so two triggers for
//! the same user can never both win.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::sqlite_helpers::uuid_to_str;
use crate::models::SyncState;

pub struct SyncStateRepository {
    pool: SqlitePool,
}

impl SyncStateRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, user_id: Uuid) -> Result<SyncState> {
        let row = sqlx::query("SELECT * FROM sync_state WHERE user_id = ?1")
            .bind(uuid_to_str(user_id))
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(SyncState::default());
        };

        Ok(SyncState {
            in_progress: row.try_get("in_progress")?,
            last_synced_at: row.try_get("last_synced_at")?,
            last_attempt_at: row.try_get("last_attempt_at")?,
            last_error: row.try_get("last_error")?,
        })
    }

    /// Atomically move the user from idle to running. Returns `false` if a
    /// sync is already running.
    pub async fn try_begin(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        let id = uuid_to_str(user_id);

        sqlx::query("INSERT OR IGNORE INTO sync_state (user_id, in_progress) VALUES (?1, 0)")
            .bind(&id)
            .execute(&self.pool)
            .await?;

        let result = sqlx::query(
            "UPDATE sync_state SET in_progress = 1, last_attempt_at = ?2 WHERE user_id = ?1 AND in_progress = 0",
        )
        .bind(&id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn finish_success(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "UPDATE sync_state SET in_progress = 0, last_synced_at = ?2, last_error = NULL WHERE user_id = ?1",
        )
        .bind(uuid_to_str(user_id))
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Record a failed run; the last successful timestamp is left alone.
    pub async fn finish_failure(&self, user_id: Uuid, error: &str) -> Result<()> {
        sqlx::query("UPDATE sync_state SET in_progress = 0, last_error = ?2 WHERE user_id = ?1")
            .bind(uuid_to_str(user_id))
            .bind(error)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Clear flags left behind by a process that died mid-sync.
    pub async fn reset_stale(&self) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE sync_state SET in_progress = 0, last_error = 'interrupted by restart' WHERE in_progress = 1",
        )
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
