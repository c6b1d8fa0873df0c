//! User accounts

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::sqlite_helpers::{str_to_uuid, uuid_to_str};
use crate::models::UserThresholds;

#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: Uuid,
    pub username: String,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

impl UserRecord {
    fn from_row(row: &SqliteRow) -> Result<Self> {
        let id: String = row.try_get("id")?;
        Ok(Self {
            id: str_to_uuid(&id)?,
            username: row.try_get("username")?,
            password_hash: row.try_get("password_hash")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

pub struct UserRepository {
    pool: SqlitePool,
}

impl UserRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a user together with default thresholds and an idle sync state.
    /// Returns `None` when the username is taken.
    pub async fn create(&self, username: &str, password_hash: &str) -> Result<Option<UserRecord>> {
        let record = UserRecord {
            id: Uuid::new_v4(),
            username: username.to_string(),
            password_hash: password_hash.to_string(),
            created_at: Utc::now(),
        };
        let id = uuid_to_str(record.id);
        let defaults = UserThresholds::default();

        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            "INSERT INTO users (id, username, password_hash, created_at) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(&id)
        .bind(&record.username)
        .bind(&record.password_hash)
        .bind(record.created_at)
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {}
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        sqlx::query(
            r#"
            INSERT INTO user_thresholds (
                user_id, staleness_months, minimum_age_months, oversized_gb,
                exclude_unreleased, recent_release_days, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&id)
        .bind(i64::from(defaults.staleness_months))
        .bind(i64::from(defaults.minimum_age_months))
        .bind(i64::from(defaults.oversized_gb))
        .bind(defaults.exclude_unreleased)
        .bind(i64::from(defaults.recent_release_days))
        .bind(record.created_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO sync_state (user_id, in_progress) VALUES (?1, 0)")
            .bind(&id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some(record))
    }

    pub async fn find_by_username(&self, username: &str) -> Result<Option<UserRecord>> {
        let row = sqlx::query("SELECT * FROM users WHERE username = ?1")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(UserRecord::from_row).transpose()
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<UserRecord>> {
        let row = sqlx::query("SELECT * FROM users WHERE id = ?1")
            .bind(uuid_to_str(id))
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(UserRecord::from_row).transpose()
    }
}
