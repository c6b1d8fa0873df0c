use anyhow::Result;
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::sqlite_helpers::{i64_to_u32, uuid_to_str};
use crate::models::UserThresholds;

pub struct ThresholdsRepository {
    pool: SqlitePool,
}

impl ThresholdsRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Thresholds for a user; defaults if the row is missing.
    pub async fn get(&self, user_id: Uuid) -> Result<UserThresholds> {
        let row = sqlx::query("SELECT * FROM user_thresholds WHERE user_id = ?1")
            .bind(uuid_to_str(user_id))
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(UserThresholds::default());
        };

        Ok(UserThresholds {
            staleness_months: i64_to_u32(row.try_get("staleness_months")?),
            minimum_age_months: i64_to_u32(row.try_get("minimum_age_months")?),
            oversized_gb: i64_to_u32(row.try_get("oversized_gb")?),
            exclude_unreleased: row.try_get("exclude_unreleased")?,
            recent_release_days: i64_to_u32(row.try_get("recent_release_days")?),
        })
    }

    pub async fn update(&self, user_id: Uuid, thresholds: &UserThresholds) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO user_thresholds (
                user_id, staleness_months, minimum_age_months, oversized_gb,
                exclude_unreleased, recent_release_days, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT (user_id) DO UPDATE SET
                staleness_months = excluded.staleness_months,
                minimum_age_months = excluded.minimum_age_months,
                oversized_gb = excluded.oversized_gb,
                exclude_unreleased = excluded.exclude_unreleased,
                recent_release_days = excluded.recent_release_days,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(uuid_to_str(user_id))
        .bind(i64::from(thresholds.staleness_months))
        .bind(i64::from(thresholds.minimum_age_months))
        .bind(i64::from(thresholds.oversized_gb))
        .bind(thresholds.exclude_unreleased)
        .bind(i64::from(thresholds.recent_release_days))
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    #[tokio::test]
    async fn update_round_trips() {
        let db = Database::in_memory().await.unwrap();
        let user = db.users().create("bob", "h").await.unwrap().unwrap();

        let custom = UserThresholds {
            staleness_months: 6,
            minimum_age_months: 1,
            oversized_gb: 20,
            exclude_unreleased: false,
            recent_release_days: 0,
        };
        db.thresholds().update(user.id, &custom).await.unwrap();
        assert_eq!(db.thresholds().get(user.id).await.unwrap(), custom);
    }
}
