//! Cached request tracker records

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::sqlite_helpers::{from_json, to_json, uuid_to_str};
use crate::models::{RequestKind, RequestRecord};

pub struct RequestRepository {
    pool: SqlitePool,
}

fn record_from_row(row: &SqliteRow) -> Result<RequestRecord> {
    let kind: String = row.try_get("kind")?;
    let status: String = row.try_get("status")?;
    let missing: Option<String> = row.try_get("missing_seasons")?;

    Ok(RequestRecord {
        external_id: row.try_get("external_id")?,
        title: row.try_get("title")?,
        kind: RequestKind::parse(&kind).ok_or_else(|| anyhow!("Unknown request kind '{}'", kind))?,
        status: status.parse()?,
        requested_by: row.try_get("requested_by")?,
        created_at: row.try_get("created_at")?,
        release_date: row.try_get("release_date")?,
        available_at: row.try_get("available_at")?,
        tmdb_id: row.try_get("tmdb_id")?,
        missing_seasons: missing.as_deref().map(from_json).transpose()?,
    })
}

impl RequestRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn replace_all(
        &self,
        user_id: Uuid,
        records: &[RequestRecord],
        synced_at: DateTime<Utc>,
        prune: bool,
    ) -> Result<usize> {
        let id = uuid_to_str(user_id);
        let mut tx = self.pool.begin().await?;

        for record in records {
            let missing = record.missing_seasons.as_deref().map(to_json).transpose()?;

            sqlx::query(
                r#"
                INSERT INTO requests (
                    user_id, external_id, title, kind, status, requested_by, created_at,
                    release_date, available_at, tmdb_id, missing_seasons, synced_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                ON CONFLICT (user_id, external_id) DO UPDATE SET
                    title = excluded.title,
                    kind = excluded.kind,
                    status = excluded.status,
                    requested_by = excluded.requested_by,
                    created_at = excluded.created_at,
                    release_date = excluded.release_date,
                    available_at = excluded.available_at,
                    tmdb_id = excluded.tmdb_id,
                    missing_seasons = excluded.missing_seasons,
                    synced_at = excluded.synced_at
                "#,
            )
            .bind(&id)
            .bind(record.external_id)
            .bind(&record.title)
            .bind(record.kind.as_str())
            .bind(record.status.as_str())
            .bind(&record.requested_by)
            .bind(record.created_at)
            .bind(record.release_date)
            .bind(record.available_at)
            .bind(record.tmdb_id)
            .bind(missing)
            .bind(synced_at)
            .execute(&mut *tx)
            .await?;
        }

        if prune {
            sqlx::query("DELETE FROM requests WHERE user_id = ?1 AND synced_at <> ?2")
                .bind(&id)
                .bind(synced_at)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(records.len())
    }

    pub async fn list(&self, user_id: Uuid) -> Result<Vec<RequestRecord>> {
        let rows = sqlx::query("SELECT * FROM requests WHERE user_id = ?1 ORDER BY external_id")
            .bind(uuid_to_str(user_id))
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(record_from_row).collect()
    }

    pub async fn count(&self, user_id: Uuid) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM requests WHERE user_id = ?1")
            .bind(uuid_to_str(user_id))
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::RequestStatus;
    use chrono::NaiveDate;

    #[tokio::test]
    async fn records_round_trip_with_seasons() {
        let db = Database::in_memory().await.unwrap();
        let user = db.users().create("a", "h").await.unwrap().unwrap();

        let record = RequestRecord {
            external_id: 42,
            title: "Some Show".to_string(),
            kind: RequestKind::Tv,
            status: RequestStatus::PartiallyAvailable,
            requested_by: "alice".to_string(),
            created_at: Utc::now(),
            release_date: NaiveDate::from_ymd_opt(2020, 1, 31),
            available_at: None,
            tmdb_id: Some(1399),
            missing_seasons: Some(vec![2, 3]),
        };

        db.requests()
            .replace_all(user.id, std::slice::from_ref(&record), Utc::now(), false)
            .await
            .unwrap();

        let stored = db.requests().list(user.id).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].status, RequestStatus::PartiallyAvailable);
        assert_eq!(stored[0].missing_seasons, Some(vec![2, 3]));
        assert_eq!(stored[0].release_date, record.release_date);
        assert_eq!(db.requests().count(user.id).await.unwrap(), 1);
    }
}
