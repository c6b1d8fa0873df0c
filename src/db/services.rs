//! Per-user upstream connections. API keys arrive here already encrypted.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::sqlite_helpers::{str_to_uuid, uuid_to_str};
use crate::models::ServiceKind;

#[derive(Debug, Clone, PartialEq)]
pub struct StoredConnection {
    pub base_url: String,
    pub api_key_encrypted: String,
    pub api_key_nonce: String,
    pub external_user_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

pub struct ServiceConnectionRepository {
    pool: SqlitePool,
}

impl ServiceConnectionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn upsert(&self, user_id: Uuid, service: ServiceKind, conn: &StoredConnection) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO service_connections (
                user_id, service, base_url, api_key_encrypted, api_key_nonce,
                external_user_id, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT (user_id, service) DO UPDATE SET
                base_url = excluded.base_url,
                api_key_encrypted = excluded.api_key_encrypted,
                api_key_nonce = excluded.api_key_nonce,
                external_user_id = excluded.external_user_id,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(uuid_to_str(user_id))
        .bind(service.as_str())
        .bind(&conn.base_url)
        .bind(&conn.api_key_encrypted)
        .bind(&conn.api_key_nonce)
        .bind(&conn.external_user_id)
        .bind(conn.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get(&self, user_id: Uuid, service: ServiceKind) -> Result<Option<StoredConnection>> {
        let row = sqlx::query(
            "SELECT * FROM service_connections WHERE user_id = ?1 AND service = ?2",
        )
        .bind(uuid_to_str(user_id))
        .bind(service.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(StoredConnection {
            base_url: row.try_get("base_url")?,
            api_key_encrypted: row.try_get("api_key_encrypted")?,
            api_key_nonce: row.try_get("api_key_nonce")?,
            external_user_id: row.try_get("external_user_id")?,
            updated_at: row.try_get("updated_at")?,
        }))
    }

    pub async fn delete(&self, user_id: Uuid, service: ServiceKind) -> Result<bool> {
        let result = sqlx::query("DELETE FROM service_connections WHERE user_id = ?1 AND service = ?2")
            .bind(uuid_to_str(user_id))
            .bind(service.as_str())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Users with both a Jellyfin and a Jellyseerr connection, the population
    /// of the scheduled sync.
    pub async fn fully_configured_users(&self) -> Result<Vec<Uuid>> {
        let rows = sqlx::query(
            r#"
            SELECT user_id FROM service_connections
            WHERE service IN ('jellyfin', 'jellyseerr')
            GROUP BY user_id
            HAVING COUNT(DISTINCT service) = 2
            ORDER BY user_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let id: String = row.try_get("user_id")?;
                str_to_uuid(&id)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    fn stored(url: &str) -> StoredConnection {
        StoredConnection {
            base_url: url.to_string(),
            api_key_encrypted: "cipher".to_string(),
            api_key_nonce: "nonce".to_string(),
            external_user_id: None,
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn only_users_with_both_services_are_listed() {
        let db = Database::in_memory().await.unwrap();
        let both = db.users().create("both", "h").await.unwrap().unwrap();
        let half = db.users().create("half", "h").await.unwrap().unwrap();

        let repo = db.services();
        repo.upsert(both.id, ServiceKind::Jellyfin, &stored("http://a")).await.unwrap();
        repo.upsert(both.id, ServiceKind::Jellyseerr, &stored("http://b")).await.unwrap();
        repo.upsert(half.id, ServiceKind::Jellyfin, &stored("http://c")).await.unwrap();

        assert_eq!(repo.fully_configured_users().await.unwrap(), vec![both.id]);

        repo.upsert(both.id, ServiceKind::Jellyfin, &stored("http://updated")).await.unwrap();
        let conn = repo.get(both.id, ServiceKind::Jellyfin).await.unwrap().unwrap();
        assert_eq!(conn.base_url, "http://updated");

        assert!(repo.delete(both.id, ServiceKind::Jellyseerr).await.unwrap());
        assert!(repo.fully_configured_users().await.unwrap().is_empty());
    }
}
