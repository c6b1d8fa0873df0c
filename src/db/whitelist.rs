//! Whitelist entries. Expired entries stay in the table; callers decide what
//! expiry means at read time.

use anyhow::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::sqlite_helpers::uuid_to_str;
use crate::models::{WhitelistEntry, WhitelistKind};

pub struct WhitelistRepository {
    pool: SqlitePool,
}

fn entry_from_row(row: &SqliteRow) -> Result<WhitelistEntry> {
    let list: String = row.try_get("list")?;
    Ok(WhitelistEntry {
        list: list.parse()?,
        item_id: row.try_get("item_id")?,
        item_name: row.try_get("item_name")?,
        created_at: row.try_get("created_at")?,
        expires_at: row.try_get("expires_at")?,
    })
}

impl WhitelistRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or refresh an entry (re-adding an item updates its expiry).
    pub async fn add(&self, user_id: Uuid, entry: &WhitelistEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO whitelist_entries (user_id, list, item_id, item_name, created_at, expires_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT (user_id, list, item_id) DO UPDATE SET
                item_name = excluded.item_name,
                created_at = excluded.created_at,
                expires_at = excluded.expires_at
            "#,
        )
        .bind(uuid_to_str(user_id))
        .bind(entry.list.as_str())
        .bind(&entry.item_id)
        .bind(&entry.item_name)
        .bind(entry.created_at)
        .bind(entry.expires_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn remove(&self, user_id: Uuid, list: WhitelistKind, item_id: &str) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM whitelist_entries WHERE user_id = ?1 AND list = ?2 AND item_id = ?3",
        )
        .bind(uuid_to_str(user_id))
        .bind(list.as_str())
        .bind(item_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Entries of one list, or of every list when `list` is `None`.
    pub async fn list(&self, user_id: Uuid, list: Option<WhitelistKind>) -> Result<Vec<WhitelistEntry>> {
        let rows = match list {
            Some(list) => {
                sqlx::query(
                    "SELECT * FROM whitelist_entries WHERE user_id = ?1 AND list = ?2 ORDER BY created_at DESC, item_id",
                )
                .bind(uuid_to_str(user_id))
                .bind(list.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT * FROM whitelist_entries WHERE user_id = ?1 ORDER BY created_at DESC, item_id",
                )
                .bind(uuid_to_str(user_id))
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.iter().map(entry_from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use chrono::{Duration, Utc};

    #[tokio::test]
    async fn lists_are_independent_and_expired_entries_are_kept() {
        let db = Database::in_memory().await.unwrap();
        let user = db.users().create("a", "h").await.unwrap().unwrap();
        let repo = db.whitelist();
        let now = Utc::now();

        let expired = WhitelistEntry {
            list: WhitelistKind::Protected,
            item_id: "m1".to_string(),
            item_name: Some("Heat".to_string()),
            created_at: now - Duration::days(10),
            expires_at: Some(now - Duration::days(1)),
        };
        repo.add(user.id, &expired).await.unwrap();
        repo.add(
            user.id,
            &WhitelistEntry {
                list: WhitelistKind::FrenchOnly,
                expires_at: None,
                ..expired.clone()
            },
        )
        .await
        .unwrap();

        let protected = repo.list(user.id, Some(WhitelistKind::Protected)).await.unwrap();
        assert_eq!(protected.len(), 1);
        assert!(!protected[0].is_active(now));
        assert_eq!(repo.list(user.id, None).await.unwrap().len(), 2);

        assert!(repo.remove(user.id, WhitelistKind::Protected, "m1").await.unwrap());
        assert!(!repo.remove(user.id, WhitelistKind::Protected, "m1").await.unwrap());
        assert_eq!(repo.list(user.id, None).await.unwrap().len(), 1);
    }
}
