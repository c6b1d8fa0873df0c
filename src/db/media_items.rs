//! Cached media server items

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::sqlite_helpers::{from_json, i64_to_u32, i64_to_u64, to_json, u64_to_i64, uuid_to_str};
use crate::models::{MediaItem, MediaKind};

pub struct MediaItemRepository {
    pool: SqlitePool,
}

fn item_from_row(row: &SqliteRow) -> Result<MediaItem> {
    let kind: String = row.try_get("kind")?;
    let groups: String = row.try_get("language_groups")?;

    Ok(MediaItem {
        external_id: row.try_get("external_id")?,
        name: row.try_get("name")?,
        kind: MediaKind::parse(&kind).ok_or_else(|| anyhow!("Unknown media kind '{}'", kind))?,
        year: row.try_get("year")?,
        added_at: row.try_get("added_at")?,
        path: row.try_get("path")?,
        size_bytes: i64_to_u64(row.try_get("size_bytes")?),
        played: row.try_get("played")?,
        play_count: i64_to_u32(row.try_get("play_count")?),
        last_played_at: row.try_get("last_played_at")?,
        language_groups: from_json(&groups)?,
        tmdb_id: row.try_get("tmdb_id")?,
        imdb_id: row.try_get("imdb_id")?,
    })
}

impl MediaItemRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Upsert a fetched snapshot in one transaction. With `prune`, rows this
    /// snapshot did not contain are deleted.
    pub async fn replace_all(
        &self,
        user_id: Uuid,
        items: &[MediaItem],
        synced_at: DateTime<Utc>,
        prune: bool,
    ) -> Result<usize> {
        let id = uuid_to_str(user_id);
        let mut tx = self.pool.begin().await?;

        for item in items {
            sqlx::query(
                r#"
                INSERT INTO media_items (
                    user_id, external_id, name, kind, year, added_at, path, size_bytes,
                    played, play_count, last_played_at, language_groups, tmdb_id, imdb_id,
                    synced_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
                ON CONFLICT (user_id, external_id) DO UPDATE SET
                    name = excluded.name,
                    kind = excluded.kind,
                    year = excluded.year,
                    added_at = excluded.added_at,
                    path = excluded.path,
                    size_bytes = excluded.size_bytes,
                    played = excluded.played,
                    play_count = excluded.play_count,
                    last_played_at = excluded.last_played_at,
                    language_groups = excluded.language_groups,
                    tmdb_id = excluded.tmdb_id,
                    imdb_id = excluded.imdb_id,
                    synced_at = excluded.synced_at
                "#,
            )
            .bind(&id)
            .bind(&item.external_id)
            .bind(&item.name)
            .bind(item.kind.as_str())
            .bind(item.year)
            .bind(item.added_at)
            .bind(&item.path)
            .bind(u64_to_i64(item.size_bytes))
            .bind(item.played)
            .bind(i64::from(item.play_count))
            .bind(item.last_played_at)
            .bind(to_json(&item.language_groups)?)
            .bind(item.tmdb_id)
            .bind(&item.imdb_id)
            .bind(synced_at)
            .execute(&mut *tx)
            .await?;
        }

        if prune {
            sqlx::query("DELETE FROM media_items WHERE user_id = ?1 AND synced_at <> ?2")
                .bind(&id)
                .bind(synced_at)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(items.len())
    }

    pub async fn list(&self, user_id: Uuid) -> Result<Vec<MediaItem>> {
        let rows = sqlx::query("SELECT * FROM media_items WHERE user_id = ?1 ORDER BY external_id")
            .bind(uuid_to_str(user_id))
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(item_from_row).collect()
    }

    pub async fn get(&self, user_id: Uuid, external_id: &str) -> Result<Option<MediaItem>> {
        let row = sqlx::query("SELECT * FROM media_items WHERE user_id = ?1 AND external_id = ?2")
            .bind(uuid_to_str(user_id))
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(item_from_row).transpose()
    }

    pub async fn count(&self, user_id: Uuid) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM media_items WHERE user_id = ?1")
            .bind(uuid_to_str(user_id))
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}
