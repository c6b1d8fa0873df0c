//! Cache store: per-user snapshot, whitelists, thresholds and sync state.

pub mod media_items;
pub mod requests;
pub mod services;
pub mod sqlite_helpers;
pub mod sync_state;
pub mod thresholds;
pub mod users;
pub mod whitelist;

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;

pub use media_items::MediaItemRepository;
pub use requests::RequestRepository;
pub use services::{ServiceConnectionRepository, StoredConnection};
pub use sync_state::SyncStateRepository;
pub use thresholds::ThresholdsRepository;
pub use users::{UserRecord, UserRepository};
pub use whitelist::WhitelistRepository;

/// Database wrapper providing connection pool access
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if needed) the SQLite database at `url`
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    /// Fresh in-memory database with migrations applied. A single connection
    /// keeps every query on the same memory database.
    #[cfg(test)]
    pub async fn in_memory() -> Result<Self> {
        let db = Self::connect("sqlite::memory:", 1).await?;
        db.migrate().await?;
        Ok(db)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn users(&self) -> UserRepository {
        UserRepository::new(self.pool.clone())
    }

    pub fn services(&self) -> ServiceConnectionRepository {
        ServiceConnectionRepository::new(self.pool.clone())
    }

    pub fn thresholds(&self) -> ThresholdsRepository {
        ThresholdsRepository::new(self.pool.clone())
    }

    pub fn sync_state(&self) -> SyncStateRepository {
        SyncStateRepository::new(self.pool.clone())
    }

    pub fn media_items(&self) -> MediaItemRepository {
        MediaItemRepository::new(self.pool.clone())
    }

    pub fn requests(&self) -> RequestRepository {
        RequestRepository::new(self.pool.clone())
    }

    pub fn whitelist(&self) -> WhitelistRepository {
        WhitelistRepository::new(self.pool.clone())
    }
}
