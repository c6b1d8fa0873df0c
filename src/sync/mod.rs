//! Per-user sync: fetch both upstream services and refresh the cache.
//!
//! A run never returns an error to its caller. Whatever goes wrong ends up in
//! the [`SyncReport`] and on the user's sync state row.

pub mod gate;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::crypto::CredentialCipher;
use crate::db::Database;
use crate::http::{FetchError, FetchResult, HttpClient};
use crate::jellyfin::JellyfinClient;
use crate::jellyseerr::JellyseerrClient;
use crate::models::{MediaItem, RequestRecord, ServiceConnection, ServiceConnections, ServiceKind};

pub use gate::{ScheduledRunSummary, SyncGate, Trigger, TriggerOutcome};

#[async_trait]
pub trait MediaServer: Send + Sync {
    async fn fetch_items(&self) -> FetchResult<Vec<MediaItem>>;
}

#[async_trait]
pub trait RequestTracker: Send + Sync {
    async fn fetch_requests(&self) -> FetchResult<Vec<RequestRecord>>;
}

pub struct Upstream {
    pub media: Box<dyn MediaServer>,
    pub requests: Box<dyn RequestTracker>,
}

/// Builds the clients for one user's connections. A construction error is
/// tagged with the service it came from.
pub trait UpstreamConnector: Send + Sync {
    fn connect(&self, connections: &ServiceConnections) -> Result<Upstream, SyncError>;
}

/// Real Jellyfin and Jellyseerr clients sharing one HTTP client.
pub struct HttpConnector {
    http: HttpClient,
    page_size: u32,
}

impl HttpConnector {
    pub fn new(http: HttpClient, page_size: u32) -> Self {
        Self { http, page_size }
    }
}

impl UpstreamConnector for HttpConnector {
    fn connect(&self, connections: &ServiceConnections) -> Result<Upstream, SyncError> {
        let media = JellyfinClient::new(self.http.clone(), &connections.jellyfin, self.page_size)
            .map_err(|source| SyncError::Fetch {
                service: ServiceKind::Jellyfin,
                source,
            })?;
        let requests =
            JellyseerrClient::new(self.http.clone(), &connections.jellyseerr, self.page_size)
                .map_err(|source| SyncError::Fetch {
                    service: ServiceKind::Jellyseerr,
                    source,
                })?;

        Ok(Upstream {
            media: Box::new(media),
            requests: Box::new(requests),
        })
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("{0} is not configured")]
    NotConfigured(ServiceKind),

    #[error("stored {0} credentials could not be decrypted")]
    Credentials(ServiceKind),

    #[error("{service}: {source}")]
    Fetch {
        service: ServiceKind,
        #[source]
        source: FetchError,
    },

    #[error("cache update failed: {0:#}")]
    Store(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SyncReport {
    pub user_id: Uuid,
    /// `None` when the media fetch or its upsert failed
    pub items_synced: Option<usize>,
    pub requests_synced: Option<usize>,
    pub errors: Vec<String>,
    pub finished_at: DateTime<Utc>,
}

impl SyncReport {
    fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            items_synced: None,
            requests_synced: None,
            errors: Vec::new(),
            finished_at: Utc::now(),
        }
    }

    fn record(&mut self, err: SyncError) {
        self.errors.push(err.to_string());
    }

    pub fn succeeded(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    Completed(SyncReport),
    AlreadyInProgress,
}

#[derive(Clone)]
pub struct SyncOrchestrator {
    db: Database,
    connector: Arc<dyn UpstreamConnector>,
    cipher: CredentialCipher,
    fetch_timeout: Duration,
    prune: bool,
}

async fn with_timeout<T>(
    limit: Duration,
    fut: impl Future<Output = FetchResult<T>>,
) -> FetchResult<T> {
    tokio::time::timeout(limit, fut)
        .await
        .unwrap_or_else(|_| Err(FetchError::Timeout(limit)))
}

impl SyncOrchestrator {
    pub fn new(
        db: Database,
        connector: Arc<dyn UpstreamConnector>,
        cipher: CredentialCipher,
        fetch_timeout: Duration,
        prune: bool,
    ) -> Self {
        Self {
            db,
            connector,
            cipher,
            fetch_timeout,
            prune,
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Claim the user's sync slot. `false` means a sync is already running.
    pub async fn begin(&self, user_id: Uuid) -> anyhow::Result<bool> {
        self.db.sync_state().try_begin(user_id, Utc::now()).await
    }

    /// Claim and run in the current task.
    pub async fn run(&self, user_id: Uuid) -> SyncOutcome {
        match self.begin(user_id).await {
            Ok(true) => SyncOutcome::Completed(self.run_claimed(user_id).await),
            Ok(false) => SyncOutcome::AlreadyInProgress,
            Err(e) => {
                error!("Could not claim sync for user {}: {:#}", user_id, e);
                let mut report = SyncReport::new(user_id);
                report.record(SyncError::Store(e));
                SyncOutcome::Completed(report)
            }
        }
    }

    /// Run a sync whose slot was already claimed with [`Self::begin`]. The
    /// slot is released before returning, whatever happened.
    #[instrument(skip(self))]
    pub async fn run_claimed(&self, user_id: Uuid) -> SyncReport {
        info!("Starting sync");
        let mut report = SyncReport::new(user_id);

        match self.load_connections(user_id).await {
            Ok(connections) => match self.connector.connect(&connections) {
                Ok(upstream) => self.fetch_and_store(user_id, &upstream, &mut report).await,
                Err(e) => report.record(e),
            },
            Err(e) => report.record(e),
        }

        report.finished_at = Utc::now();
        let released = if report.succeeded() {
            self.db
                .sync_state()
                .finish_success(user_id, report.finished_at)
                .await
        } else {
            self.db
                .sync_state()
                .finish_failure(user_id, &report.errors.join("; "))
                .await
        };
        if let Err(e) = released {
            error!("Failed to record sync result: {:#}", e);
            report.record(SyncError::Store(e));
        }

        if report.succeeded() {
            info!(
                items = report.items_synced,
                requests = report.requests_synced,
                "Sync completed"
            );
        } else {
            warn!(errors = ?report.errors, "Sync failed");
        }
        report
    }

    /// Release a slot whose worker died without reporting.
    pub async fn abandon(&self, user_id: Uuid, reason: &str) -> SyncReport {
        let mut report = SyncReport::new(user_id);
        report.errors.push(format!("sync aborted: {}", reason));
        if let Err(e) = self
            .db
            .sync_state()
            .finish_failure(user_id, &report.errors.join("; "))
            .await
        {
            error!("Failed to release sync for user {}: {:#}", user_id, e);
        }
        report
    }

    async fn fetch_and_store(&self, user_id: Uuid, upstream: &Upstream, report: &mut SyncReport) {
        let (items, requests) = tokio::join!(
            with_timeout(self.fetch_timeout, upstream.media.fetch_items()),
            with_timeout(self.fetch_timeout, upstream.requests.fetch_requests()),
        );
        let synced_at = Utc::now();

        // Each data set is stored on its own so one failing service does not
        // throw away what the other returned.
        match items {
            Ok(items) => match self
                .db
                .media_items()
                .replace_all(user_id, &items, synced_at, self.prune)
                .await
            {
                Ok(count) => report.items_synced = Some(count),
                Err(e) => report.record(SyncError::Store(e)),
            },
            Err(source) => report.record(SyncError::Fetch {
                service: ServiceKind::Jellyfin,
                source,
            }),
        }

        match requests {
            Ok(requests) => match self
                .db
                .requests()
                .replace_all(user_id, &requests, synced_at, self.prune)
                .await
            {
                Ok(count) => report.requests_synced = Some(count),
                Err(e) => report.record(SyncError::Store(e)),
            },
            Err(source) => report.record(SyncError::Fetch {
                service: ServiceKind::Jellyseerr,
                source,
            }),
        }
    }

    async fn load_connections(&self, user_id: Uuid) -> Result<ServiceConnections, SyncError> {
        Ok(ServiceConnections {
            jellyfin: self.load_connection(user_id, ServiceKind::Jellyfin).await?,
            jellyseerr: self.load_connection(user_id, ServiceKind::Jellyseerr).await?,
        })
    }

    async fn load_connection(
        &self,
        user_id: Uuid,
        service: ServiceKind,
    ) -> Result<ServiceConnection, SyncError> {
        let stored = self
            .db
            .services()
            .get(user_id, service)
            .await?
            .ok_or(SyncError::NotConfigured(service))?;

        let api_key = self
            .cipher
            .decrypt(&stored.api_key_encrypted, &stored.api_key_nonce)
            .map_err(|_| SyncError::Credentials(service))?;

        Ok(ServiceConnection {
            base_url: stored.base_url,
            api_key,
            external_user_id: stored.external_user_id,
        })
    }
}
