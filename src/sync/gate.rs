//! Entry points into the orchestrator: the rate limited manual refresh and
//! the daily pass over every configured user.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{SyncOrchestrator, SyncReport};

/// Result of a manual refresh request.
#[derive(Debug)]
pub enum Trigger {
    /// The sync runs in the background; the handle resolves when it is done.
    Started(JoinHandle<SyncReport>),
    AlreadyInProgress,
    RateLimited { retry_after_secs: u64 },
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TriggerOutcome {
    Started,
    AlreadyInProgress,
    RateLimited { retry_after_secs: u64 },
}

impl Trigger {
    pub fn outcome(&self) -> TriggerOutcome {
        match self {
            Self::Started(_) => TriggerOutcome::Started,
            Self::AlreadyInProgress => TriggerOutcome::AlreadyInProgress,
            Self::RateLimited { retry_after_secs } => TriggerOutcome::RateLimited {
                retry_after_secs: *retry_after_secs,
            },
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ScheduledRunSummary {
    pub users: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

enum UserRun {
    Finished(SyncReport),
    Skipped,
}

/// Seconds left before another manual refresh is allowed, if any. Only a
/// successful sync starts the cooldown.
pub fn retry_after(
    last_synced_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    cooldown: Duration,
) -> Option<u64> {
    let last = last_synced_at?;
    let cooldown = chrono::Duration::from_std(cooldown).ok()?;
    let remaining = cooldown - (now - last);
    if remaining <= chrono::Duration::zero() {
        return None;
    }

    let secs = (remaining.num_milliseconds() + 999) / 1000;
    Some(secs.max(1) as u64)
}

#[derive(Clone)]
pub struct SyncGate {
    orchestrator: SyncOrchestrator,
    cooldown: Duration,
}

impl SyncGate {
    pub fn new(orchestrator: SyncOrchestrator, cooldown: Duration) -> Self {
        Self {
            orchestrator,
            cooldown,
        }
    }

    #[cfg(test)]
    pub fn orchestrator(&self) -> &SyncOrchestrator {
        &self.orchestrator
    }

    /// Manual refresh. A rate limited call has no side effects.
    pub async fn trigger_manual(&self, user_id: Uuid) -> anyhow::Result<Trigger> {
        let state = self.orchestrator.database().sync_state().get(user_id).await?;

        if let Some(retry_after_secs) = retry_after(state.last_synced_at, Utc::now(), self.cooldown)
        {
            debug!("Manual sync for {} rate limited for {}s", user_id, retry_after_secs);
            return Ok(Trigger::RateLimited { retry_after_secs });
        }

        match self.start(user_id).await? {
            Some(handle) => {
                info!("Manual sync started for {}", user_id);
                Ok(Trigger::Started(handle))
            }
            None => Ok(Trigger::AlreadyInProgress),
        }
    }

    /// Sync every user with both services configured. Users run concurrently
    /// and one user's failure, or even a panic, never stops the others.
    pub async fn run_scheduled(&self) -> anyhow::Result<ScheduledRunSummary> {
        let users = self
            .orchestrator
            .database()
            .services()
            .fully_configured_users()
            .await?;
        info!("Scheduled sync for {} users", users.len());

        let mut tasks = JoinSet::new();
        for user_id in users.iter().copied() {
            let gate = self.clone();
            tasks.spawn(async move { (user_id, gate.run_user(user_id).await) });
        }

        let mut summary = ScheduledRunSummary {
            users: users.len(),
            ..ScheduledRunSummary::default()
        };

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(UserRun::Finished(report)))) if report.succeeded() => {
                    summary.succeeded += 1
                }
                Ok((user_id, Ok(UserRun::Finished(report)))) => {
                    warn!(%user_id, errors = ?report.errors, "Scheduled sync failed");
                    summary.failed += 1;
                }
                Ok((user_id, Ok(UserRun::Skipped))) => {
                    debug!(%user_id, "Sync already running, skipping");
                    summary.skipped += 1;
                }
                Ok((user_id, Err(e))) => {
                    error!(%user_id, "Scheduled sync could not run: {:#}", e);
                    summary.failed += 1;
                }
                Err(e) => {
                    error!("Scheduled sync task failed: {}", e);
                    summary.failed += 1;
                }
            }
        }

        info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            "Scheduled sync finished"
        );
        Ok(summary)
    }

    async fn run_user(&self, user_id: Uuid) -> anyhow::Result<UserRun> {
        match self.start(user_id).await? {
            Some(handle) => Ok(UserRun::Finished(handle.await?)),
            None => Ok(UserRun::Skipped),
        }
    }

    /// Claim the slot and run the sync on its own task.
    async fn start(&self, user_id: Uuid) -> anyhow::Result<Option<JoinHandle<SyncReport>>> {
        if !self.orchestrator.begin(user_id).await? {
            return Ok(None);
        }

        let orchestrator = self.orchestrator.clone();
        Ok(Some(tokio::spawn(async move {
            let worker = orchestrator.clone();
            match tokio::spawn(async move { worker.run_claimed(user_id).await }).await {
                Ok(report) => report,
                Err(e) => {
                    error!("Sync worker for {} died: {}", user_id, e);
                    orchestrator.abandon(user_id, &e.to_string()).await
                }
            }
        })))
    }
}
