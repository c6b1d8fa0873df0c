//! Background job scheduling

use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

use crate::sync::SyncGate;

/// Register the daily sync and start the scheduler. `schedule` is a six
/// field cron expression (seconds first).
pub async fn start_scheduler(gate: SyncGate, schedule: &str) -> anyhow::Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;

    let sync_job = Job::new_async(schedule, move |_uuid, _l| {
        let gate = gate.clone();
        Box::pin(async move {
            info!("Running scheduled library sync");
            if let Err(e) = gate.run_scheduled().await {
                error!("Scheduled sync error: {:#}", e);
            }
        })
    })?;
    scheduler.add(sync_job).await?;

    scheduler.start().await?;

    info!("Job scheduler started ({})", schedule);
    Ok(scheduler)
}
