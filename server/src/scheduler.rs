//! Periodic background work: key lifecycle maintenance and progress
//! cleanup ride cron schedules; the alert tick and system sampler are
//! interval loops owned by the runtime.

use std::time::Duration;

use tokio_cron_scheduler::JobScheduler;

use crate::api_keys::ApiKeyMaintenance;
use crate::error::AppResult;
use crate::progress::ProgressTracker;
use crate::runtime::Runtime;

const PROGRESS_RETENTION: Duration = Duration::from_secs(7 * 24 * 3_600);

async fn run_key_maintenance(maintenance: ApiKeyMaintenance) -> AppResult<()> {
    maintenance.run().await
}

async fn run_progress_cleanup(progress: ProgressTracker) -> AppResult<()> {
    let removed = progress.cleanup_older_than(PROGRESS_RETENTION).await?;
    if removed > 0 {
        tracing::info!("Progress cleanup removed {} stale records", removed);
    }
    Ok(())
}

pub async fn build(runtime: &Runtime) -> anyhow::Result<JobScheduler> {
    let mut scheduler = JobScheduler::new().await?;

    {
        let maintenance = runtime.key_maintenance.clone();
        schedule_job!(
            scheduler,
            "api-key-maintenance",
            // hourly, at second 0 of minute 11
            "0 11 * * * *",
            run_key_maintenance,
            maintenance
        );
    }

    {
        let progress = runtime.progress.clone();
        schedule_job!(
            scheduler,
            "progress-cleanup",
            // daily at 03:47
            "0 47 3 * * *",
            run_progress_cleanup,
            progress
        );
    }

    Ok(scheduler)
}
