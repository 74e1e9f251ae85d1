//! Cron triggers for the combined regular sync and for cleanup.

use std::sync::Arc;

use anyhow::{Context, Result};
use portal_core::SyncType;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};

use crate::services::SyncServices;

/// Returns `None` when scheduling is disabled. The caller owns starting the scheduler.
pub async fn build_scheduler(services: Arc<SyncServices>) -> Result<Option<JobScheduler>> {
    if !services.config.scheduler_enabled {
        return Ok(None);
    }

    let sched = JobScheduler::new().await.context("creating scheduler")?;

    let sync_cron = services.config.sync_cron.clone();
    let for_sync = services.clone();
    let sync_job = Job::new_async(&sync_cron, move |_uuid, _l| {
        let services = for_sync.clone();
        Box::pin(async move {
            info!("scheduled sync triggered");
            match services.orchestrator.start(SyncType::Combined).await {
                Ok(run) => info!(success = run.success, created = run.created_count, "scheduled sync finished"),
                Err(err) => warn!(error = %err, "scheduled sync skipped"),
            }
        })
    })
    .with_context(|| format!("creating scheduler job for cron {sync_cron}"))?;
    sched.add(sync_job).await.context("adding sync job")?;

    let cleanup_cron = services.config.cleanup_cron.clone();
    let for_cleanup = services.clone();
    let cleanup_job = Job::new_async(&cleanup_cron, move |_uuid, _l| {
        let services = for_cleanup.clone();
        Box::pin(async move {
            info!("scheduled cleanup triggered");
            match services.cleanup.run().await {
                Ok(report) => info!(deleted = report.total_deleted(), "scheduled cleanup finished"),
                Err(err) => warn!(error = %err, "scheduled cleanup skipped"),
            }
        })
    })
    .with_context(|| format!("creating scheduler job for cron {cleanup_cron}"))?;
    sched.add(cleanup_job).await.context("adding cleanup job")?;

    info!(sync_cron = %sync_cron, cleanup_cron = %cleanup_cron, "scheduler configured");
    Ok(Some(sched))
}
