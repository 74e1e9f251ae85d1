//! Full-sync jobs: sequential, retrying, cancellable batch ingestion tracked by id.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use portal_adapters::{AdapterError, ContentSource};
use portal_core::{
    ContentItem, FullSyncConfig, FullSyncJob, JobId, JobPriority, JobStatus, NaturalKey, RunError,
    SyncRun, SyncType,
};
use portal_storage::{
    BackoffPolicy, CacheInvalidator, JobStore, QuotaTracker, RunLock, RunLockGuard, LISTING_SCOPE,
};
use reqwest::Url;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::error::SyncError;
use crate::pipeline::{IngestOutcome, Ingestor};
use crate::webhook::WebhookNotifier;

pub const FULL_SYNC_LOCK: &str = "full-sync";
pub const MAX_BATCH_SIZE: u32 = 100;
pub const MAX_RETRIES: u32 = 10;

#[derive(Debug, Clone)]
pub struct FullSyncSettings {
    pub queries: Vec<String>,
    pub pages_per_query: u32,
    /// Pause between batches at normal priority.
    pub batch_delay: Duration,
    pub retry_backoff: BackoffPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CancelOutcome {
    pub found: bool,
    pub cancelled: bool,
}

pub fn priority_delay(base: Duration, priority: JobPriority) -> Duration {
    match priority {
        JobPriority::High => Duration::ZERO,
        JobPriority::Normal => base,
        JobPriority::Low => base.saturating_mul(2),
    }
}

/// Average time per executed batch plus the inter-batch delay, times the batches
/// left. `None` when the estimate does not fit in a `Duration`.
fn remaining_eta(elapsed: Duration, executed: usize, delay: Duration, remaining: usize) -> Option<Duration> {
    let executed = u32::try_from(executed.max(1)).unwrap_or(u32::MAX);
    let remaining = u32::try_from(remaining).ok()?;
    (elapsed / executed).saturating_add(delay).checked_mul(remaining)
}

pub fn validate_config(config: &FullSyncConfig) -> Result<(), SyncError> {
    if config.batch_size == 0 || config.batch_size > MAX_BATCH_SIZE {
        return Err(SyncError::Validation(format!(
            "batchSize must be between 1 and {MAX_BATCH_SIZE}, got {}",
            config.batch_size
        )));
    }
    if config.max_retries > MAX_RETRIES {
        return Err(SyncError::Validation(format!(
            "maxRetries must be at most {MAX_RETRIES}, got {}",
            config.max_retries
        )));
    }
    if let Some(webhook) = &config.webhook {
        let url = Url::parse(webhook)
            .map_err(|e| SyncError::Validation(format!("webhook is not a valid url: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(SyncError::Validation(format!(
                "webhook must use http or https, got {}",
                url.scheme()
            )));
        }
    }
    Ok(())
}

/// Graceful stops before the next batch; force also abandons the batch in flight.
#[derive(Debug, Clone, Default)]
struct JobControl {
    graceful: CancellationToken,
    force: CancellationToken,
}

struct BatchPlan {
    source: Arc<dyn ContentSource>,
    query: String,
    page: u32,
}

enum BatchResult {
    Ingested(IngestOutcome),
    Failed(RunError),
    QuotaExhausted(RunError),
}

#[derive(Debug, Default)]
struct JobTally {
    processed: usize,
    created: usize,
    updated: usize,
    unchanged: usize,
    rejected: usize,
    /// Batches that fetched nothing usable because of a source, quota or storage failure.
    failed_batches: usize,
    errors: Vec<RunError>,
}

impl JobTally {
    fn absorb(&mut self, outcome: &IngestOutcome) {
        self.processed += outcome.fetched;
        self.created += outcome.created;
        self.updated += outcome.updated;
        self.unchanged += outcome.unchanged;
        self.rejected += outcome.rejected;
        if outcome.storage_failure.is_some() {
            self.failed_batches += 1;
        }
        self.errors.extend(outcome.errors.iter().cloned());
    }

    fn fail(&mut self, error: RunError) {
        self.failed_batches += 1;
        self.errors.push(error);
    }

    fn wrote_anything(&self) -> bool {
        self.created + self.updated > 0
    }

    fn to_run(&self, job_id: JobId, started_at: DateTime<Utc>) -> SyncRun {
        SyncRun {
            run_id: job_id.0,
            sync_type: SyncType::Combined,
            started_at,
            finished_at: Utc::now(),
            success: self.failed_batches == 0,
            processed_count: self.processed,
            created_count: self.created,
            updated_count: self.updated,
            unchanged_count: self.unchanged,
            rejected_count: self.rejected,
            errors: self.errors.clone(),
        }
    }
}

pub struct FullSyncManager {
    sources: Vec<Arc<dyn ContentSource>>,
    ingestor: Arc<Ingestor>,
    quota: Arc<QuotaTracker>,
    jobs: Arc<dyn JobStore>,
    lock: Arc<dyn RunLock>,
    cache: Arc<dyn CacheInvalidator>,
    webhook: Option<WebhookNotifier>,
    settings: FullSyncSettings,
    controls: Mutex<HashMap<JobId, JobControl>>,
}

impl FullSyncManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sources: Vec<Arc<dyn ContentSource>>,
        ingestor: Arc<Ingestor>,
        quota: Arc<QuotaTracker>,
        jobs: Arc<dyn JobStore>,
        lock: Arc<dyn RunLock>,
        cache: Arc<dyn CacheInvalidator>,
        webhook: Option<WebhookNotifier>,
        settings: FullSyncSettings,
    ) -> Self {
        Self {
            sources,
            ingestor,
            quota,
            jobs,
            lock,
            cache,
            webhook,
            settings,
            controls: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a pending job and starts it in the background. Returns as soon as the
    /// job is registered; progress is observed through [`get_job`](Self::get_job).
    pub async fn start_full_sync(self: &Arc<Self>, config: FullSyncConfig) -> Result<JobId, SyncError> {
        validate_config(&config)?;
        if self.sources.is_empty() {
            return Err(SyncError::Validation("no content source is configured".into()));
        }
        let guard = self.acquire_slot().await?;

        let job_id = JobId::new();
        self.jobs
            .insert(FullSyncJob::pending(job_id, config.clone(), Utc::now()))
            .await?;
        let control = JobControl::default();
        self.controls.lock().await.insert(job_id, control.clone());
        info!(
            %job_id,
            batch_size = config.batch_size,
            max_retries = config.max_retries,
            priority = ?config.priority,
            force_refresh = config.force_refresh,
            "full sync job accepted"
        );

        let span = info_span!("full_sync", %job_id);
        let worker = tokio::spawn(self.clone().execute(job_id, config, control).instrument(span));
        let this = self.clone();
        tokio::spawn(async move {
            let failure = match worker.await {
                Ok(Ok(())) => None,
                Ok(Err(err)) => Some(err.to_string()),
                Err(join_err) => Some(format!("job task aborted: {join_err}")),
            };
            if let Some(message) = failure {
                this.fail(job_id, message).await;
            }
            this.controls.lock().await.remove(&job_id);
            drop(guard);
        });
        Ok(job_id)
    }

    pub async fn get_job(&self, job_id: JobId) -> Result<FullSyncJob, SyncError> {
        self.jobs
            .get(job_id)
            .await?
            .ok_or_else(|| SyncError::JobNotFound(job_id.to_string()))
    }

    pub async fn list_jobs(&self) -> Result<Vec<FullSyncJob>, SyncError> {
        Ok(self.jobs.list().await?)
    }

    pub async fn active_job(&self) -> Result<Option<FullSyncJob>, SyncError> {
        Ok(self.jobs.find_active().await?)
    }

    /// Drops terminal jobs that finished more than `older_than` ago.
    pub async fn prune_finished(&self, older_than: chrono::Duration) -> Result<usize, SyncError> {
        let pruned = self.jobs.prune_terminal(Utc::now() - older_than).await?;
        if pruned > 0 {
            info!(pruned, "pruned finished full sync jobs");
        }
        Ok(pruned)
    }

    pub async fn cancel_job(&self, job_id: JobId, force: bool) -> Result<CancelOutcome, SyncError> {
        let Some(job) = self.jobs.get(job_id).await? else {
            return Ok(CancelOutcome {
                found: false,
                cancelled: false,
            });
        };
        if job.status.is_terminal() {
            return Ok(CancelOutcome {
                found: true,
                cancelled: false,
            });
        }

        let control = self.controls.lock().await.get(&job_id).cloned();
        // Without a live worker there is nothing to wait for.
        let immediate = force || control.is_none();
        let now = Utc::now();
        let updated = self
            .update(job_id, move |job| {
                if job.status.is_terminal() {
                    return;
                }
                job.cancel_requested = true;
                if immediate {
                    job.status = JobStatus::Cancelled;
                    job.finished_at = Some(now);
                    job.estimated_completion = None;
                }
            })
            .await?;

        if let Some(control) = control {
            control.graceful.cancel();
            if force {
                control.force.cancel();
            }
        }
        let cancelled = updated.map(|job| job.cancel_requested).unwrap_or(false);
        info!(%job_id, force, cancelled, "full sync cancellation requested");
        Ok(CancelOutcome {
            found: true,
            cancelled,
        })
    }

    async fn acquire_slot(&self) -> Result<RunLockGuard, SyncError> {
        for _ in 0..5 {
            if let Some(guard) = RunLockGuard::acquire(self.lock.clone(), FULL_SYNC_LOCK) {
                return Ok(guard);
            }
            match self.jobs.find_active().await? {
                Some(active) => {
                    return Err(SyncError::AlreadyRunning {
                        scope: FULL_SYNC_LOCK.to_string(),
                        active_job: Some(active.job_id),
                        estimated_completion: active.estimated_completion,
                    })
                }
                // The previous job is terminal and its worker is releasing the slot.
                None => tokio::time::sleep(Duration::from_millis(20)).await,
            }
        }
        Err(SyncError::already_running(FULL_SYNC_LOCK))
    }

    async fn update(
        &self,
        job_id: JobId,
        mutation: impl FnOnce(&mut FullSyncJob) + Send + 'static,
    ) -> Result<Option<FullSyncJob>, SyncError> {
        Ok(self.jobs.update(job_id, Box::new(mutation)).await?)
    }

    fn plan(&self) -> Vec<BatchPlan> {
        let mut plan = Vec::new();
        for source in &self.sources {
            for query in &self.settings.queries {
                for page in 1..=self.settings.pages_per_query.max(1) {
                    plan.push(BatchPlan {
                        source: source.clone(),
                        query: query.clone(),
                        page,
                    });
                }
            }
        }
        plan
    }

    async fn execute(
        self: Arc<Self>,
        job_id: JobId,
        config: FullSyncConfig,
        control: JobControl,
    ) -> Result<(), SyncError> {
        let started_at = Utc::now();
        let clock = Instant::now();
        let batch_size = config.batch_size as usize;
        let plan = self.plan();
        let total = plan.len();
        let include_analytics = config.include_analytics;

        self.update(job_id, move |job| {
            if job.status == JobStatus::Pending {
                job.status = JobStatus::Running;
                job.started_at = Some(started_at);
            }
            job.progress.batches_total = total;
            job.progress.items_total = total * batch_size;
            if include_analytics {
                job.analytics.get_or_insert_with(Default::default);
            }
        })
        .await?;
        info!(batches = total, "full sync job running");

        let mut seen: HashSet<NaturalKey> = HashSet::new();
        if !config.force_refresh {
            let mut kinds: Vec<_> = self.sources.iter().map(|s| s.kind()).collect();
            kinds.sort();
            kinds.dedup();
            for kind in kinds {
                seen.extend(self.ingestor.store().natural_keys(kind).await?);
            }
        }

        let delay = priority_delay(self.settings.batch_delay, config.priority);
        let mut tally = JobTally::default();
        let mut skipped_sources: HashSet<&'static str> = HashSet::new();
        let mut exhausted_queries: HashSet<(&'static str, String)> = HashSet::new();
        let mut executed = 0usize;
        let mut cancelled = false;

        for batch in &plan {
            let source_id = batch.source.source_id();
            if skipped_sources.contains(source_id)
                || exhausted_queries.contains(&(source_id, batch.query.clone()))
            {
                self.update(job_id, move |job| {
                    job.progress.batches_total = job.progress.batches_total.saturating_sub(1);
                    job.progress.items_total = job.progress.items_total.saturating_sub(batch_size);
                })
                .await?;
                continue;
            }

            if executed > 0 && !delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = control.graceful.cancelled() => {}
                }
            }
            if control.force.is_cancelled() {
                return self.finish_forced(job_id, &config, &tally, started_at).await;
            }
            if control.graceful.is_cancelled() {
                cancelled = true;
                break;
            }

            let result = tokio::select! {
                biased;
                _ = control.force.cancelled() => None,
                result = self.run_batch(batch, &config, &mut seen) => Some(result),
            };
            let Some(result) = result else {
                return self.finish_forced(job_id, &config, &tally, started_at).await;
            };
            executed += 1;

            let mut fetched = 0usize;
            let mut stored: Vec<ContentItem> = Vec::new();
            match result {
                BatchResult::Ingested(outcome) => {
                    fetched = outcome.fetched;
                    if let Some(err) = &outcome.storage_failure {
                        warn!(source_id, page = batch.page, error = %err, "storage failure aborted batch");
                    }
                    if fetched < batch_size {
                        exhausted_queries.insert((source_id, batch.query.clone()));
                    }
                    tally.absorb(&outcome);
                    if include_analytics {
                        stored = outcome.stored;
                    }
                }
                BatchResult::Failed(error) => tally.fail(error),
                BatchResult::QuotaExhausted(error) => {
                    warn!(source_id, "quota exhausted; skipping remaining batches for source");
                    skipped_sources.insert(source_id);
                    tally.fail(error);
                }
            }

            let elapsed = clock.elapsed();
            self.update(job_id, move |job| {
                let progress = &mut job.progress;
                progress.batches_completed += 1;
                progress.items_processed += fetched;
                progress.items_total = progress
                    .items_total
                    .saturating_sub(batch_size.saturating_sub(fetched))
                    .max(progress.items_processed);
                if let Some(analytics) = job.analytics.as_mut() {
                    for item in &stored {
                        analytics.record(item);
                    }
                }
                let remaining = progress.batches_total.saturating_sub(progress.batches_completed);
                job.estimated_completion = remaining_eta(elapsed, executed, delay, remaining)
                    .and_then(|eta| chrono::Duration::from_std(eta).ok())
                    .and_then(|eta| Utc::now().checked_add_signed(eta));
            })
            .await?;
            debug!(source_id, query = %batch.query, page = batch.page, fetched, "batch complete");
        }

        // a graceful cancel that lands during the last batch, or while every
        // remaining batch is skipped, never reaches the check inside the loop
        cancelled |= control.graceful.is_cancelled();
        let run = tally.to_run(job_id, started_at);
        let final_status = if cancelled {
            JobStatus::Cancelled
        } else {
            JobStatus::Completed
        };
        let finished = self
            .update(job_id, move |job| {
                if job.status.is_terminal() {
                    job.result.get_or_insert(run);
                    return;
                }
                job.status = final_status;
                job.finished_at = Some(Utc::now());
                job.estimated_completion = None;
                job.result = Some(run);
            })
            .await?;

        if tally.wrote_anything() {
            self.cache.invalidate(LISTING_SCOPE).await;
        }
        info!(
            status = ?final_status,
            processed = tally.processed,
            created = tally.created,
            updated = tally.updated,
            errors = tally.errors.len(),
            "full sync job finished"
        );
        self.notify(&config, finished);
        Ok(())
    }

    async fn run_batch(
        &self,
        batch: &BatchPlan,
        config: &FullSyncConfig,
        seen: &mut HashSet<NaturalKey>,
    ) -> BatchResult {
        let source = &batch.source;
        let source_id = source.source_id();
        let item_ref = format!("batch:{source_id}:{}:{}", batch.query, batch.page);
        let mut attempt = 0u32;

        let items = loop {
            if self.quota.remaining(source.quota_api()).await == 0 {
                return BatchResult::QuotaExhausted(RunError::new(
                    item_ref,
                    format!("quota exceeded for {}", source.quota_api()),
                ));
            }
            match source
                .fetch_batch(&batch.query, batch.page, config.batch_size)
                .await
            {
                Ok(items) => break items,
                Err(AdapterError::QuotaExceeded(quota)) => {
                    return BatchResult::QuotaExhausted(RunError::new(item_ref, quota.to_string()))
                }
                Err(err) if err.is_retryable() && attempt < config.max_retries => {
                    let delay = self.settings.retry_backoff.delay_for_attempt(attempt as usize);
                    attempt += 1;
                    warn!(source_id, page = batch.page, attempt, error = %err, "batch failed; retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    warn!(source_id, page = batch.page, attempts = attempt + 1, error = %err, "batch failed");
                    return BatchResult::Failed(RunError::new(item_ref, err.to_string()));
                }
            }
        };

        BatchResult::Ingested(self.ingestor.ingest(items, seen, Utc::now()).await)
    }

    /// The job was already marked cancelled by [`cancel_job`](Self::cancel_job); record
    /// what the committed batches achieved.
    async fn finish_forced(
        &self,
        job_id: JobId,
        config: &FullSyncConfig,
        tally: &JobTally,
        started_at: DateTime<Utc>,
    ) -> Result<(), SyncError> {
        let run = tally.to_run(job_id, started_at);
        let finished = self
            .update(job_id, move |job| {
                job.result.get_or_insert(run);
            })
            .await?;
        if tally.wrote_anything() {
            self.cache.invalidate(LISTING_SCOPE).await;
        }
        info!(processed = tally.processed, "full sync job force-cancelled");
        self.notify(config, finished);
        Ok(())
    }

    async fn fail(&self, job_id: JobId, message: String) {
        warn!(%job_id, error = %message, "full sync job failed");
        let now = Utc::now();
        let updated = self
            .update(job_id, move |job| {
                if job.status.is_terminal() {
                    return;
                }
                job.status = JobStatus::Failed;
                job.failure = Some(message);
                job.finished_at = Some(now);
                job.estimated_completion = None;
            })
            .await;
        match updated {
            Ok(Some(job)) => {
                let config = job.config.clone();
                self.notify(&config, Some(job));
            }
            Ok(None) => {}
            Err(err) => warn!(%job_id, error = %err, "could not record job failure"),
        }
    }

    fn notify(&self, config: &FullSyncConfig, job: Option<FullSyncJob>) {
        if let (Some(url), Some(notifier), Some(job)) = (&config.webhook, &self.webhook, job) {
            notifier.notify(url.clone(), job);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_scales_batch_delay() {
        let base = Duration::from_millis(500);
        assert_eq!(priority_delay(base, JobPriority::High), Duration::ZERO);
        assert_eq!(priority_delay(base, JobPriority::Normal), base);
        assert_eq!(priority_delay(base, JobPriority::Low), Duration::from_secs(1));
    }

    #[test]
    fn config_validation_rejects_bad_values() {
        assert!(validate_config(&FullSyncConfig::default()).is_ok());
        let zero = FullSyncConfig {
            batch_size: 0,
            ..Default::default()
        };
        assert!(matches!(validate_config(&zero), Err(SyncError::Validation(_))));
        let retries = FullSyncConfig {
            max_retries: 50,
            ..Default::default()
        };
        assert!(matches!(validate_config(&retries), Err(SyncError::Validation(_))));
        let hook = FullSyncConfig {
            webhook: Some("ftp://example.org/done".into()),
            ..Default::default()
        };
        assert!(matches!(validate_config(&hook), Err(SyncError::Validation(_))));
        let ok_hook = FullSyncConfig {
            webhook: Some("https://example.org/done".into()),
            ..Default::default()
        };
        assert!(validate_config(&ok_hook).is_ok());
    }

    #[test]
    fn eta_saturates_instead_of_overflowing() {
        let eta = remaining_eta(Duration::from_secs(10), 2, Duration::from_secs(1), 4);
        assert_eq!(eta, Some(Duration::from_secs(24)));
        assert_eq!(remaining_eta(Duration::from_secs(3), 0, Duration::ZERO, 1), Some(Duration::from_secs(3)));
        assert_eq!(remaining_eta(Duration::ZERO, 1, Duration::MAX, 2), None);
        assert_eq!(remaining_eta(Duration::ZERO, 1, Duration::MAX, 0), Some(Duration::ZERO));
    }

    #[test]
    fn rejected_items_do_not_fail_the_job() {
        let mut tally = JobTally::default();
        tally.absorb(&IngestOutcome {
            fetched: 2,
            created: 1,
            rejected: 1,
            errors: vec![RunError::new("https://example.org/a", "title is required")],
            ..Default::default()
        });
        let run = tally.to_run(JobId::new(), Utc::now());
        assert!(run.success);
        assert_eq!(run.errors.len(), 1);

        tally.fail(RunError::new("source:news-fake", "upstream returned 503"));
        assert!(!tally.to_run(JobId::new(), Utc::now()).success);
    }

    #[test]
    fn storage_failure_fails_the_job() {
        let mut tally = JobTally::default();
        tally.absorb(&IngestOutcome {
            fetched: 1,
            storage_failure: Some(portal_storage::StorageError::Backend("connection reset".into())),
            ..Default::default()
        });
        assert!(!tally.to_run(JobId::new(), Utc::now()).success);
    }
}
