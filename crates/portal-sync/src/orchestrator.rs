//! Regular sync: one fan-out pass over the configured sources.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use portal_adapters::{AdapterError, ContentSource};
use portal_core::{ContentItem, RunError, SyncRun, SyncStatus, SyncType};
use portal_storage::{
    CacheInvalidator, QuotaTracker, RunLock, RunLockGuard, RunStore, StorageError, LISTING_SCOPE,
};
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::error::SyncError;
use crate::pipeline::Ingestor;

#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub queries: Vec<String>,
    pub pages_per_run: u32,
    pub page_size: u32,
}

#[derive(Debug, Default)]
struct SourceFetch {
    items: Vec<ContentItem>,
    errors: Vec<RunError>,
    ok: bool,
}

pub struct SyncOrchestrator {
    sources: Vec<Arc<dyn ContentSource>>,
    ingestor: Arc<Ingestor>,
    quota: Arc<QuotaTracker>,
    runs: Arc<dyn RunStore>,
    lock: Arc<dyn RunLock>,
    cache: Arc<dyn CacheInvalidator>,
    settings: SyncSettings,
}

impl SyncOrchestrator {
    pub fn new(
        sources: Vec<Arc<dyn ContentSource>>,
        ingestor: Arc<Ingestor>,
        quota: Arc<QuotaTracker>,
        runs: Arc<dyn RunStore>,
        lock: Arc<dyn RunLock>,
        cache: Arc<dyn CacheInvalidator>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            sources,
            ingestor,
            quota,
            runs,
            lock,
            cache,
            settings,
        }
    }

    /// Runs one sync pass to completion. Rejected with `AlreadyRunning` while another
    /// pass of the same type is in flight; no run record is created in that case.
    ///
    /// The pass runs on its own task which owns the lock and the run record, so
    /// dropping the returned future does not release the type early.
    pub async fn start(self: &Arc<Self>, sync_type: SyncType) -> Result<SyncRun, SyncError> {
        let Some(guard) = RunLockGuard::acquire(self.lock.clone(), sync_type.lock_key()) else {
            return Err(SyncError::already_running(sync_type.lock_key()));
        };
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        self.runs.mark_running(sync_type, started_at).await?;
        info!(%run_id, %sync_type, "sync run started");

        let pass = tokio::spawn(self.clone().run_pass(guard, run_id, sync_type, started_at));
        match pass.await {
            Ok(result) => result,
            Err(join_err) => Err(SyncError::Storage(StorageError::Backend(format!(
                "sync task failed: {join_err}"
            )))),
        }
    }

    async fn run_pass(
        self: Arc<Self>,
        guard: RunLockGuard,
        run_id: Uuid,
        sync_type: SyncType,
        started_at: DateTime<Utc>,
    ) -> Result<SyncRun, SyncError> {
        // A panic inside the pass must still leave the type idle with a recorded run.
        let this = self.clone();
        let span = info_span!("sync_run", %run_id, %sync_type);
        let task = tokio::spawn(
            async move { this.execute(run_id, sync_type, started_at).await }.instrument(span),
        );
        let run = match task.await {
            Ok(run) => run,
            Err(join_err) => SyncRun {
                run_id,
                sync_type,
                started_at,
                finished_at: Utc::now(),
                success: false,
                processed_count: 0,
                created_count: 0,
                updated_count: 0,
                unchanged_count: 0,
                rejected_count: 0,
                errors: vec![RunError::new(
                    format!("run:{run_id}"),
                    format!("sync task aborted: {join_err}"),
                )],
            },
        };

        if let Err(err) = self.runs.record(run.clone()).await {
            warn!(%run_id, %sync_type, error = %err, "failed to record sync run");
            if let Err(idle_err) = self.runs.mark_idle(sync_type).await {
                warn!(%sync_type, error = %idle_err, "failed to clear running state");
            }
            drop(guard);
            return Err(err.into());
        }
        drop(guard);
        info!(
            %run_id,
            %sync_type,
            success = run.success,
            processed = run.processed_count,
            created = run.created_count,
            updated = run.updated_count,
            rejected = run.rejected_count,
            errors = run.errors.len(),
            "sync run finished"
        );
        Ok(run)
    }

    pub async fn status(&self, sync_type: SyncType) -> Result<SyncStatus, SyncError> {
        Ok(self.runs.status(sync_type).await?)
    }

    async fn execute(&self, run_id: Uuid, sync_type: SyncType, started_at: DateTime<Utc>) -> SyncRun {
        let mut errors = Vec::new();
        let mut success = true;

        for kind in sync_type.kinds() {
            if !self.sources.iter().any(|s| s.kind() == *kind) {
                warn!(%kind, "no source configured");
                errors.push(RunError::new(format!("source:{kind}"), "no source configured"));
                success = false;
            }
        }

        let selected: Vec<Arc<dyn ContentSource>> = self
            .sources
            .iter()
            .filter(|s| sync_type.includes(s.kind()))
            .cloned()
            .collect();
        let fetches = join_all(selected.iter().map(|source| self.fetch_source(source.as_ref()))).await;

        let mut items = Vec::new();
        for fetch in fetches {
            success &= fetch.ok;
            errors.extend(fetch.errors);
            items.extend(fetch.items);
        }

        let outcome = self
            .ingestor
            .ingest(items, &mut HashSet::new(), Utc::now())
            .await;
        errors.extend(outcome.errors.iter().cloned());
        if let Some(err) = &outcome.storage_failure {
            warn!(error = %err, "storage failure aborted the run");
            success = false;
        }
        if outcome.wrote_anything() {
            self.cache.invalidate(LISTING_SCOPE).await;
        }

        SyncRun {
            run_id,
            sync_type,
            started_at,
            finished_at: Utc::now(),
            success,
            processed_count: outcome.fetched,
            created_count: outcome.created,
            updated_count: outcome.updated,
            unchanged_count: outcome.unchanged,
            rejected_count: outcome.rejected,
            errors,
        }
    }

    /// Fetches every configured query/page of one source. A failure stops this source
    /// only; items already fetched are kept.
    async fn fetch_source(&self, source: &dyn ContentSource) -> SourceFetch {
        let mut fetch = SourceFetch {
            ok: true,
            ..Default::default()
        };
        let source_id = source.source_id();

        'queries: for query in &self.settings.queries {
            for page in 1..=self.settings.pages_per_run {
                if self.quota.remaining(source.quota_api()).await == 0 {
                    warn!(source_id, "daily quota exhausted; skipping source");
                    fetch.errors.push(RunError::new(
                        format!("source:{source_id}"),
                        format!("quota exceeded for {}", source.quota_api()),
                    ));
                    fetch.ok = false;
                    break 'queries;
                }
                match source.fetch_batch(query, page, self.settings.page_size).await {
                    Ok(batch) => {
                        let short = (batch.len() as u32) < self.settings.page_size;
                        fetch.items.extend(batch);
                        if short {
                            break;
                        }
                    }
                    Err(err) => {
                        warn!(source_id, query = %query, page, error = %err, "source fetch failed");
                        let message = match &err {
                            AdapterError::QuotaExceeded(q) => format!("quota exceeded: {q}"),
                            other => other.to_string(),
                        };
                        fetch.errors.push(RunError::new(format!("source:{source_id}"), message));
                        fetch.ok = false;
                        break 'queries;
                    }
                }
            }
        }
        fetch
    }
}
