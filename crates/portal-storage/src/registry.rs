//! Job and run registries. In-memory defaults; a persistent backend implements the
//! same traits to survive restarts or to share state between instances.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use portal_core::{FullSyncJob, JobId, RunState, SyncRun, SyncStatus, SyncType};
use tokio::sync::RwLock;

use crate::StorageError;

/// In-place edit applied atomically to one job record.
pub type JobMutation = Box<dyn FnOnce(&mut FullSyncJob) + Send>;

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert(&self, job: FullSyncJob) -> Result<(), StorageError>;

    async fn get(&self, job_id: JobId) -> Result<Option<FullSyncJob>, StorageError>;

    /// Applies `mutation` and returns the updated record, or `None` for an unknown id.
    async fn update(
        &self,
        job_id: JobId,
        mutation: JobMutation,
    ) -> Result<Option<FullSyncJob>, StorageError>;

    /// Newest first.
    async fn list(&self) -> Result<Vec<FullSyncJob>, StorageError>;

    async fn find_active(&self) -> Result<Option<FullSyncJob>, StorageError>;

    /// Removes terminal jobs that finished before `before`; returns how many were dropped.
    async fn prune_terminal(&self, before: DateTime<Utc>) -> Result<usize, StorageError>;
}

#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, FullSyncJob>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert(&self, job: FullSyncJob) -> Result<(), StorageError> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.job_id) {
            return Err(StorageError::Backend(format!("duplicate job id {}", job.job_id)));
        }
        jobs.insert(job.job_id, job);
        Ok(())
    }

    async fn get(&self, job_id: JobId) -> Result<Option<FullSyncJob>, StorageError> {
        Ok(self.jobs.read().await.get(&job_id).cloned())
    }

    async fn update(
        &self,
        job_id: JobId,
        mutation: JobMutation,
    ) -> Result<Option<FullSyncJob>, StorageError> {
        let mut jobs = self.jobs.write().await;
        Ok(jobs.get_mut(&job_id).map(|job| {
            mutation(job);
            job.clone()
        }))
    }

    async fn list(&self) -> Result<Vec<FullSyncJob>, StorageError> {
        let mut jobs: Vec<FullSyncJob> = self.jobs.read().await.values().cloned().collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(jobs)
    }

    async fn find_active(&self) -> Result<Option<FullSyncJob>, StorageError> {
        Ok(self
            .jobs
            .read()
            .await
            .values()
            .filter(|job| job.status.is_active())
            .max_by_key(|job| job.created_at)
            .cloned())
    }

    async fn prune_terminal(&self, before: DateTime<Utc>) -> Result<usize, StorageError> {
        let mut jobs = self.jobs.write().await;
        let count = jobs.len();
        jobs.retain(|_, job| {
            !(job.status.is_terminal() && job.finished_at.map(|at| at < before).unwrap_or(false))
        });
        Ok(count - jobs.len())
    }
}

#[async_trait]
pub trait RunStore: Send + Sync {
    async fn mark_running(&self, sync_type: SyncType, since: DateTime<Utc>) -> Result<(), StorageError>;

    /// Stores the completed run and returns the sync type to idle.
    async fn record(&self, run: SyncRun) -> Result<(), StorageError>;

    /// Clears the running marker without touching the last recorded run.
    async fn mark_idle(&self, sync_type: SyncType) -> Result<(), StorageError>;

    async fn status(&self, sync_type: SyncType) -> Result<SyncStatus, StorageError>;
}

#[derive(Debug, Default)]
struct RunSlot {
    running_since: Option<DateTime<Utc>>,
    last_run: Option<SyncRun>,
}

#[derive(Debug, Default)]
pub struct InMemoryRunStore {
    slots: RwLock<HashMap<SyncType, RunSlot>>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    async fn mark_running(&self, sync_type: SyncType, since: DateTime<Utc>) -> Result<(), StorageError> {
        let mut slots = self.slots.write().await;
        slots.entry(sync_type).or_default().running_since = Some(since);
        Ok(())
    }

    async fn record(&self, run: SyncRun) -> Result<(), StorageError> {
        let mut slots = self.slots.write().await;
        let slot = slots.entry(run.sync_type).or_default();
        slot.running_since = None;
        slot.last_run = Some(run);
        Ok(())
    }

    async fn mark_idle(&self, sync_type: SyncType) -> Result<(), StorageError> {
        let mut slots = self.slots.write().await;
        if let Some(slot) = slots.get_mut(&sync_type) {
            slot.running_since = None;
        }
        Ok(())
    }

    async fn status(&self, sync_type: SyncType) -> Result<SyncStatus, StorageError> {
        let slots = self.slots.read().await;
        let slot = slots.get(&sync_type);
        let running_since = slot.and_then(|s| s.running_since);
        Ok(SyncStatus {
            sync_type,
            state: if running_since.is_some() {
                RunState::Running
            } else {
                RunState::Idle
            },
            running_since,
            last_run: slot.and_then(|s| s.last_run.clone()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use portal_core::{FullSyncConfig, JobStatus};
    use uuid::Uuid;

    #[tokio::test]
    async fn job_store_updates_and_prunes_terminal_jobs() {
        let store = InMemoryJobStore::new();
        let now = Utc::now();
        let old = FullSyncJob::pending(JobId::new(), FullSyncConfig::default(), now - Duration::hours(2));
        let active = FullSyncJob::pending(JobId::new(), FullSyncConfig::default(), now);
        let (old_id, active_id) = (old.job_id, active.job_id);
        store.insert(old).await.unwrap();
        store.insert(active).await.unwrap();

        let found = store.find_active().await.unwrap().unwrap();
        assert_eq!(found.job_id, active_id);

        let updated = store
            .update(
                old_id,
                Box::new(move |job| {
                    job.status = JobStatus::Completed;
                    job.finished_at = Some(now - Duration::hours(1));
                }),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.status, JobStatus::Completed);
        assert!(store.update(JobId::new(), Box::new(|_| {})).await.unwrap().is_none());

        assert_eq!(store.prune_terminal(now).await.unwrap(), 1);
        let remaining = store.list().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].job_id, active_id);
    }

    #[tokio::test]
    async fn run_store_tracks_running_and_last_run() {
        let store = InMemoryRunStore::new();
        let started = Utc::now();
        store.mark_running(SyncType::News, started).await.unwrap();
        assert_eq!(store.status(SyncType::News).await.unwrap().state, RunState::Running);
        assert_eq!(store.status(SyncType::Video).await.unwrap().state, RunState::Idle);

        store
            .record(SyncRun {
                run_id: Uuid::new_v4(),
                sync_type: SyncType::News,
                started_at: started,
                finished_at: started,
                success: true,
                processed_count: 3,
                created_count: 3,
                updated_count: 0,
                unchanged_count: 0,
                rejected_count: 0,
                errors: vec![],
            })
            .await
            .unwrap();
        let status = store.status(SyncType::News).await.unwrap();
        assert_eq!(status.state, RunState::Idle);
        assert_eq!(status.last_run.unwrap().processed_count, 3);
    }

    #[tokio::test]
    async fn mark_idle_keeps_the_previous_run() {
        let store = InMemoryRunStore::new();
        store.mark_running(SyncType::Video, Utc::now()).await.unwrap();
        store.mark_idle(SyncType::Video).await.unwrap();
        store.mark_idle(SyncType::Combined).await.unwrap();

        let status = store.status(SyncType::Video).await.unwrap();
        assert_eq!(status.state, RunState::Idle);
        assert!(status.running_since.is_none());
        assert!(status.last_run.is_none());
    }
}
