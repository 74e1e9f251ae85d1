//! Retention and cleanup: stale deletion, duplicate collapse, orphan removal, cache reset.

use std::collections::BTreeMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Months, Utc};
use portal_core::{ContentKind, RunError};
use portal_storage::{
    CacheInvalidator, ContentStore, DeleteFilter, RunLock, RunLockGuard, StorageError, LISTING_SCOPE,
};
use serde::Serialize;
use tracing::{info, warn};

use crate::dedup::DedupEngine;
use crate::error::SyncError;

pub const CLEANUP_LOCK: &str = "cleanup";

/// Items older than `max_age_months` and scored below `min_score` are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetentionRule {
    pub max_age_months: u32,
    pub min_score: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RetentionPolicy {
    pub news: RetentionRule,
    pub video: RetentionRule,
}

impl RetentionPolicy {
    pub fn rule_for(&self, kind: ContentKind) -> RetentionRule {
        match kind {
            ContentKind::News => self.news,
            ContentKind::Video => self.video,
        }
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            news: RetentionRule {
                max_age_months: 6,
                min_score: 50,
            },
            video: RetentionRule {
                max_age_months: 12,
                min_score: 40,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct KindCleanup {
    pub stale: u64,
    pub duplicates: u64,
    pub orphaned: u64,
}

impl KindCleanup {
    pub fn total(&self) -> u64 {
        self.stale + self.duplicates + self.orphaned
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupReport {
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub by_kind: BTreeMap<ContentKind, KindCleanup>,
    pub cache_entries_cleared: u64,
    pub errors: Vec<RunError>,
}

impl CleanupReport {
    pub fn total_deleted(&self) -> u64 {
        self.by_kind.values().map(KindCleanup::total).sum()
    }
}

pub struct CleanupService {
    store: Arc<dyn ContentStore>,
    cache: Arc<dyn CacheInvalidator>,
    lock: Arc<dyn RunLock>,
    policy: RetentionPolicy,
}

impl CleanupService {
    pub fn new(
        store: Arc<dyn ContentStore>,
        cache: Arc<dyn CacheInvalidator>,
        lock: Arc<dyn RunLock>,
        policy: RetentionPolicy,
    ) -> Self {
        Self {
            store,
            cache,
            lock,
            policy,
        }
    }

    pub fn policy(&self) -> RetentionPolicy {
        self.policy
    }

    pub async fn run(&self) -> Result<CleanupReport, SyncError> {
        self.run_at(Utc::now()).await
    }

    /// Each step runs even if an earlier one failed; failures land in `errors`.
    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<CleanupReport, SyncError> {
        let Some(_guard) = RunLockGuard::acquire(self.lock.clone(), CLEANUP_LOCK) else {
            return Err(SyncError::already_running(CLEANUP_LOCK));
        };
        let clock = Instant::now();
        info!("cleanup started");

        let mut by_kind: BTreeMap<ContentKind, KindCleanup> =
            ContentKind::ALL.iter().map(|kind| (*kind, KindCleanup::default())).collect();
        let mut errors = Vec::new();

        for kind in ContentKind::ALL {
            let counts = by_kind.entry(kind).or_default();
            match self.delete_stale(kind, now).await {
                Ok(removed) => counts.stale = removed,
                Err(err) => record(&mut errors, kind, "stale", err),
            }
        }
        for kind in ContentKind::ALL {
            let counts = by_kind.entry(kind).or_default();
            match self.delete_duplicates(kind).await {
                Ok(removed) => counts.duplicates = removed,
                Err(err) => record(&mut errors, kind, "duplicates", err),
            }
        }
        for kind in ContentKind::ALL {
            let counts = by_kind.entry(kind).or_default();
            match self.store.delete_where(kind, &DeleteFilter::Orphaned).await {
                Ok(removed) => counts.orphaned = removed,
                Err(err) => record(&mut errors, kind, "orphans", err),
            }
        }
        let cache_entries_cleared = self.cache.invalidate(LISTING_SCOPE).await;

        let report = CleanupReport {
            started_at: now,
            duration_ms: clock.elapsed().as_millis() as u64,
            by_kind,
            cache_entries_cleared,
            errors,
        };
        info!(
            deleted = report.total_deleted(),
            cache_entries_cleared,
            errors = report.errors.len(),
            duration_ms = report.duration_ms,
            "cleanup finished"
        );
        Ok(report)
    }

    async fn delete_stale(&self, kind: ContentKind, now: DateTime<Utc>) -> Result<u64, StorageError> {
        let rule = self.policy.rule_for(kind);
        let Some(cutoff) = now.checked_sub_months(Months::new(rule.max_age_months)) else {
            return Ok(0);
        };
        self.store
            .delete_where(
                kind,
                &DeleteFilter::StaleBelowScore {
                    published_before: cutoff,
                    score_below: rule.min_score,
                },
            )
            .await
    }

    /// Keeps the most recently published record per natural key.
    async fn delete_duplicates(&self, kind: ContentKind) -> Result<u64, StorageError> {
        let mut items = self.store.list_all(kind).await?;
        items.sort_by(|a, b| b.published_at().cmp(&a.published_at()));
        let outcome = DedupEngine::new().dedupe(&HashSet::new(), items);
        let ids: HashSet<String> = outcome
            .rejected
            .iter()
            .filter_map(|item| item.id().map(ToString::to_string))
            .collect();
        if ids.is_empty() {
            return Ok(0);
        }
        self.store.delete_where(kind, &DeleteFilter::Ids(ids)).await
    }
}

fn record(errors: &mut Vec<RunError>, kind: ContentKind, step: &str, err: StorageError) {
    warn!(%kind, step, error = %err, "cleanup step failed");
    errors.push(RunError::new(format!("cleanup:{kind}:{step}"), err.to_string()));
}
