//! Sync run and full-sync job records.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::content::{Category, ContentItem, ContentKind, ParseEnumError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncType {
    News,
    Video,
    Combined,
}

impl SyncType {
    pub const ALL: [SyncType; 3] = [SyncType::News, SyncType::Video, SyncType::Combined];

    pub fn as_str(self) -> &'static str {
        match self {
            SyncType::News => "news",
            SyncType::Video => "video",
            SyncType::Combined => "combined",
        }
    }

    pub fn kinds(self) -> &'static [ContentKind] {
        match self {
            SyncType::News => &[ContentKind::News],
            SyncType::Video => &[ContentKind::Video],
            SyncType::Combined => &ContentKind::ALL,
        }
    }

    pub fn includes(self, kind: ContentKind) -> bool {
        self.kinds().contains(&kind)
    }

    pub fn lock_key(self) -> String {
        format!("sync:{}", self.as_str())
    }
}

impl fmt::Display for SyncType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "news" => Ok(SyncType::News),
            "video" | "videos" | "youtube" => Ok(SyncType::Video),
            "combined" | "all" => Ok(SyncType::Combined),
            _ => Err(ParseEnumError {
                expected: "sync type",
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunError {
    pub item_ref: String,
    pub message: String,
}

impl RunError {
    pub fn new(item_ref: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            item_ref: item_ref.into(),
            message: message.into(),
        }
    }
}

/// Outcome of one orchestrator invocation, also used as the terminal result of a full-sync job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRun {
    pub run_id: Uuid,
    pub sync_type: SyncType,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub success: bool,
    pub processed_count: usize,
    pub created_count: usize,
    pub updated_count: usize,
    pub unchanged_count: usize,
    pub rejected_count: usize,
    pub errors: Vec<RunError>,
}

impl SyncRun {
    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Running,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub sync_type: SyncType,
    pub state: RunState,
    pub running_since: Option<DateTime<Utc>>,
    pub last_run: Option<SyncRun>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(JobId)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPriority {
    Low,
    #[default]
    Normal,
    High,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FullSyncConfig {
    pub batch_size: u32,
    pub max_retries: u32,
    pub include_analytics: bool,
    pub force_refresh: bool,
    pub webhook: Option<String>,
    pub priority: JobPriority,
}

impl Default for FullSyncConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            max_retries: 3,
            include_analytics: false,
            force_refresh: false,
            webhook: None,
            priority: JobPriority::Normal,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgress {
    pub batches_completed: usize,
    pub batches_total: usize,
    pub items_processed: usize,
    /// Estimate; revised as batches finish or queries run dry.
    pub items_total: usize,
}

impl JobProgress {
    pub fn percent(&self) -> f64 {
        if self.items_total == 0 {
            return 0.0;
        }
        (self.items_processed as f64 / self.items_total as f64 * 100.0).min(100.0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobAnalytics {
    pub by_category: BTreeMap<Category, usize>,
    pub by_kind: BTreeMap<ContentKind, usize>,
    pub items: usize,
    pub average_score: f64,
}

impl JobAnalytics {
    pub fn record(&mut self, item: &ContentItem) {
        *self.by_category.entry(item.meta().category).or_default() += 1;
        *self.by_kind.entry(item.kind()).or_default() += 1;
        let total = self.average_score * self.items as f64 + f64::from(item.relevance_score());
        self.items += 1;
        self.average_score = total / self.items as f64;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FullSyncJob {
    pub job_id: JobId,
    pub status: JobStatus,
    pub config: FullSyncConfig,
    pub progress: JobProgress,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub estimated_completion: Option<DateTime<Utc>>,
    pub cancel_requested: bool,
    pub result: Option<SyncRun>,
    pub analytics: Option<JobAnalytics>,
    pub failure: Option<String>,
}

impl FullSyncJob {
    pub fn pending(job_id: JobId, config: FullSyncConfig, now: DateTime<Utc>) -> Self {
        Self {
            job_id,
            status: JobStatus::Pending,
            config,
            progress: JobProgress::default(),
            created_at: now,
            started_at: None,
            finished_at: None,
            estimated_completion: None,
            cancel_requested: false,
            result: None,
            analytics: None,
            failure: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::NewsArticle;
    use chrono::TimeZone;

    #[test]
    fn full_sync_config_fills_missing_fields_with_defaults() {
        let cfg: FullSyncConfig =
            serde_json::from_str(r#"{"batchSize": 10, "priority": "high"}"#).unwrap();
        assert_eq!(cfg.batch_size, 10);
        assert_eq!(cfg.max_retries, 3);
        assert_eq!(cfg.priority, JobPriority::High);
        assert!(cfg.webhook.is_none());
    }

    #[test]
    fn job_status_terminality() {
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Pending.is_active());
        assert!(JobStatus::Running.is_active());
    }

    #[test]
    fn analytics_tracks_running_mean() {
        let at = Utc.with_ymd_and_hms(2026, 1, 5, 0, 0, 0).single().unwrap();
        let mut a: ContentItem = NewsArticle::new("https://a", "A", "a", at).into();
        a.meta_mut().relevance_score = 40;
        let mut b: ContentItem = NewsArticle::new("https://b", "B", "b", at).into();
        b.meta_mut().relevance_score = 80;
        b.meta_mut().category = Category::Safety;

        let mut analytics = JobAnalytics::default();
        analytics.record(&a);
        analytics.record(&b);
        assert_eq!(analytics.items, 2);
        assert!((analytics.average_score - 60.0).abs() < f64::EPSILON);
        assert_eq!(analytics.by_category[&Category::Safety], 1);
        assert_eq!(analytics.by_kind[&ContentKind::News], 2);
    }

    #[test]
    fn sync_type_kinds_and_parse() {
        assert_eq!(SyncType::Combined.kinds().len(), 2);
        assert!(SyncType::Video.includes(ContentKind::Video));
        assert!(!SyncType::Video.includes(ContentKind::News));
        assert_eq!("youtube".parse::<SyncType>().unwrap(), SyncType::Video);
        assert_eq!(SyncType::News.lock_key(), "sync:news");
    }
}
