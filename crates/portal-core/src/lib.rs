//! Core domain model for the content portal sync subsystem.

pub mod content;
pub mod run;

pub use content::{
    Category, ContentItem, ContentKind, ContentMeta, NaturalKey, NewsArticle, ParseEnumError,
    Video,
};
pub use run::{
    FullSyncConfig, FullSyncJob, JobAnalytics, JobId, JobPriority, JobProgress, JobStatus,
    RunError, RunState, SyncRun, SyncStatus, SyncType,
};

pub const CRATE_NAME: &str = "portal-core";
