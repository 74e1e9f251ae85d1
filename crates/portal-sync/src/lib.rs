//! Sync core: vocabulary enrichment, scoring, deduplication, regular and full syncs,
//! retention cleanup and the cron scheduler.

pub mod cleanup;
pub mod config;
pub mod dedup;
pub mod error;
pub mod full_sync;
pub mod orchestrator;
pub mod pipeline;
pub mod relevance;
pub mod scheduler;
pub mod services;
pub mod topics;
pub mod webhook;

pub use cleanup::{CleanupReport, CleanupService, KindCleanup, RetentionPolicy, RetentionRule, CLEANUP_LOCK};
pub use config::PortalConfig;
pub use dedup::{DedupEngine, DedupOutcome};
pub use error::SyncError;
pub use full_sync::{CancelOutcome, FullSyncManager, FullSyncSettings, FULL_SYNC_LOCK};
pub use orchestrator::{SyncOrchestrator, SyncSettings};
pub use pipeline::{IngestOutcome, Ingestor};
pub use relevance::RelevanceScorer;
pub use scheduler::build_scheduler;
pub use services::SyncServices;
pub use topics::{EnrichmentHook, NoopEnrichmentHook, TagRule, TopicVocabulary, VocabularyEnrichmentHook};
pub use webhook::WebhookNotifier;

pub const CRATE_NAME: &str = "portal-sync";
