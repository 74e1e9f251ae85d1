//! Storage boundary, HTTP fetch utilities and shared run infrastructure for the portal.

pub mod cache;
pub mod content;
pub mod fingerprint;
pub mod http;
pub mod lock;
pub mod postgres;
pub mod quota;
pub mod registry;

use thiserror::Error;

pub use cache::{CacheInvalidator, ListingCache, LISTING_SCOPE};
pub use content::{ContentStore, DeleteFilter, InMemoryContentStore, UpsertOutcome};
pub use fingerprint::{content_fingerprint, sha256_hex};
pub use http::{
    BackoffPolicy, FetchError, FetchedResponse, HttpClientConfig, HttpFetcher, RetryDisposition,
};
pub use lock::{InProcessLock, RunLock, RunLockGuard};
pub use postgres::PgContentStore;
pub use quota::{QuotaExceeded, QuotaLimit, QuotaTracker, QuotaUsage, NEWS_API, YOUTUBE_API};
pub use registry::{
    InMemoryJobStore, InMemoryRunStore, JobMutation, JobStore, RunStore,
};

pub const CRATE_NAME: &str = "portal-storage";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("item {0} has no natural key")]
    MissingNaturalKey(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("corrupt row {id}: {message}")]
    CorruptRow { id: String, message: String },
    #[error("storage backend error: {0}")]
    Backend(String),
}
