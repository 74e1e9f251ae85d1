use chrono::{DateTime, Utc};
use portal_adapters::AdapterError;
use portal_core::JobId;
use portal_storage::{QuotaExceeded, StorageError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("source {source_name} unavailable: {message}")]
    SourceUnavailable {
        source_name: String,
        message: String,
    },
    #[error(transparent)]
    QuotaExceeded(#[from] QuotaExceeded),
    #[error("{scope} is already running")]
    AlreadyRunning {
        scope: String,
        active_job: Option<JobId>,
        estimated_completion: Option<DateTime<Utc>>,
    },
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("job {0} not found")]
    JobNotFound(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl SyncError {
    pub fn already_running(scope: impl Into<String>) -> Self {
        SyncError::AlreadyRunning {
            scope: scope.into(),
            active_job: None,
            estimated_completion: None,
        }
    }
}

impl From<AdapterError> for SyncError {
    fn from(err: AdapterError) -> Self {
        match err {
            AdapterError::QuotaExceeded(quota) => SyncError::QuotaExceeded(quota),
            AdapterError::SourceUnavailable {
                source_id, message, ..
            }
            | AdapterError::Payload { source_id, message } => SyncError::SourceUnavailable {
                source_name: source_id.to_string(),
                message,
            },
        }
    }
}
