//! Error types for pipelines and dispatch.

use std::path::PathBuf;
use std::time::Duration;

use ferret_backend::{AuthError, BackendError};
use ferret_publish::UpstreamError;
use ferret_scheduler::SchedulerError;
use thiserror::Error;

/// Failure of a single step.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct StepError {
    pub message: String,
    /// Whether running the item again may succeed.
    pub retryable: bool,
    /// Minimum wait before a retry, when the failing service asked for one.
    pub retry_after: Option<Duration>,
}

impl StepError {
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
            retry_after: None,
        }
    }

    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
            retry_after: None,
        }
    }
}

impl From<UpstreamError> for StepError {
    fn from(e: UpstreamError) -> Self {
        Self {
            retryable: e.is_retryable(),
            retry_after: e.retry_after_secs().map(Duration::from_secs),
            message: format!("{} ({})", e, e.kind()),
        }
    }
}

impl From<BackendError> for StepError {
    fn from(e: BackendError) -> Self {
        match e {
            BackendError::Unavailable { .. } => Self::retryable(e.to_string()),
            BackendError::Serialization(_) => Self::permanent(e.to_string()),
        }
    }
}

impl From<AuthError> for StepError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::Generation(_) => Self::retryable(format!("auth: {}", e)),
            _ => Self::permanent(format!("auth: {}", e)),
        }
    }
}

/// Errors from building or running a workflow.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A node or workflow definition is unusable.
    #[error("invalid workflow: {0}")]
    Validation(String),

    /// A node failed; later nodes did not run.
    #[error("node '{node}' failed: {source}")]
    StepFailed {
        node: String,
        #[source]
        source: StepError,
    },

    /// The run's deadline passed before or during `node`.
    #[error("deadline exceeded at node '{node}'")]
    DeadlineExceeded { node: String },
}

impl PipelineError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Validation(_) => false,
            Self::StepFailed { source, .. } => source.retryable,
            Self::DeadlineExceeded { .. } => true,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::StepFailed { source, .. } => source.retry_after,
            _ => None,
        }
    }
}

/// Errors appending to or reading the publish log.
#[derive(Debug, Error)]
pub enum PublishLogError {
    /// The log file could not be opened or written.
    #[error("publish log unavailable at {path}: {source}")]
    Unavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Logged publications could not be restored into the cache.
    #[error("restoring publications: {0}")]
    Cache(#[from] BackendError),
}

/// Errors from dispatching claimed items.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    PublishLog(#[from] PublishLogError),
}

impl DispatchError {
    /// Whether the caller should retry after a backoff.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Scheduler(e) => e.is_retryable(),
            Self::PublishLog(PublishLogError::Unavailable { .. }) => true,
            Self::PublishLog(PublishLogError::Cache(_)) => true,
            Self::PublishLog(PublishLogError::Serialization(_)) => false,
        }
    }
}
