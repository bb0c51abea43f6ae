//! Error types for the synchronization layer

use crate::jobs::{JobId, JobStatus};
use riskwatch_cache::CacheError;
use riskwatch_model::ApiError;

/// Main synchronization error type
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SyncError {
    /// Prediction fetch failed
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    /// A collaborator call failed
    #[error("api error: {0}")]
    Api(#[from] ApiError),

    /// Configuration rejected
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Operation needs an authenticated user
    #[error("no authenticated session")]
    NoSession,

    /// Job id is not tracked
    #[error("job not found: {0}")]
    JobNotFound(JobId),

    /// Job status cannot move backwards or out of a terminal state
    #[error("invalid job transition: {from} -> {to}")]
    InvalidTransition {
        /// Current status
        from: JobStatus,
        /// Requested status
        to: JobStatus,
    },
}

impl SyncError {
    /// Whether the failure is an authorization failure handled elsewhere
    #[inline]
    #[must_use]
    pub fn is_silent(&self) -> bool {
        match self {
            Self::Cache(e) => e.is_silent(),
            Self::Api(e) => e.is_authorization(),
            _ => false,
        }
    }

    /// Check if retrying the same call may succeed
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Cache(CacheError::Api(e)) | Self::Api(e) => e.is_retryable(),
            Self::Cache(CacheError::Timeout { .. }) => true,
            _ => false,
        }
    }
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// TOML could not be parsed
    #[error("parse error: {0}")]
    Parse(String),

    /// Config could not be serialized
    #[error("serialize error: {0}")]
    Serialize(String),

    /// A field holds an unusable value
    #[error("invalid {field}: {reason}")]
    Invalid {
        /// Offending field
        field: &'static str,
        /// Why it was rejected
        reason: String,
    },
}

/// Result type alias for synchronization operations
pub type SyncResult<T> = Result<T, SyncError>;
