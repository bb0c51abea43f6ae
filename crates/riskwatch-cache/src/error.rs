//! Error types for the prediction cache

use riskwatch_model::{ApiError, ErrorClass};

/// Errors from a cache fetch cycle
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    /// A list request failed; the whole batch is discarded
    #[error("fetch failed: {0}")]
    Api(#[from] ApiError),

    /// The batch did not finish within the configured timeout
    #[error("fetch timed out after {after_ms}ms")]
    Timeout {
        /// Configured limit in milliseconds
        after_ms: u64,
    },
}

impl CacheError {
    /// Classify the failure
    #[inline]
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Api(e) => e.class(),
            Self::Timeout { .. } => ErrorClass::Transient,
        }
    }

    /// Whether the failure is kept out of the store-level error
    ///
    /// Authorization failures are handled by the auth collaborator.
    #[inline]
    #[must_use]
    pub fn is_silent(&self) -> bool {
        self.class() == ErrorClass::Authorization
    }
}

/// Result type alias for cache operations
pub type CacheResult<T> = Result<T, CacheError>;
