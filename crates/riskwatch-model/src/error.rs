//! Error types for the domain model
//!
//! Two families live here:
//! - [`ModelError`] for parsing user-supplied identifiers (roles, scopes, quarters)
//! - [`ApiError`] for failures reported by the remote collaborators, with a typed
//!   [`ErrorClass`] so callers never string-match on HTTP status codes

/// Errors while parsing model values from text
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    /// Role name not recognized
    #[error("unknown role: '{0}'")]
    UnknownRole(String),

    /// Scope name not recognized
    #[error("unknown scope: '{0}'")]
    UnknownScope(String),

    /// Quarter label not in Q1-Q4
    #[error("invalid quarter: '{0}'")]
    InvalidQuarter(String),

    /// Prediction kind not recognized
    #[error("unknown prediction kind: '{0}'")]
    UnknownKind(String),
}

/// Classification of collaborator failures
///
/// Drives the cache-level policy: authorization failures are silent at the
/// cache layer (the auth collaborator redirects), everything else, including
/// permission denials, is surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Session missing or expired (401)
    Authorization,
    /// Authenticated but denied access to the resource (403)
    Permission,
    /// Network or server failure; retrying may succeed
    Transient,
    /// Request rejected as malformed or conflicting
    Validation,
    /// Target resource does not exist
    NotFound,
}

/// Errors reported by the prediction, statistics and job collaborators
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    /// Not authenticated (401)
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Authenticated but not permitted (403)
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Resource not found (404)
    #[error("not found: {0}")]
    NotFound(String),

    /// Request rejected by validation (400/409/422)
    #[error("validation failed: {0}")]
    Validation(String),

    /// Transport-level failure
    #[error("network error: {0}")]
    Network(String),

    /// Server-side failure
    #[error("server error ({status}): {message}")]
    Server {
        /// HTTP status code
        status: u16,
        /// Server-provided message
        message: String,
    },

    /// Response body could not be decoded
    #[error("decode error: {0}")]
    Decode(String),
}

impl ApiError {
    /// Map an HTTP status code onto an error variant
    #[must_use]
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 => Self::Unauthorized(message),
            403 => Self::Forbidden(message),
            404 => Self::NotFound(message),
            400 | 409 | 422 => Self::Validation(message),
            _ => Self::Server { status, message },
        }
    }

    /// Classify this error
    #[inline]
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Unauthorized(_) => ErrorClass::Authorization,
            Self::Forbidden(_) => ErrorClass::Permission,
            Self::NotFound(_) => ErrorClass::NotFound,
            Self::Validation(_) | Self::Decode(_) => ErrorClass::Validation,
            Self::Network(_) | Self::Server { .. } => ErrorClass::Transient,
        }
    }

    /// Check if error is an authorization failure
    #[inline]
    #[must_use]
    pub fn is_authorization(&self) -> bool {
        self.class() == ErrorClass::Authorization
    }

    /// Check if error is retryable
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Transient
    }
}
