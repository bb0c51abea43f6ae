//! Per-resource fetch status

use serde::{Deserialize, Serialize};
use std::fmt;

/// Fetch state of a logical resource (predictions, statistics)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "message")]
pub enum ResourceStatus {
    /// Nothing in flight, last fetch (if any) succeeded
    Idle,
    /// A fetch is in flight
    Fetching,
    /// Last fetch failed with a surfaced error
    Error(String),
}

impl ResourceStatus {
    /// Derive from latch state and last surfaced error
    ///
    /// An in-flight fetch wins over a stale error.
    #[must_use]
    pub fn from_parts(is_fetching: bool, error: Option<String>) -> Self {
        match (is_fetching, error) {
            (true, _) => Self::Fetching,
            (false, Some(message)) => Self::Error(message),
            (false, None) => Self::Idle,
        }
    }

    /// Whether a fetch is in flight
    #[inline]
    #[must_use]
    pub fn is_fetching(&self) -> bool {
        matches!(self, Self::Fetching)
    }
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Fetching => f.write_str("fetching"),
            Self::Error(message) => write!(f, "error: {message}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetching_wins_over_error() {
        assert_eq!(
            ResourceStatus::from_parts(true, Some("boom".into())),
            ResourceStatus::Fetching
        );
        assert_eq!(
            ResourceStatus::from_parts(false, Some("boom".into())),
            ResourceStatus::Error("boom".into())
        );
        assert_eq!(ResourceStatus::from_parts(false, None), ResourceStatus::Idle);
    }
}
