//! Job lifecycle states and legal transitions

use crate::error::SyncError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a bulk upload job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Accepted, not started
    Pending,
    /// Rows are being processed
    Processing,
    /// All rows processed
    Completed,
    /// Processing halted
    Failed,
}

impl JobStatus {
    /// Wire name of the status
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Whether no further transition is possible
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validates a status transition.
///
/// Pending may jump straight to a terminal state when a poll misses the
/// processing phase.
///
/// # Errors
/// Returns `SyncError::InvalidTransition` for backwards, self and
/// out-of-terminal moves
pub fn validate_transition(from: JobStatus, to: JobStatus) -> Result<(), SyncError> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(SyncError::InvalidTransition { from, to })
    }
}

/// Statuses reachable from `from` in one step
#[must_use]
pub fn allowed_transitions(from: JobStatus) -> &'static [JobStatus] {
    use JobStatus::{Completed, Failed, Pending, Processing};
    match from {
        Pending => &[Processing, Completed, Failed],
        Processing => &[Completed, Failed],
        Completed | Failed => &[],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const ALL: [JobStatus; 4] = [
        JobStatus::Pending,
        JobStatus::Processing,
        JobStatus::Completed,
        JobStatus::Failed,
    ];

    fn rank(status: JobStatus) -> u8 {
        match status {
            JobStatus::Pending => 0,
            JobStatus::Processing => 1,
            JobStatus::Completed | JobStatus::Failed => 2,
        }
    }

    #[test]
    fn forward_moves_allowed() {
        assert!(validate_transition(JobStatus::Pending, JobStatus::Processing).is_ok());
        assert!(validate_transition(JobStatus::Pending, JobStatus::Failed).is_ok());
        assert!(validate_transition(JobStatus::Processing, JobStatus::Completed).is_ok());
    }

    #[test]
    fn terminal_states_are_final() {
        for to in ALL {
            assert!(validate_transition(JobStatus::Completed, to).is_err());
            assert!(validate_transition(JobStatus::Failed, to).is_err());
        }
    }

    #[test]
    fn backwards_rejected() {
        let err = validate_transition(JobStatus::Processing, JobStatus::Pending).unwrap_err();
        assert_eq!(
            err,
            SyncError::InvalidTransition {
                from: JobStatus::Processing,
                to: JobStatus::Pending,
            }
        );
    }

    proptest! {
        #[test]
        fn prop_transitions_strictly_advance(
            from in prop::sample::select(ALL.to_vec()),
            to in prop::sample::select(ALL.to_vec()),
        ) {
            if validate_transition(from, to).is_ok() {
                prop_assert!(rank(to) > rank(from));
                prop_assert!(!from.is_terminal());
            }
        }
    }
}
