//! Bulk upload job tracking
//!
//! ```text
//! pending ──► processing ──► completed
//!    │            │
//!    └────────────┴────────► failed
//! ```
//!
//! Status only moves forward and only when the job status endpoint says so;
//! the tracker itself never infers progress. Completion triggers the
//! prediction refresh path; failure schedules the job for removal.

mod state;
mod tracker;

pub use state::{allowed_transitions, validate_transition, JobStatus};
pub use tracker::{
    BulkJob, JobCompletionHook, JobId, JobStatusReport, JobStatusSource, JobSummary, JobTracker,
};
