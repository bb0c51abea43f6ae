//! Riskwatch synchronization layer
//!
//! Keeps the prediction cache, the dashboard statistics cache and bulk upload
//! jobs consistent with the backend across logins, mutations and job
//! completions.
//!
//! # Architecture
//!
//! ```text
//!            ┌────────────────────── SyncCoordinator ──────────────────────┐
//!  login ───►│  PredictionStore ◄── Reconciler ◄── JobTracker ◄── poll     │
//!  mutate ──►│        │                 │                                 │
//!            │        │ fetch           │ publish                         │
//!            │        ▼                 ▼                                 │
//!            │  dyn PredictionApi    EventBus ──► StatsCache::invalidate  │
//!            │                          └──────► listeners / receivers    │
//!            └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The two caches are eventually consistent: a mutation invalidates both, but
//! statistics are only refetched on the next read, bounded by their freshness
//! window.

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod jobs;
pub mod stats;
pub mod status;

pub use config::SyncConfig;
pub use coordinator::{Reconciler, SyncCoordinator};
pub use error::{ConfigError, SyncError, SyncResult};
pub use events::{EventBus, PredictionEvent, Subscription};
pub use jobs::{
    BulkJob, JobCompletionHook, JobId, JobStatus, JobStatusReport, JobStatusSource, JobSummary,
    JobTracker,
};
pub use stats::{DashboardStats, RiskDistribution, StatsCache, StatsSource};
pub use status::ResourceStatus;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for driving the synchronization layer
    pub use crate::{
        BulkJob, DashboardStats, JobId, JobStatus, PredictionEvent, ResourceStatus, SyncConfig,
        SyncCoordinator, SyncError, SyncResult,
    };
    pub use riskwatch_cache::prelude::*;
}
