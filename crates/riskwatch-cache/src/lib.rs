//! Riskwatch prediction cache
//!
//! Client-side store of prediction records partitioned by owner class and
//! kind, with freshness tracking and scope-filtered reads.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │               PredictionStore                 │
//! │  ┌──────────────┐  ┌───────────────────────┐  │
//! │  │  FetchLatch  │  │     PartitionSet      │  │
//! │  │ (≤1 fetch)   │  │ user × {annual, qtr}  │  │
//! │  └──────────────┘  │ system × {annual, qtr}│  │
//! │                    └───────────────────────┘  │
//! │  freshness · active scope · session · error   │
//! └──────────────────────┬────────────────────────┘
//!                        │ list × 2|4
//!                        ▼
//!                 dyn PredictionApi
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use riskwatch_cache::prelude::*;
//! use std::sync::Arc;
//!
//! async fn load(api: Arc<dyn PredictionApi>) -> CacheResult<()> {
//!     let store = PredictionStore::new(api, CacheConfig::default());
//!     store.set_session(CurrentUser::new("u-1", Role::OrgMember));
//!     store.fetch_all(false).await?;
//!     let visible = store.get_filtered(PredictionKind::Annual);
//!     println!("{} annual predictions", visible.len());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod config;
pub mod error;
pub mod latch;
pub mod partition;
pub mod source;
pub mod store;

pub use config::CacheConfig;
pub use error::{CacheError, CacheResult};
pub use latch::{FetchLatch, LatchGuard};
pub use partition::{Owner, Partition, PartitionCounts, PartitionKey, PartitionSet};
pub use source::{ListRequest, PredictionApi, Visibility};
pub use store::{FetchOutcome, FreshnessState, PredictionStore};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with the prediction cache
    pub use crate::{
        CacheConfig, CacheError, CacheResult, FetchOutcome, ListRequest, PartitionKey,
        PredictionApi, PredictionStore, Visibility,
    };
    pub use riskwatch_model::prelude::*;
}
