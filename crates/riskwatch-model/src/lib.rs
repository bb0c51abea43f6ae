//! Riskwatch domain model
//!
//! Canonical prediction records and the pure rules around them:
//! - Roles and visibility scopes (who may see which partition)
//! - Raw upstream record shapes as returned by the prediction API
//! - Normalization of raw records into canonical [`Prediction`]s
//! - The collaborator error taxonomy shared by every crate
//!
//! # Example
//!
//! ```rust
//! use riskwatch_model::{normalize, Origin, PredictionKind, RawPrediction, Role, Scope};
//!
//! let raw: RawPrediction = serde_json::from_value(serde_json::json!({
//!     "id": "p1",
//!     "company_symbol": "ACME",
//!     "reporting_year": 2024,
//!     "reporting_quarter": "q2",
//!     "ensemble_probability": 0.12,
//!     "logistic_probability": 0.40,
//!     "organization_access": "organization",
//! }))
//! .unwrap();
//!
//! let prediction = normalize(&raw, PredictionKind::Quarterly, Origin::User);
//! assert_eq!(prediction.default_probability, 0.12);
//! assert_eq!(prediction.scope, Scope::Organization);
//! assert_eq!(riskwatch_model::default_scope_for(Role::OrgMember), Scope::Organization);
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod error;
pub mod normalize;
pub mod prediction;
pub mod raw;
pub mod scope;

pub use error::{ApiError, ErrorClass, ModelError};
pub use normalize::{normalize, Normalizer, Origin};
pub use prediction::{
    AnnualMetrics, CurrentUser, Prediction, PredictionId, PredictionInput, PredictionKind,
    Quarter, QuarterlyMetrics, ReportingPeriod, RiskCategory, RiskMetrics,
};
pub use raw::{RawCompany, RawPrediction};
pub use scope::{
    allowed_scopes_for, coerce_scope, default_scope_for, ActiveScope, Role, Scope,
};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with prediction records
    pub use crate::{
        normalize, ActiveScope, ApiError, CurrentUser, Normalizer, Origin, Prediction,
        PredictionId, PredictionInput, PredictionKind, RawPrediction, Role, Scope,
    };
}
