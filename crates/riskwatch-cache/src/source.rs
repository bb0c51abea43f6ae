//! Prediction API collaborator
//!
//! The REST endpoints themselves live outside this crate. The cache only needs
//! the list calls; the create/update/delete calls are used by the mutation
//! flows layered on top.

use async_trait::async_trait;
use riskwatch_model::{
    ApiError, Origin, PredictionId, PredictionInput, PredictionKind, RawPrediction,
};
use std::fmt;

/// Which endpoint family to list from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Visibility {
    /// Personal and organization predictions of the current user
    User,
    /// Platform-wide predictions
    System,
}

impl Visibility {
    /// Normalizer origin for records from this endpoint family
    #[inline]
    #[must_use]
    pub fn origin(&self) -> Origin {
        match self {
            Visibility::User => Origin::User,
            Visibility::System => Origin::System,
        }
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Visibility::User => f.write_str("user"),
            Visibility::System => f.write_str("system"),
        }
    }
}

/// One paged list call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListRequest {
    /// Annual or quarterly endpoint
    pub kind: PredictionKind,
    /// User or system endpoint
    pub visibility: Visibility,
    /// Page size
    pub limit: u32,
    /// Offset into the result set
    pub offset: u32,
}

impl ListRequest {
    /// First page of a listing
    #[inline]
    #[must_use]
    pub fn first_page(kind: PredictionKind, visibility: Visibility, limit: u32) -> Self {
        Self {
            kind,
            visibility,
            limit,
            offset: 0,
        }
    }
}

impl fmt::Display for ListRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{} (limit {}, offset {})",
            self.visibility, self.kind, self.limit, self.offset
        )
    }
}

/// Remote prediction endpoints
#[async_trait]
pub trait PredictionApi: Send + Sync {
    /// List predictions visible through one endpoint family
    async fn list(&self, request: ListRequest) -> Result<Vec<RawPrediction>, ApiError>;

    /// Create a prediction; returns the stored record
    async fn create(
        &self,
        kind: PredictionKind,
        input: &PredictionInput,
    ) -> Result<RawPrediction, ApiError>;

    /// Update a prediction; returns the stored record
    async fn update(
        &self,
        kind: PredictionKind,
        id: &PredictionId,
        input: &PredictionInput,
    ) -> Result<RawPrediction, ApiError>;

    /// Delete a prediction
    async fn delete(&self, kind: PredictionKind, id: &PredictionId) -> Result<(), ApiError>;
}
