//! Simulated flaky network in front of the in-memory backend
//!
//! Every prediction and statistics call first rolls a seeded die; a hit turns
//! the call into a transient failure (connection drop or 503). Job status
//! polls pass straight through so their concurrent poll order cannot perturb
//! the random stream.

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use riskwatch_cache::{ListRequest, PredictionApi};
use riskwatch_model::{
    ApiError, CurrentUser, PredictionId, PredictionInput, PredictionKind, RawPrediction,
};
use riskwatch_sync::{DashboardStats, JobId, JobStatusReport, JobStatusSource, StatsSource};
use riskwatch_test_utils::FakeBackend;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Backend decorator injecting seeded transient failures
pub struct FlakyNetwork {
    inner: Arc<FakeBackend>,
    rng: Mutex<StdRng>,
    failure_rate: f64,
    injected: AtomicU64,
}

impl FlakyNetwork {
    /// Wrap `inner`; `failure_rate` is clamped to `[0, 1]`
    #[must_use]
    pub fn new(inner: Arc<FakeBackend>, seed: u64, failure_rate: f64) -> Self {
        Self {
            inner,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            failure_rate: failure_rate.clamp(0.0, 1.0),
            injected: AtomicU64::new(0),
        }
    }

    /// Wrapped backend
    #[inline]
    #[must_use]
    pub fn backend(&self) -> &Arc<FakeBackend> {
        &self.inner
    }

    /// Failures injected so far
    #[must_use]
    pub fn injected_failures(&self) -> u64 {
        self.injected.load(Ordering::Relaxed)
    }

    fn roll(&self, call: &str) -> Result<(), ApiError> {
        let mut rng = self.rng.lock();
        if !rng.random_bool(self.failure_rate) {
            return Ok(());
        }
        self.injected.fetch_add(1, Ordering::Relaxed);
        let err = if rng.random_bool(0.5) {
            ApiError::Network(format!("{call}: connection reset"))
        } else {
            ApiError::Server {
                status: 503,
                message: format!("{call}: service unavailable"),
            }
        };
        tracing::debug!(%call, error = %err, "injected network failure");
        Err(err)
    }
}

#[async_trait]
impl PredictionApi for FlakyNetwork {
    async fn list(&self, request: ListRequest) -> Result<Vec<RawPrediction>, ApiError> {
        self.roll("list")?;
        self.inner.list(request).await
    }

    async fn create(
        &self,
        kind: PredictionKind,
        input: &PredictionInput,
    ) -> Result<RawPrediction, ApiError> {
        self.roll("create")?;
        self.inner.create(kind, input).await
    }

    async fn update(
        &self,
        kind: PredictionKind,
        id: &PredictionId,
        input: &PredictionInput,
    ) -> Result<RawPrediction, ApiError> {
        self.roll("update")?;
        self.inner.update(kind, id, input).await
    }

    async fn delete(&self, kind: PredictionKind, id: &PredictionId) -> Result<(), ApiError> {
        self.roll("delete")?;
        self.inner.delete(kind, id).await
    }
}

#[async_trait]
impl StatsSource for FlakyNetwork {
    async fn dashboard_stats(&self, user: &CurrentUser) -> Result<DashboardStats, ApiError> {
        self.roll("stats")?;
        self.inner.dashboard_stats(user).await
    }
}

#[async_trait]
impl JobStatusSource for FlakyNetwork {
    async fn job_status(&self, id: &JobId) -> Result<JobStatusReport, ApiError> {
        self.inner.job_status(id).await
    }
}
