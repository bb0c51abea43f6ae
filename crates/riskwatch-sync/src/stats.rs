//! Dashboard statistics cache
//!
//! A second cached resource next to the prediction store. Snapshots live in a
//! `moka` cache keyed by user id whose TTL equals the freshness window, so no
//! snapshot outlives the staleness bound even if nobody invalidates it.
//! Freshness is tracked separately so that `invalidate_cache` can force a
//! refetch while the previous snapshot stays readable.

use crate::error::SyncResult;
use crate::status::ResourceStatus;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use moka::future::Cache;
use parking_lot::RwLock;
use riskwatch_cache::FetchLatch;
use riskwatch_model::{ApiError, CurrentUser};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Snapshots kept at once (one per user that logged in on this client)
const MAX_SNAPSHOTS: u64 = 64;

/// Prediction counts per risk bucket
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskDistribution {
    /// Low risk
    pub low: u64,
    /// Medium risk
    pub medium: u64,
    /// High risk
    pub high: u64,
    /// Critical risk
    pub critical: u64,
}

impl RiskDistribution {
    /// Sum of all buckets
    #[inline]
    #[must_use]
    pub fn total(&self) -> u64 {
        self.low + self.medium + self.high + self.critical
    }
}

/// Aggregate figures shown on the dashboard
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardStats {
    /// Distinct companies with at least one prediction
    pub total_companies: u64,
    /// Annual predictions visible to the user
    pub annual_predictions: u64,
    /// Quarterly predictions visible to the user
    pub quarterly_predictions: u64,
    /// Mean default probability across visible predictions
    pub average_default_probability: f64,
    /// Counts per risk bucket
    pub risk_distribution: RiskDistribution,
    /// Company counts per sector
    pub sectors: BTreeMap<String, u64>,
}

/// Remote statistics endpoint
#[async_trait]
pub trait StatsSource: Send + Sync {
    /// Fetch statistics for the data visible to `user`
    async fn dashboard_stats(&self, user: &CurrentUser) -> Result<DashboardStats, ApiError>;
}

#[derive(Debug, Default)]
struct StatsState {
    fetched_at: Option<Instant>,
    last_fetched_at: Option<DateTime<Utc>>,
    error: Option<String>,
    /// Bumped by `invalidate_cache` and `reset`; a fetch that started under an
    /// older generation must not mark itself fresh
    generation: u64,
}

/// Cached dashboard statistics
pub struct StatsCache {
    source: Arc<dyn StatsSource>,
    window: Duration,
    snapshots: Cache<String, Arc<DashboardStats>>,
    state: RwLock<StatsState>,
    latch: FetchLatch,
}

impl std::fmt::Debug for StatsCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatsCache")
            .field("window", &self.window)
            .field("entries", &self.snapshots.entry_count())
            .field("is_fetching", &self.latch.is_held())
            .finish_non_exhaustive()
    }
}

impl StatsCache {
    /// Create cache with a freshness window
    #[must_use]
    pub fn new(source: Arc<dyn StatsSource>, window: Duration) -> Self {
        let snapshots = Cache::builder()
            .max_capacity(MAX_SNAPSHOTS)
            .time_to_live(window.max(Duration::from_millis(1)))
            .build();
        Self {
            source,
            window,
            snapshots,
            state: RwLock::new(StatsState::default()),
            latch: FetchLatch::new(),
        }
    }

    /// Statistics for `user`, fetched on demand
    ///
    /// Returns the cached snapshot while fresh. If another fetch is in flight
    /// the current snapshot (possibly stale, possibly none) is returned.
    /// A fetch overtaken by `invalidate_cache` or `reset` hands its figures to
    /// the caller but neither caches them nor marks the cache fresh.
    ///
    /// # Errors
    /// Returns `SyncError::Api` when the source fails
    pub async fn get(
        &self,
        user: &CurrentUser,
        force_refresh: bool,
    ) -> SyncResult<Option<Arc<DashboardStats>>> {
        if !force_refresh && self.is_fresh() {
            if let Some(snapshot) = self.snapshots.get(&user.id).await {
                tracing::debug!(user = %user.id, "stats cache hit");
                return Ok(Some(snapshot));
            }
        }

        let Some(_guard) = self.latch.try_acquire() else {
            tracing::debug!("stats fetch already in flight");
            return Ok(self.snapshots.get(&user.id).await);
        };

        let generation = self.state.read().generation;
        match self.source.dashboard_stats(user).await {
            Ok(stats) => {
                let stats = Arc::new(stats);
                if self.store(&user.id, generation, &stats).await {
                    tracing::info!(user = %user.id, "dashboard stats refreshed");
                } else {
                    tracing::debug!(user = %user.id, "stats reset during fetch, result dropped");
                }
                Ok(Some(stats))
            }
            Err(err) => {
                if err.is_authorization() {
                    tracing::debug!(error = %err, "authorization failure fetching stats");
                } else {
                    tracing::warn!(error = %err, "dashboard stats fetch failed");
                    self.state.write().error = Some(err.to_string());
                }
                Err(err.into())
            }
        }
    }

    /// Cache `stats` and mark fresh unless `generation` is no longer current
    async fn store(&self, user_id: &str, generation: u64, stats: &Arc<DashboardStats>) -> bool {
        if self.state.read().generation != generation {
            return false;
        }
        self.snapshots.insert(user_id.to_owned(), Arc::clone(stats)).await;

        let current = {
            let mut state = self.state.write();
            let current = state.generation == generation;
            if current {
                state.fetched_at = Some(Instant::now());
                state.last_fetched_at = Some(Utc::now());
                state.error = None;
            }
            current
        };
        if !current {
            self.snapshots.invalidate(user_id).await;
        }
        current
    }

    /// Last snapshot for `user`, without fetching
    pub async fn peek(&self, user_id: &str) -> Option<Arc<DashboardStats>> {
        self.snapshots.get(user_id).await
    }

    fn is_fresh(&self) -> bool {
        self.state
            .read()
            .fetched_at
            .is_some_and(|at| at.elapsed() < self.window)
    }

    /// Force the next `get` to refetch; snapshots stay readable
    pub fn invalidate_cache(&self) {
        let mut state = self.state.write();
        state.fetched_at = None;
        state.last_fetched_at = None;
        state.generation += 1;
        tracing::debug!("stats cache invalidated");
    }

    /// Drop snapshots and freshness (logout)
    pub fn reset(&self) {
        self.snapshots.invalidate_all();
        let mut state = self.state.write();
        let generation = state.generation + 1;
        *state = StatsState {
            generation,
            ..StatsState::default()
        };
    }

    /// Wall-clock time of the last successful fetch
    #[must_use]
    pub fn last_fetched_at(&self) -> Option<DateTime<Utc>> {
        self.state.read().last_fetched_at
    }

    /// Fetch status of the statistics resource
    #[must_use]
    pub fn status(&self) -> ResourceStatus {
        ResourceStatus::from_parts(self.latch.is_held(), self.state.read().error.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use riskwatch_model::Role;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::watch;

    /// Source numbering its answers, with an open/closed gate
    struct CountingSource {
        calls: AtomicUsize,
        fail: parking_lot::Mutex<Option<ApiError>>,
        gate: watch::Sender<bool>,
    }

    impl CountingSource {
        fn new() -> Self {
            let (gate, _) = watch::channel(true);
            Self {
                calls: AtomicUsize::new(0),
                fail: parking_lot::Mutex::new(None),
                gate,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn hold(&self) {
            self.gate.send_replace(false);
        }

        fn release(&self) {
            self.gate.send_replace(true);
        }

        async fn wait_for_calls(&self, n: usize) {
            while self.calls() < n {
                tokio::task::yield_now().await;
            }
        }
    }

    #[async_trait]
    impl StatsSource for CountingSource {
        async fn dashboard_stats(&self, _: &CurrentUser) -> Result<DashboardStats, ApiError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) as u64;
            let mut gate = self.gate.subscribe();
            let _ = gate.wait_for(|open| *open).await;
            if let Some(err) = self.fail.lock().clone() {
                return Err(err);
            }
            Ok(DashboardStats {
                total_companies: n + 1,
                ..DashboardStats::default()
            })
        }
    }

    fn cache() -> (Arc<CountingSource>, Arc<StatsCache>) {
        let source = Arc::new(CountingSource::new());
        let cache = StatsCache::new(
            Arc::clone(&source) as Arc<dyn StatsSource>,
            Duration::from_secs(300),
        );
        (source, Arc::new(cache))
    }

    fn spawn_get(
        cache: &Arc<StatsCache>,
        user: &CurrentUser,
    ) -> tokio::task::JoinHandle<SyncResult<Option<Arc<DashboardStats>>>> {
        let cache = Arc::clone(cache);
        let user = user.clone();
        tokio::spawn(async move { cache.get(&user, false).await })
    }

    #[tokio::test]
    async fn fresh_snapshot_is_reused() {
        let (source, cache) = cache();
        let user = CurrentUser::new("u1", Role::User);

        let first = cache.get(&user, false).await.unwrap().unwrap();
        let second = cache.get(&user, false).await.unwrap().unwrap();
        assert_eq!(first, second);
        assert_eq!(source.calls(), 1);
        assert!(cache.last_fetched_at().is_some());
    }

    #[tokio::test]
    async fn invalidate_forces_refetch_and_keeps_snapshot() {
        let (source, cache) = cache();
        let user = CurrentUser::new("u1", Role::User);
        cache.get(&user, false).await.unwrap();

        cache.invalidate_cache();
        assert!(cache.last_fetched_at().is_none());
        assert!(cache.peek("u1").await.is_some());

        let refreshed = cache.get(&user, false).await.unwrap().unwrap();
        assert_eq!(refreshed.total_companies, 2);
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn concurrent_get_returns_current_snapshot() {
        let (source, cache) = cache();
        let user = CurrentUser::new("u1", Role::User);
        cache.get(&user, false).await.unwrap();
        cache.invalidate_cache();

        source.hold();
        let pending = spawn_get(&cache, &user);
        source.wait_for_calls(2).await;
        assert_eq!(cache.status(), ResourceStatus::Fetching);

        let current = cache.get(&user, false).await.unwrap().unwrap();
        assert_eq!(current.total_companies, 1);
        assert_eq!(source.calls(), 2);

        source.release();
        let refreshed = pending.await.unwrap().unwrap().unwrap();
        assert_eq!(refreshed.total_companies, 2);
        assert_eq!(cache.status(), ResourceStatus::Idle);
    }

    #[tokio::test]
    async fn latch_released_after_failure() {
        let (source, cache) = cache();
        *source.fail.lock() = Some(ApiError::Network("down".into()));
        let user = CurrentUser::new("u1", Role::User);

        assert!(cache.get(&user, false).await.is_err());
        assert!(matches!(cache.status(), ResourceStatus::Error(_)));

        *source.fail.lock() = None;
        let stats = cache.get(&user, false).await.unwrap().unwrap();
        assert_eq!(stats.total_companies, 2);
        assert_eq!(source.calls(), 2);
        assert_eq!(cache.status(), ResourceStatus::Idle);
    }

    #[tokio::test]
    async fn reset_during_fetch_discards_result() {
        let (source, cache) = cache();
        let user = CurrentUser::new("u1", Role::User);

        source.hold();
        let pending = spawn_get(&cache, &user);
        source.wait_for_calls(1).await;
        cache.reset();
        source.release();
        pending.await.unwrap().unwrap();

        assert!(cache.peek("u1").await.is_none());
        assert!(cache.last_fetched_at().is_none());

        cache.get(&user, false).await.unwrap();
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn invalidation_during_fetch_keeps_cache_stale() {
        let (source, cache) = cache();
        let user = CurrentUser::new("u1", Role::User);

        source.hold();
        let pending = spawn_get(&cache, &user);
        source.wait_for_calls(1).await;
        cache.invalidate_cache();
        source.release();
        pending.await.unwrap().unwrap();

        assert!(cache.last_fetched_at().is_none());
        let next = cache.get(&user, false).await.unwrap().unwrap();
        assert_eq!(next.total_companies, 2);
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn failure_surfaces_in_status() {
        let (source, cache) = cache();
        *source.fail.lock() = Some(ApiError::Network("down".into()));
        let user = CurrentUser::new("u1", Role::User);

        assert!(cache.get(&user, false).await.is_err());
        assert!(matches!(cache.status(), ResourceStatus::Error(_)));
    }

    #[tokio::test]
    async fn unauthorized_failure_is_silent() {
        let (source, cache) = cache();
        *source.fail.lock() = Some(ApiError::Unauthorized("expired".into()));
        let user = CurrentUser::new("u1", Role::User);

        assert!(cache.get(&user, false).await.is_err());
        assert_eq!(cache.status(), ResourceStatus::Idle);
    }

    #[tokio::test]
    async fn forbidden_failure_surfaces_in_status() {
        let (source, cache) = cache();
        *source.fail.lock() = Some(ApiError::from_status(403, "org access revoked"));
        let user = CurrentUser::new("u1", Role::User);

        assert!(cache.get(&user, false).await.is_err());
        assert!(matches!(cache.status(), ResourceStatus::Error(_)));
    }

    #[tokio::test]
    async fn reset_drops_snapshots() {
        let (_, cache) = cache();
        let user = CurrentUser::new("u1", Role::User);
        cache.get(&user, false).await.unwrap();

        cache.reset();
        assert!(cache.peek("u1").await.is_none());
        assert!(cache.last_fetched_at().is_none());
    }

    #[test]
    fn distribution_total() {
        let d = RiskDistribution {
            low: 1,
            medium: 2,
            high: 3,
            critical: 4,
        };
        assert_eq!(d.total(), 10);
    }

    #[test]
    fn stats_payload_tolerates_missing_fields() {
        let stats: DashboardStats = serde_json::from_value(serde_json::json!({
            "total_companies": 3,
            "annual_predictions": 5,
            "risk_distribution": { "low": 2, "medium": 1, "high": 1, "critical": 1 },
            "sectors": { "Energy": 2, "Retail": 1 }
        }))
        .unwrap();

        assert_eq!(stats.quarterly_predictions, 0);
        assert_eq!(stats.average_default_probability, 0.0);
        assert_eq!(stats.risk_distribution.total(), 5);
        assert_eq!(stats.sectors.get("Energy"), Some(&2));
    }
}
