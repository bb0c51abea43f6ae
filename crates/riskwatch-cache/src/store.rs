//! Scoped prediction store
//!
//! Single source of truth for prediction records in a session:
//! - Four partitions (user/system × annual/quarterly), swapped atomically
//! - Freshness bookkeeping with a fixed window
//! - The active scope filter applied to reads
//! - An at-most-one-in-flight fetch latch
//!
//! # Fetch cycle
//!
//! ```text
//! fetch_all(force)
//!   ├─ latch taken?            → AlreadyInFlight (dropped, not queued)
//!   ├─ no session?             → NoSession
//!   ├─ !force && cache valid?  → CacheHit
//!   └─ try_join_all(list × 2|4) with timeout
//!        ├─ Ok  → normalize, replace all partitions, mark fresh, reset scope
//!        └─ Err → partitions untouched, error recorded unless authorization
//! ```
//!
//! A forced refresh that arrives while another fetch is in flight is dropped;
//! callers may see the in-flight result instead of a fresh one.

use crate::config::CacheConfig;
use crate::error::{CacheError, CacheResult};
use crate::latch::FetchLatch;
use crate::partition::{Owner, Partition, PartitionCounts, PartitionKey, PartitionSet};
use crate::source::{ListRequest, PredictionApi, Visibility};
use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use parking_lot::RwLock;
use riskwatch_model::{
    coerce_scope, default_scope_for, ActiveScope, CurrentUser, Normalizer, Prediction,
    PredictionId, PredictionKind, RawPrediction, Role,
};
use std::sync::Arc;
use tokio::time::Instant;

/// Result of a `fetch_all` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// A batch ran and the partitions were replaced
    Refreshed {
        /// Number of list requests issued
        requests: usize,
    },
    /// Cached data was fresh; no requests issued
    CacheHit,
    /// Another fetch held the latch; no requests issued
    AlreadyInFlight,
    /// No authenticated user; no requests issued
    NoSession,
    /// A batch ran but the session changed before it landed; results discarded
    Superseded,
}

impl FetchOutcome {
    /// Whether any network request was issued
    #[inline]
    #[must_use]
    pub fn hit_network(&self) -> bool {
        matches!(self, Self::Refreshed { .. } | Self::Superseded)
    }
}

/// Public view of the freshness bookkeeping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreshnessState {
    /// Wall-clock time of the last successful fetch
    pub last_fetched_at: Option<DateTime<Utc>>,
    /// Whether a fetch has ever completed since the last reset/invalidation
    pub is_initialized: bool,
    /// Whether a fetch is in flight
    pub is_fetching: bool,
    /// Scope filter applied to reads
    pub active_scope: ActiveScope,
}

#[derive(Debug, Clone, Copy, Default)]
struct Freshness {
    fetched_at: Option<Instant>,
    last_fetched_at: Option<DateTime<Utc>>,
    is_initialized: bool,
}

impl Freshness {
    fn now() -> Self {
        Self {
            fetched_at: Some(Instant::now()),
            last_fetched_at: Some(Utc::now()),
            is_initialized: true,
        }
    }
}

#[derive(Debug, Clone)]
struct StoreState {
    partitions: PartitionSet,
    freshness: Freshness,
    active_scope: ActiveScope,
    session: Option<CurrentUser>,
    error: Option<String>,
    /// Bumped whenever the session changes; in-flight batches from an older
    /// generation are discarded
    generation: u64,
}

impl Default for StoreState {
    fn default() -> Self {
        Self {
            partitions: PartitionSet::new(),
            freshness: Freshness::default(),
            active_scope: ActiveScope::Personal,
            session: None,
            error: None,
            generation: 0,
        }
    }
}

/// Scoped prediction cache
pub struct PredictionStore {
    api: Arc<dyn PredictionApi>,
    config: CacheConfig,
    normalizer: Normalizer,
    state: RwLock<StoreState>,
    latch: FetchLatch,
}

impl std::fmt::Debug for PredictionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PredictionStore")
            .field("config", &self.config)
            .field("counts", &self.counts())
            .field("freshness", &self.freshness())
            .finish_non_exhaustive()
    }
}

impl PredictionStore {
    /// Create an empty store
    #[must_use]
    pub fn new(api: Arc<dyn PredictionApi>, config: CacheConfig) -> Self {
        Self {
            api,
            config,
            normalizer: Normalizer::current(),
            state: RwLock::new(StoreState::default()),
            latch: FetchLatch::new(),
        }
    }

    /// Use a specific normalizer (fixed fallback year)
    #[inline]
    #[must_use]
    pub fn with_normalizer(mut self, normalizer: Normalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    /// Store configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Normalizer applied to fetched records
    #[inline]
    #[must_use]
    pub fn normalizer(&self) -> &Normalizer {
        &self.normalizer
    }

    // ========== Session ==========

    /// Install the authenticated user
    ///
    /// The active scope moves to the role's default. Switching to a different
    /// user also drops cached partitions.
    pub fn set_session(&self, user: CurrentUser) {
        let mut state = self.state.write();
        let same_user = state.session.as_ref().is_some_and(|u| u.id == user.id);
        if !same_user {
            let generation = state.generation + 1;
            *state = StoreState {
                generation,
                ..StoreState::default()
            };
        }
        state.active_scope = default_scope_for(user.role).into();
        tracing::debug!(user = %user.id, role = %user.role, "session installed");
        state.session = Some(user);
    }

    /// Current user, if any
    #[must_use]
    pub fn session(&self) -> Option<CurrentUser> {
        self.state.read().session.clone()
    }

    // ========== Fetch ==========

    /// Synchronize all partitions with the backend
    ///
    /// # Errors
    /// - `CacheError::Api` if any list request fails (partitions untouched)
    /// - `CacheError::Timeout` if the batch exceeds the configured timeout
    pub async fn fetch_all(&self, force_refresh: bool) -> CacheResult<FetchOutcome> {
        let Some(_guard) = self.latch.try_acquire() else {
            tracing::debug!(force_refresh, "fetch already in flight, dropping request");
            return Ok(FetchOutcome::AlreadyInFlight);
        };

        let (user, generation) = {
            let state = self.state.read();
            match &state.session {
                Some(user) => (user.clone(), state.generation),
                None => {
                    tracing::debug!("no session, skipping fetch");
                    return Ok(FetchOutcome::NoSession);
                }
            }
        };

        if !force_refresh && self.is_cache_valid(user.role) {
            tracing::debug!("prediction cache hit");
            return Ok(FetchOutcome::CacheHit);
        }

        let requests = self.plan(user.role);
        tracing::info!(
            user = %user.id,
            role = %user.role,
            requests = requests.len(),
            force_refresh,
            "fetching predictions"
        );

        match self.run_batch(&requests).await {
            Ok(responses) => {
                if self.commit(&user, generation, &requests, responses) {
                    Ok(FetchOutcome::Refreshed {
                        requests: requests.len(),
                    })
                } else {
                    tracing::info!(
                        user = %user.id,
                        "session changed during fetch, discarding results"
                    );
                    Ok(FetchOutcome::Superseded)
                }
            }
            Err(err) => {
                self.record_failure(&err);
                Err(err)
            }
        }
    }

    /// List requests for a role: system always, user unless `super_admin`
    fn plan(&self, role: Role) -> Vec<ListRequest> {
        let limit = self.config.page_size;
        let mut visibilities = vec![Visibility::System];
        if role.requires_user_data() {
            visibilities.insert(0, Visibility::User);
        }
        visibilities
            .into_iter()
            .flat_map(|visibility| {
                PredictionKind::ALL
                    .into_iter()
                    .map(move |kind| ListRequest::first_page(kind, visibility, limit))
            })
            .collect()
    }

    async fn run_batch(&self, requests: &[ListRequest]) -> CacheResult<Vec<Vec<RawPrediction>>> {
        let batch = try_join_all(requests.iter().map(|request| self.api.list(*request)));
        let responses = match self.config.fetch_timeout() {
            Some(limit) => tokio::time::timeout(limit, batch)
                .await
                .map_err(|_| CacheError::Timeout {
                    after_ms: self.config.fetch_timeout_ms,
                })??,
            None => batch.await?,
        };
        Ok(responses)
    }

    fn commit(
        &self,
        user: &CurrentUser,
        generation: u64,
        requests: &[ListRequest],
        responses: Vec<Vec<RawPrediction>>,
    ) -> bool {
        let mut next = PartitionSet::new();
        for (request, records) in requests.iter().zip(responses) {
            let origin = request.visibility.origin();
            let normalized: Vec<Prediction> = records
                .iter()
                .map(|raw| self.normalizer.normalize(raw, request.kind, origin))
                .collect();
            next.load(
                PartitionKey::new(owner_of(request.visibility), request.kind),
                normalized,
            );
        }

        let mut state = self.state.write();
        if state.generation != generation {
            return false;
        }
        let counts = next.counts();
        state.partitions = next;
        state.freshness = Freshness::now();
        state.active_scope = default_scope_for(user.role).into();
        state.error = None;
        tracing::info!(
            user_annual = counts.user_annual,
            user_quarterly = counts.user_quarterly,
            system_annual = counts.system_annual,
            system_quarterly = counts.system_quarterly,
            "prediction partitions replaced"
        );
        true
    }

    fn record_failure(&self, err: &CacheError) {
        if err.is_silent() {
            tracing::debug!(error = %err, "authorization failure during fetch, error left unset");
            return;
        }
        tracing::warn!(error = %err, "prediction fetch failed");
        self.state.write().error = Some(err.to_string());
    }

    /// Fresh, initialized, and holding every partition family the role needs
    fn is_cache_valid(&self, role: Role) -> bool {
        let state = self.state.read();
        let within_window = state
            .freshness
            .fetched_at
            .is_some_and(|at| at.elapsed() < self.config.freshness_window());
        state.freshness.is_initialized
            && within_window
            && state.partitions.has_system_data()
            && (!role.requires_user_data() || state.partitions.has_user_data())
    }

    // ========== Reads ==========

    /// Records of `kind` visible under the active scope
    ///
    /// System scope reads the system partition; every other scope reads the
    /// user partition filtered to that scope (`All` keeps the whole partition).
    #[must_use]
    pub fn get_filtered(&self, kind: PredictionKind) -> Vec<Prediction> {
        let state = self.state.read();
        match state.active_scope {
            ActiveScope::System => state
                .partitions
                .get(PartitionKey::new(Owner::System, kind))
                .as_ref()
                .clone(),
            scope => state
                .partitions
                .get(PartitionKey::new(Owner::User, kind))
                .iter()
                .filter(|p| scope.admits(p.scope))
                .cloned()
                .collect(),
        }
    }

    /// Snapshot of a single partition
    #[must_use]
    pub fn partition(&self, key: PartitionKey) -> Partition {
        Arc::clone(self.state.read().partitions.get(key))
    }

    /// Find a record in any partition
    #[must_use]
    pub fn find(&self, id: &PredictionId) -> Option<Prediction> {
        self.state
            .read()
            .partitions
            .find(id)
            .map(|(_, p)| p.clone())
    }

    /// Partition sizes
    #[must_use]
    pub fn counts(&self) -> PartitionCounts {
        self.state.read().partitions.counts()
    }

    /// Freshness bookkeeping
    #[must_use]
    pub fn freshness(&self) -> FreshnessState {
        let state = self.state.read();
        FreshnessState {
            last_fetched_at: state.freshness.last_fetched_at,
            is_initialized: state.freshness.is_initialized,
            is_fetching: self.latch.is_held(),
            active_scope: state.active_scope,
        }
    }

    /// Whether a fetch is in flight
    #[inline]
    #[must_use]
    pub fn is_fetching(&self) -> bool {
        self.latch.is_held()
    }

    /// Scope filter applied to reads
    #[must_use]
    pub fn active_scope(&self) -> ActiveScope {
        self.state.read().active_scope
    }

    /// Last surfaced fetch error
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.state.read().error.clone()
    }

    /// Clear the surfaced fetch error
    pub fn clear_error(&self) {
        self.state.write().error = None;
    }

    // ========== Local writes ==========

    /// Insert at the head of the partition routed by the record's scope
    ///
    /// Not id-aware: adding the same record twice yields two entries.
    pub fn add_prediction(&self, prediction: Prediction, kind: PredictionKind) {
        tracing::debug!(id = %prediction.id, scope = %prediction.scope, %kind, "adding prediction");
        self.state.write().partitions.prepend(prediction, kind);
    }

    /// Replace the record with `match_id`; returns whether one was found
    pub fn replace_prediction(
        &self,
        prediction: Prediction,
        kind: PredictionKind,
        match_id: &PredictionId,
    ) -> bool {
        let replaced = self
            .state
            .write()
            .partitions
            .replace(prediction, kind, match_id);
        if !replaced {
            tracing::debug!(id = %match_id, %kind, "replace target not cached");
        }
        replaced
    }

    /// Remove `id` from both partitions of `kind`; returns records removed
    pub fn remove_prediction(&self, id: &PredictionId, kind: PredictionKind) -> usize {
        self.state.write().partitions.remove(id, kind)
    }

    // ========== Control ==========

    /// Change the scope filter, applying the role cap
    pub fn set_active_scope(&self, requested: ActiveScope) -> ActiveScope {
        let mut state = self.state.write();
        let effective = match &state.session {
            Some(user) => coerce_scope(requested, user.role),
            None => requested,
        };
        state.active_scope = effective;
        effective
    }

    /// Mark the cache stale without discarding displayed data
    pub fn invalidate_cache(&self) {
        let mut state = self.state.write();
        state.freshness = Freshness::default();
        tracing::debug!("prediction cache invalidated");
    }

    /// Drop all partitions, freshness state, error and session (logout)
    pub fn reset(&self) {
        let mut state = self.state.write();
        let generation = state.generation + 1;
        *state = StoreState {
            generation,
            ..StoreState::default()
        };
        tracing::info!("prediction store reset");
    }
}

fn owner_of(visibility: Visibility) -> Owner {
    match visibility {
        Visibility::User => Owner::User,
        Visibility::System => Owner::System,
    }
}
