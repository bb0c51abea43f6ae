//! Synchronization coordinator
//!
//! Wires the prediction store, the statistics cache, the event bus and the
//! bulk job tracker together and owns every trigger that refreshes them:
//!
//! | Trigger | Fetch |
//! |---|---|
//! | session established, cache not initialized | `fetch_all(false)` |
//! | user-initiated refresh | caller's choice |
//! | successful create/update/delete | `fetch_all(true)` after invalidation |
//! | login event | `fetch_all(true)` after the settle delay |
//! | bulk job completed | `fetch_all(true)` after invalidation |
//!
//! Statistics are never fetched eagerly; they are invalidated by every
//! mutation event and refetched on the next read.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::events::{EventBus, PredictionEvent, Subscription};
use crate::jobs::{BulkJob, JobCompletionHook, JobId, JobStatusSource, JobTracker};
use crate::stats::{DashboardStats, StatsCache, StatsSource};
use crate::status::ResourceStatus;
use async_trait::async_trait;
use riskwatch_cache::{FetchOutcome, PredictionApi, PredictionStore};
use riskwatch_model::{
    ActiveScope, CurrentUser, Origin, Prediction, PredictionId, PredictionInput, PredictionKind,
};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Invalidate-then-refresh path shared by mutations and completed bulk jobs
#[derive(Debug)]
pub struct Reconciler {
    store: Arc<PredictionStore>,
    events: Arc<EventBus>,
}

impl Reconciler {
    /// Create reconciler over a store and bus
    #[must_use]
    pub fn new(store: Arc<PredictionStore>, events: Arc<EventBus>) -> Self {
        Self { store, events }
    }

    /// Mark the cache stale, announce `event`, then force a refetch
    ///
    /// A failed refetch is logged, not returned: the mutation that caused it
    /// already succeeded and the local write-through is in place.
    pub async fn invalidate_and_refresh(&self, event: PredictionEvent) -> Option<FetchOutcome> {
        self.store.invalidate_cache();
        self.events.publish(event);
        match self.store.fetch_all(true).await {
            Ok(outcome) => {
                if matches!(outcome, FetchOutcome::Refreshed { .. }) {
                    self.events.publish(PredictionEvent::Refreshed);
                }
                Some(outcome)
            }
            Err(err) => {
                tracing::warn!(error = %err, "refresh after mutation failed");
                None
            }
        }
    }
}

#[async_trait]
impl JobCompletionHook for Reconciler {
    async fn on_job_completed(&self, job: &BulkJob) {
        self.invalidate_and_refresh(PredictionEvent::BulkImportCompleted {
            job_id: job.id.clone(),
        })
        .await;
    }
}

/// Coordinates fetches, mutations, statistics and bulk jobs for one client
pub struct SyncCoordinator {
    config: SyncConfig,
    api: Arc<dyn PredictionApi>,
    store: Arc<PredictionStore>,
    stats: Arc<StatsCache>,
    events: Arc<EventBus>,
    reconciler: Arc<Reconciler>,
    jobs: JobTracker,
    _stats_invalidation: Subscription,
}

impl std::fmt::Debug for SyncCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncCoordinator")
            .field("store", &self.store)
            .field("stats", &self.stats)
            .field("jobs", &self.jobs)
            .finish_non_exhaustive()
    }
}

impl SyncCoordinator {
    /// Create coordinator from its three collaborators
    #[must_use]
    pub fn new(
        config: SyncConfig,
        api: Arc<dyn PredictionApi>,
        stats_source: Arc<dyn StatsSource>,
        job_source: Arc<dyn JobStatusSource>,
    ) -> Self {
        let store = Arc::new(PredictionStore::new(Arc::clone(&api), config.cache.clone()));
        let stats = Arc::new(StatsCache::new(stats_source, config.stats_freshness_window()));
        let events = Arc::new(EventBus::default());
        let reconciler = Arc::new(Reconciler::new(Arc::clone(&store), Arc::clone(&events)));
        let jobs = JobTracker::from_config(job_source, &config)
            .with_completion_hook(Arc::clone(&reconciler) as Arc<dyn JobCompletionHook>);

        let invalidated = Arc::clone(&stats);
        let stats_invalidation = events.on_predictions_changed(move |event| {
            if event.is_mutation() {
                invalidated.invalidate_cache();
            }
        });

        Self {
            config,
            api,
            store,
            stats,
            events,
            reconciler,
            jobs,
            _stats_invalidation: stats_invalidation,
        }
    }

    /// Create coordinator over a single backend serving every collaborator
    #[must_use]
    pub fn with_backend<B>(config: SyncConfig, backend: Arc<B>) -> Self
    where
        B: PredictionApi + StatsSource + JobStatusSource + 'static,
    {
        Self::new(
            config,
            Arc::clone(&backend) as Arc<dyn PredictionApi>,
            Arc::clone(&backend) as Arc<dyn StatsSource>,
            backend as Arc<dyn JobStatusSource>,
        )
    }

    // ========== Session triggers ==========

    /// Session restored or established; loads predictions if never loaded
    ///
    /// # Errors
    /// Returns `SyncError::Cache` if the initial fetch fails
    pub async fn on_session_established(&self, user: CurrentUser) -> SyncResult<FetchOutcome> {
        tracing::info!(user = %user.id, role = %user.role, "session established");
        self.store.set_session(user);
        if self.store.freshness().is_initialized {
            return Ok(FetchOutcome::CacheHit);
        }
        self.refresh(false).await
    }

    /// Login event; waits for the token to settle, then forces a refresh
    ///
    /// # Errors
    /// Returns `SyncError::Cache` if the fetch fails
    pub async fn on_login(&self, user: CurrentUser) -> SyncResult<FetchOutcome> {
        tracing::info!(user = %user.id, role = %user.role, "login");
        self.store.set_session(user);
        tokio::time::sleep(self.config.login_settle_delay()).await;
        self.refresh(true).await
    }

    /// Logout; drops every cached resource and tracked job
    pub fn on_logout(&self) {
        self.store.reset();
        self.stats.reset();
        self.jobs.clear();
        tracing::info!("logged out, caches cleared");
    }

    // ========== Predictions ==========

    /// Fetch predictions, announcing a refresh when partitions were replaced
    ///
    /// # Errors
    /// Returns `SyncError::Cache` if the fetch fails
    pub async fn refresh(&self, force_refresh: bool) -> SyncResult<FetchOutcome> {
        let outcome = self.store.fetch_all(force_refresh).await?;
        if matches!(outcome, FetchOutcome::Refreshed { .. }) {
            self.events.publish(PredictionEvent::Refreshed);
        }
        Ok(outcome)
    }

    /// Records of `kind` visible under the active scope
    #[must_use]
    pub fn predictions(&self, kind: PredictionKind) -> Vec<Prediction> {
        self.store.get_filtered(kind)
    }

    /// Change the scope filter (role cap applied)
    pub fn set_active_scope(&self, scope: ActiveScope) -> ActiveScope {
        self.store.set_active_scope(scope)
    }

    /// Create a prediction, then write it through and refresh
    ///
    /// # Errors
    /// - `SyncError::NoSession` without an authenticated user
    /// - `SyncError::Api` if the create call fails (nothing changes locally)
    pub async fn create_prediction(&self, input: &PredictionInput) -> SyncResult<Prediction> {
        self.require_session()?;
        let kind = input.kind();
        let raw = self.api.create(kind, input).await?;
        let prediction = self.store.normalizer().normalize(&raw, kind, Origin::User);
        tracing::info!(id = %prediction.id, %kind, scope = %prediction.scope, "prediction created");

        self.store.add_prediction(prediction.clone(), kind);
        self.reconciler
            .invalidate_and_refresh(PredictionEvent::Created {
                id: prediction.id.clone(),
                kind,
            })
            .await;
        Ok(prediction)
    }

    /// Update a prediction, then write it through and refresh
    ///
    /// # Errors
    /// - `SyncError::NoSession` without an authenticated user
    /// - `SyncError::Api` if the update call fails (nothing changes locally)
    pub async fn update_prediction(
        &self,
        id: &PredictionId,
        input: &PredictionInput,
    ) -> SyncResult<Prediction> {
        self.require_session()?;
        let kind = input.kind();
        let raw = self.api.update(kind, id, input).await?;
        let mut prediction = self.store.normalizer().normalize(&raw, kind, Origin::User);
        if prediction.id.as_str().is_empty() {
            prediction.id = id.clone();
        }
        tracing::info!(%id, %kind, "prediction updated");

        self.store.replace_prediction(prediction.clone(), kind, id);
        self.reconciler
            .invalidate_and_refresh(PredictionEvent::Updated {
                id: id.clone(),
                kind,
            })
            .await;
        Ok(prediction)
    }

    /// Delete a prediction, then remove it locally and refresh
    ///
    /// # Errors
    /// - `SyncError::NoSession` without an authenticated user
    /// - `SyncError::Api` if the delete call fails (nothing changes locally)
    pub async fn delete_prediction(
        &self,
        id: &PredictionId,
        kind: PredictionKind,
    ) -> SyncResult<()> {
        self.require_session()?;
        self.api.delete(kind, id).await?;
        let removed = self.store.remove_prediction(id, kind);
        tracing::info!(%id, %kind, removed, "prediction deleted");

        self.reconciler
            .invalidate_and_refresh(PredictionEvent::Deleted {
                id: id.clone(),
                kind,
            })
            .await;
        Ok(())
    }

    fn require_session(&self) -> SyncResult<CurrentUser> {
        self.store.session().ok_or(SyncError::NoSession)
    }

    // ========== Statistics ==========

    /// Dashboard statistics, fetched on demand
    ///
    /// # Errors
    /// - `SyncError::NoSession` without an authenticated user
    /// - `SyncError::Api` if the statistics call fails
    pub async fn dashboard_stats(
        &self,
        force_refresh: bool,
    ) -> SyncResult<Option<Arc<DashboardStats>>> {
        let user = self.require_session()?;
        self.stats.get(&user, force_refresh).await
    }

    // ========== Bulk jobs ==========

    /// Start tracking an uploaded bulk job
    pub fn track_bulk_job(&self, id: JobId, file_name: impl Into<String>) -> BulkJob {
        self.jobs.track(id, file_name)
    }

    /// Poll bulk jobs until `shutdown` resolves
    pub async fn run_job_poller<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        self.jobs.run(shutdown).await;
    }

    // ========== Status & subscriptions ==========

    /// Fetch status of the predictions resource
    #[must_use]
    pub fn predictions_status(&self) -> ResourceStatus {
        ResourceStatus::from_parts(self.store.is_fetching(), self.store.last_error())
    }

    /// Fetch status of the statistics resource
    #[must_use]
    pub fn stats_status(&self) -> ResourceStatus {
        self.stats.status()
    }

    /// Register a change callback
    pub fn on_predictions_changed<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&PredictionEvent) + Send + Sync + 'static,
    {
        self.events.on_predictions_changed(callback)
    }

    /// Receive change events asynchronously
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PredictionEvent> {
        self.events.subscribe()
    }

    /// Prediction store
    #[inline]
    #[must_use]
    pub fn store(&self) -> &Arc<PredictionStore> {
        &self.store
    }

    /// Statistics cache
    #[inline]
    #[must_use]
    pub fn stats(&self) -> &Arc<StatsCache> {
        &self.stats
    }

    /// Bulk job tracker
    #[inline]
    #[must_use]
    pub fn jobs(&self) -> &JobTracker {
        &self.jobs
    }

    /// Configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }
}
