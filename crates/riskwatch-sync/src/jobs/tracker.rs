//! Job registry, status polling and completion fan-out

use super::state::{validate_transition, JobStatus};
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::join_all;
use riskwatch_model::ApiError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

/// Bulk job identifier assigned by the upload endpoint
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Wrap an id
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh random id
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Borrow as str
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Row counts reported once a job has processed its file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobSummary {
    /// Rows in the uploaded file
    pub total_rows: u32,
    /// Rows that produced a prediction
    pub successful_rows: u32,
    /// Rows rejected
    pub failed_rows: u32,
    /// Per-row error messages
    pub errors: Vec<String>,
}

/// One poll response from the job status endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatusReport {
    /// Reported status
    pub status: JobStatus,
    /// Reported progress (0-100)
    #[serde(default)]
    pub progress: u8,
    /// Row counts, usually present once terminal
    #[serde(default)]
    pub summary: Option<JobSummary>,
    /// Failure reason
    #[serde(default)]
    pub error: Option<String>,
}

impl JobStatusReport {
    /// Report with a status and progress
    #[inline]
    #[must_use]
    pub fn new(status: JobStatus, progress: u8) -> Self {
        Self {
            status,
            progress,
            summary: None,
            error: None,
        }
    }

    /// With summary
    #[inline]
    #[must_use]
    pub fn with_summary(mut self, summary: JobSummary) -> Self {
        self.summary = Some(summary);
        self
    }

    /// With failure reason
    #[inline]
    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// A tracked bulk upload job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkJob {
    /// Job id
    pub id: JobId,
    /// Uploaded file name
    pub file_name: String,
    /// Current status
    pub status: JobStatus,
    /// Progress (0-100, never decreases)
    pub progress: u8,
    /// Row counts
    pub summary: Option<JobSummary>,
    /// Failure reason
    pub error: Option<String>,
    /// When tracking started
    pub created_at: DateTime<Utc>,
    /// Last applied report
    pub updated_at: DateTime<Utc>,
}

/// Job status endpoint
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait JobStatusSource: Send + Sync {
    /// Current status of a job
    async fn job_status(&self, id: &JobId) -> Result<JobStatusReport, ApiError>;
}

/// Called once when a job reaches `completed`
#[async_trait]
pub trait JobCompletionHook: Send + Sync {
    /// React to a completed job
    async fn on_job_completed(&self, job: &BulkJob);
}

/// Tracks bulk jobs by polling their status
///
/// Cloning yields a handle to the same job table.
#[derive(Clone)]
pub struct JobTracker {
    source: Arc<dyn JobStatusSource>,
    hook: Option<Arc<dyn JobCompletionHook>>,
    jobs: Arc<DashMap<JobId, BulkJob>>,
    poll_interval: Duration,
    retention: Option<Duration>,
}

impl fmt::Debug for JobTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobTracker")
            .field("jobs", &self.jobs.len())
            .field("poll_interval", &self.poll_interval)
            .field("retention", &self.retention)
            .finish_non_exhaustive()
    }
}

impl JobTracker {
    /// Create tracker
    ///
    /// `retention` bounds how long failed jobs stay visible; `None` keeps
    /// them until dismissed.
    #[must_use]
    pub fn new(
        source: Arc<dyn JobStatusSource>,
        poll_interval: Duration,
        retention: Option<Duration>,
    ) -> Self {
        Self {
            source,
            hook: None,
            jobs: Arc::new(DashMap::new()),
            poll_interval,
            retention,
        }
    }

    /// Create tracker from configuration
    #[must_use]
    pub fn from_config(source: Arc<dyn JobStatusSource>, config: &SyncConfig) -> Self {
        Self::new(
            source,
            config.job_poll_interval(),
            config.failed_job_retention(),
        )
    }

    /// With completion hook
    #[inline]
    #[must_use]
    pub fn with_completion_hook(mut self, hook: Arc<dyn JobCompletionHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Start tracking a freshly created job as `pending`
    ///
    /// Tracking an id twice returns the existing entry.
    pub fn track(&self, id: JobId, file_name: impl Into<String>) -> BulkJob {
        let file_name = file_name.into();
        self.jobs
            .entry(id.clone())
            .or_insert_with(|| {
                tracing::info!(job = %id, file = %file_name, "tracking bulk job");
                let now = Utc::now();
                BulkJob {
                    id,
                    file_name,
                    status: JobStatus::Pending,
                    progress: 0,
                    summary: None,
                    error: None,
                    created_at: now,
                    updated_at: now,
                }
            })
            .clone()
    }

    /// Snapshot of one job
    #[must_use]
    pub fn get(&self, id: &JobId) -> Option<BulkJob> {
        self.jobs.get(id).map(|job| job.clone())
    }

    /// All jobs, oldest first
    #[must_use]
    pub fn jobs(&self) -> Vec<BulkJob> {
        let mut jobs: Vec<BulkJob> = self.jobs.iter().map(|entry| entry.value().clone()).collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        jobs
    }

    /// Jobs not yet terminal
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.jobs
            .iter()
            .filter(|entry| !entry.status.is_terminal())
            .count()
    }

    /// Stop tracking a job
    ///
    /// # Errors
    /// Returns `SyncError::JobNotFound` if the id is not tracked
    pub fn dismiss(&self, id: &JobId) -> SyncResult<BulkJob> {
        self.jobs
            .remove(id)
            .map(|(_, job)| job)
            .ok_or_else(|| SyncError::JobNotFound(id.clone()))
    }

    /// Drop every completed or failed job; returns how many were removed
    pub fn clear_finished(&self) -> usize {
        let before = self.jobs.len();
        self.jobs.retain(|_, job| !job.status.is_terminal());
        before - self.jobs.len()
    }

    /// Drop every job (logout)
    pub fn clear(&self) {
        self.jobs.clear();
    }

    /// Poll every active job once, concurrently
    ///
    /// Returns the number of jobs whose status changed. Poll failures leave
    /// the job untouched for the next round, except `NotFound`, which fails
    /// the job.
    pub async fn poll_once(&self) -> usize {
        let active: Vec<JobId> = self
            .jobs
            .iter()
            .filter(|entry| !entry.status.is_terminal())
            .map(|entry| entry.key().clone())
            .collect();
        if active.is_empty() {
            return 0;
        }

        let polls = active.into_iter().map(|id| async move {
            let result = self.source.job_status(&id).await;
            (id, result)
        });

        let mut changed = 0;
        for (id, result) in join_all(polls).await {
            let report = match result {
                Ok(report) => report,
                Err(ApiError::NotFound(message)) => {
                    tracing::warn!(job = %id, %message, "bulk job vanished upstream");
                    let progress = self.get(&id).map_or(0, |job| job.progress);
                    JobStatusReport::new(JobStatus::Failed, progress)
                        .with_error(format!("job not found: {message}"))
                }
                Err(err) => {
                    tracing::warn!(job = %id, error = %err, "bulk job poll failed, will retry");
                    continue;
                }
            };
            match self.apply(&id, report).await {
                Ok(Some(_)) => changed += 1,
                Ok(None) => {}
                Err(err) => tracing::debug!(job = %id, error = %err, "job dropped during poll"),
            }
        }
        changed
    }

    /// Apply one status report to a tracked job
    ///
    /// Returns the new status if it changed. Reports that would move the job
    /// backwards are ignored. Progress is clamped to 100 and never decreases.
    ///
    /// # Errors
    /// Returns `SyncError::JobNotFound` if the id is not tracked
    pub async fn apply(
        &self,
        id: &JobId,
        report: JobStatusReport,
    ) -> SyncResult<Option<JobStatus>> {
        let transitioned = {
            let mut job = self
                .jobs
                .get_mut(id)
                .ok_or_else(|| SyncError::JobNotFound(id.clone()))?;
            let from = job.status;
            if report.status != from {
                if let Err(err) = validate_transition(from, report.status) {
                    tracing::debug!(job = %id, error = %err, "ignoring out-of-order job report");
                    return Ok(None);
                }
                job.status = report.status;
            }
            job.progress = job.progress.max(report.progress.min(100));
            if job.status == JobStatus::Completed {
                job.progress = 100;
            }
            if report.summary.is_some() {
                job.summary = report.summary;
            }
            if report.error.is_some() {
                job.error = report.error;
            }
            job.updated_at = Utc::now();
            (job.status != from).then(|| job.clone())
        };

        let Some(job) = transitioned else {
            return Ok(None);
        };
        match job.status {
            JobStatus::Completed => {
                tracing::info!(job = %job.id, file = %job.file_name, "bulk job completed");
                if let Some(hook) = &self.hook {
                    hook.on_job_completed(&job).await;
                }
            }
            JobStatus::Failed => {
                tracing::warn!(
                    job = %job.id,
                    error = job.error.as_deref().unwrap_or("unknown"),
                    "bulk job failed"
                );
                self.schedule_removal(job.id.clone());
            }
            JobStatus::Pending | JobStatus::Processing => {
                tracing::debug!(
                    job = %job.id,
                    status = %job.status,
                    progress = job.progress,
                    "bulk job advanced"
                );
            }
        }
        Ok(Some(job.status))
    }

    fn schedule_removal(&self, id: JobId) {
        let Some(retention) = self.retention else {
            return;
        };
        let jobs = Arc::clone(&self.jobs);
        tokio::spawn(async move {
            tokio::time::sleep(retention).await;
            if jobs
                .remove_if(&id, |_, job| job.status == JobStatus::Failed)
                .is_some()
            {
                tracing::debug!(job = %id, "removed failed bulk job");
            }
        });
    }

    /// Poll on the configured interval until `shutdown` resolves
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);
        tracing::debug!(interval = ?self.poll_interval, "job poller started");
        loop {
            tokio::select! {
                () = &mut shutdown => {
                    tracing::debug!("job poller stopping");
                    break;
                }
                _ = ticker.tick() => {
                    if self.active_count() > 0 {
                        self.poll_once().await;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingHook {
        completed: AtomicUsize,
    }

    #[async_trait]
    impl JobCompletionHook for CountingHook {
        async fn on_job_completed(&self, _: &BulkJob) {
            self.completed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn tracker(source: MockJobStatusSource) -> (JobTracker, Arc<CountingHook>) {
        let hook = Arc::new(CountingHook::default());
        let tracker = JobTracker::new(
            Arc::new(source),
            Duration::from_secs(2),
            Some(Duration::from_secs(30)),
        )
        .with_completion_hook(Arc::clone(&hook) as Arc<dyn JobCompletionHook>);
        (tracker, hook)
    }

    #[tokio::test]
    async fn new_job_is_pending() {
        let (tracker, _) = tracker(MockJobStatusSource::new());
        let job = tracker.track(JobId::new("j1"), "upload.csv");
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.progress, 0);
        assert_eq!(tracker.active_count(), 1);

        let again = tracker.track(JobId::new("j1"), "other.csv");
        assert_eq!(again.file_name, "upload.csv");
        assert_eq!(tracker.jobs().len(), 1);
    }

    #[tokio::test]
    async fn poll_advances_and_completion_fires_hook_once() {
        let mut source = MockJobStatusSource::new();
        let mut calls = 0;
        source
            .expect_job_status()
            .with(eq(JobId::new("j1")))
            .times(2)
            .returning(move |_| {
                calls += 1;
                Ok(if calls == 1 {
                    JobStatusReport::new(JobStatus::Processing, 40)
                } else {
                    JobStatusReport::new(JobStatus::Completed, 90).with_summary(JobSummary {
                        total_rows: 3,
                        successful_rows: 3,
                        ..JobSummary::default()
                    })
                })
            });
        let (tracker, hook) = tracker(source);
        tracker.track(JobId::new("j1"), "upload.csv");

        assert_eq!(tracker.poll_once().await, 1);
        assert_eq!(tracker.get(&JobId::new("j1")).unwrap().progress, 40);

        assert_eq!(tracker.poll_once().await, 1);
        let job = tracker.get(&JobId::new("j1")).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);
        assert_eq!(job.summary.unwrap().successful_rows, 3);
        assert_eq!(hook.completed.load(Ordering::SeqCst), 1);

        // Terminal jobs are not polled again
        assert_eq!(tracker.poll_once().await, 0);
        assert_eq!(tracker.active_count(), 0);
    }

    #[tokio::test]
    async fn backwards_report_ignored() {
        let (tracker, _) = tracker(MockJobStatusSource::new());
        let id = JobId::new("j1");
        tracker.track(id.clone(), "upload.csv");

        tracker
            .apply(&id, JobStatusReport::new(JobStatus::Processing, 60))
            .await
            .unwrap();
        let changed = tracker
            .apply(&id, JobStatusReport::new(JobStatus::Pending, 10))
            .await
            .unwrap();

        assert_eq!(changed, None);
        let job = tracker.get(&id).unwrap();
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.progress, 60);
    }

    #[tokio::test]
    async fn progress_is_monotonic_and_clamped() {
        let (tracker, _) = tracker(MockJobStatusSource::new());
        let id = JobId::new("j1");
        tracker.track(id.clone(), "upload.csv");

        tracker
            .apply(&id, JobStatusReport::new(JobStatus::Processing, 70))
            .await
            .unwrap();
        tracker
            .apply(&id, JobStatusReport::new(JobStatus::Processing, 30))
            .await
            .unwrap();
        assert_eq!(tracker.get(&id).unwrap().progress, 70);

        tracker
            .apply(&id, JobStatusReport::new(JobStatus::Processing, 250))
            .await
            .unwrap();
        assert_eq!(tracker.get(&id).unwrap().progress, 100);
    }

    #[tokio::test]
    async fn transient_poll_error_leaves_job_unchanged() {
        let mut source = MockJobStatusSource::new();
        source
            .expect_job_status()
            .returning(|_| Err(ApiError::Network("timeout".into())));
        let (tracker, _) = tracker(source);
        tracker.track(JobId::new("j1"), "upload.csv");

        assert_eq!(tracker.poll_once().await, 0);
        assert_eq!(tracker.get(&JobId::new("j1")).unwrap().status, JobStatus::Pending);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_job_fails_and_is_removed_after_retention() {
        let mut source = MockJobStatusSource::new();
        source
            .expect_job_status()
            .returning(|_| Err(ApiError::NotFound("no such job".into())));
        let (tracker, hook) = tracker(source);
        let id = JobId::new("j1");
        tracker.track(id.clone(), "upload.csv");

        assert_eq!(tracker.poll_once().await, 1);
        let job = tracker.get(&id).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.unwrap().contains("no such job"));
        assert_eq!(hook.completed.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert!(tracker.get(&id).is_some());

        tokio::time::sleep(Duration::from_secs(2)).await;
        tokio::task::yield_now().await;
        assert!(tracker.get(&id).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_jobs_kept_without_retention() {
        let tracker =
            JobTracker::new(Arc::new(MockJobStatusSource::new()), Duration::from_secs(2), None);
        let id = JobId::new("j1");
        tracker.track(id.clone(), "upload.csv");
        tracker
            .apply(&id, JobStatusReport::new(JobStatus::Failed, 0).with_error("bad header"))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(tracker.get(&id).unwrap().status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn dismiss_and_clear_finished() {
        let (tracker, _) = tracker(MockJobStatusSource::new());
        tracker.track(JobId::new("a"), "a.csv");
        tracker.track(JobId::new("b"), "b.csv");
        tracker
            .apply(&JobId::new("a"), JobStatusReport::new(JobStatus::Completed, 100))
            .await
            .unwrap();

        assert_eq!(tracker.clear_finished(), 1);
        assert_eq!(tracker.jobs().len(), 1);

        assert!(tracker.dismiss(&JobId::new("b")).is_ok());
        assert_eq!(
            tracker.dismiss(&JobId::new("b")).unwrap_err(),
            SyncError::JobNotFound(JobId::new("b"))
        );
    }

    #[tokio::test]
    async fn apply_to_unknown_job_errors() {
        let (tracker, _) = tracker(MockJobStatusSource::new());
        let err = tracker
            .apply(&JobId::new("ghost"), JobStatusReport::new(JobStatus::Processing, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::JobNotFound(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn run_polls_until_shutdown() {
        let mut source = MockJobStatusSource::new();
        source
            .expect_job_status()
            .returning(|_| Ok(JobStatusReport::new(JobStatus::Completed, 100)));
        let (tracker, hook) = tracker(source);
        tracker.track(JobId::new("j1"), "upload.csv");

        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let poller = tracker.clone();
        let handle = tokio::spawn(async move {
            poller
                .run(async move {
                    let _ = stop_rx.await;
                })
                .await;
        });

        tokio::time::sleep(Duration::from_secs(5)).await;
        stop_tx.send(()).unwrap();
        handle.await.unwrap();

        assert_eq!(hook.completed.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.active_count(), 0);
    }
}
