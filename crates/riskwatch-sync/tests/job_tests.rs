use pretty_assertions::assert_eq;
use riskwatch_model::{ActiveScope, PredictionId, PredictionKind, Role};
use riskwatch_sync::{
    JobId, JobStatus, JobStatusReport, JobSummary, PredictionEvent, SyncConfig, SyncCoordinator,
};
use riskwatch_test_utils::{raw_annual, user, FakeBackend};
use std::sync::Arc;
use std::time::Duration;

fn summary(rows: u32) -> JobSummary {
    JobSummary {
        total_rows: rows,
        successful_rows: rows,
        ..JobSummary::default()
    }
}

#[tokio::test]
async fn test_completed_job_refreshes_predictions() {
    let backend = Arc::new(FakeBackend::seeded());
    let job = JobId::new("bulk-1");
    backend.script_job(
        job.clone(),
        vec![
            JobStatusReport::new(JobStatus::Processing, 50),
            JobStatusReport::new(JobStatus::Completed, 100).with_summary(summary(1)),
        ],
    );
    backend.job_creates(
        job.clone(),
        vec![(PredictionKind::Annual, raw_annual("b1", "BULK", "personal", 0.15))],
    );

    let sync = SyncCoordinator::with_backend(SyncConfig::default(), Arc::clone(&backend));
    sync.on_session_established(user(Role::User)).await.unwrap();
    sync.dashboard_stats(false).await.unwrap();
    let mut events = sync.subscribe();

    let tracked = sync.track_bulk_job(job.clone(), "companies.csv");
    assert_eq!(tracked.status, JobStatus::Pending);

    assert_eq!(sync.jobs().poll_once().await, 1);
    assert_eq!(sync.jobs().get(&job).unwrap().status, JobStatus::Processing);
    assert!(sync.store().find(&PredictionId::new("b1")).is_none());

    assert_eq!(sync.jobs().poll_once().await, 1);
    let finished = sync.jobs().get(&job).unwrap();
    assert_eq!(finished.status, JobStatus::Completed);
    assert_eq!(finished.progress, 100);
    assert_eq!(finished.summary.unwrap().successful_rows, 1);

    sync.set_active_scope(ActiveScope::Personal);
    assert!(sync
        .predictions(PredictionKind::Annual)
        .iter()
        .any(|p| p.id.as_str() == "b1"));
    assert!(sync.stats().last_fetched_at().is_none());
    assert_eq!(
        events.try_recv().unwrap(),
        PredictionEvent::BulkImportCompleted { job_id: job }
    );
    assert_eq!(events.try_recv().unwrap(), PredictionEvent::Refreshed);
}

#[tokio::test(start_paused = true)]
async fn test_failed_job_removed_after_configured_retention() {
    let backend = Arc::new(FakeBackend::seeded());
    let job = JobId::new("bulk-2");
    backend.script_job(
        job.clone(),
        vec![JobStatusReport::new(JobStatus::Failed, 20).with_error("bad header row")],
    );
    let config = SyncConfig::default().with_failed_job_retention(Some(Duration::from_secs(10)));
    let sync = SyncCoordinator::with_backend(config, Arc::clone(&backend));
    sync.on_session_established(user(Role::User)).await.unwrap();
    let list_calls = backend.list_calls();

    sync.track_bulk_job(job.clone(), "broken.csv");
    sync.jobs().poll_once().await;

    let failed = sync.jobs().get(&job).unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.error.as_deref(), Some("bad header row"));
    assert_eq!(backend.list_calls(), list_calls);

    tokio::time::sleep(Duration::from_secs(11)).await;
    tokio::task::yield_now().await;
    assert!(sync.jobs().get(&job).is_none());
}

#[tokio::test(start_paused = true)]
async fn test_poller_runs_on_interval_until_shutdown() {
    let backend = Arc::new(FakeBackend::seeded());
    let job = JobId::new("bulk-3");
    backend.script_job(
        job.clone(),
        vec![
            JobStatusReport::new(JobStatus::Pending, 0),
            JobStatusReport::new(JobStatus::Processing, 30),
            JobStatusReport::new(JobStatus::Completed, 100),
        ],
    );
    let sync = Arc::new(SyncCoordinator::with_backend(
        SyncConfig::default(),
        Arc::clone(&backend),
    ));
    sync.on_session_established(user(Role::User)).await.unwrap();
    sync.track_bulk_job(job.clone(), "ok.csv");

    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let poller = tokio::spawn({
        let sync = Arc::clone(&sync);
        async move {
            sync.run_job_poller(async move {
                let _ = stop_rx.await;
            })
            .await;
        }
    });

    // Ticks at 0s, 2s and 4s drain the script
    tokio::time::sleep(Duration::from_millis(4_500)).await;
    assert_eq!(sync.jobs().get(&job).unwrap().status, JobStatus::Completed);
    assert_eq!(backend.job_calls(), 3);

    // No active jobs left, so later ticks do not poll
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(backend.job_calls(), 3);

    stop_tx.send(()).unwrap();
    poller.await.unwrap();
}

#[tokio::test]
async fn test_unknown_job_marked_failed() {
    let backend = Arc::new(FakeBackend::seeded());
    let sync = SyncCoordinator::with_backend(
        SyncConfig::default().with_failed_job_retention(None),
        Arc::clone(&backend),
    );
    sync.on_session_established(user(Role::User)).await.unwrap();

    let job = JobId::generate();
    sync.track_bulk_job(job.clone(), "lost.csv");
    sync.jobs().poll_once().await;

    let failed = sync.jobs().get(&job).unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert!(failed.error.unwrap().starts_with("job not found"));
    assert_eq!(sync.jobs().active_count(), 0);
}
