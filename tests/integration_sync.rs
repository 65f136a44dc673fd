//! Sync scheduler integration tests
//!
//! Runs the scheduler against an in-memory SQLite database with
//! millisecond intervals:
//! - Periodic firings and retry chains
//! - Run history and status persistence
//! - Unscheduling and resuming persisted tasks
//! - Manual syncs

mod common;

use std::sync::Arc;
use std::time::Duration;

use band_sync::database::Database;
use band_sync::error::{AttemptError, SchedulerError, SyncError};
use band_sync::models::{RunOutcome, RunTrigger, SyncStatusValue};
use band_sync::sync::ScheduleOutcome;

use common::{create_scheduler, create_test_database, fast_task, ScriptedProvider};

/// Test 1: A scheduled task fires immediately and records a successful run
#[tokio::test]
async fn test_scheduled_task_fires_and_records_run() {
    let db = create_test_database().await;
    let provider = Arc::new(ScriptedProvider::new(Ok(())));
    let scheduler = create_scheduler(Arc::clone(&db), Arc::clone(&provider));

    let outcome = scheduler
        .schedule(fast_task("fast", 10_000, 10))
        .await
        .unwrap();
    assert_eq!(outcome, ScheduleOutcome::Scheduled);

    tokio::time::sleep(Duration::from_millis(200)).await;
    scheduler.stop().await;

    assert_eq!(provider.calls(), 1);

    let runs = db.get_runs("fast", 10).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].outcome, RunOutcome::Success);
    assert_eq!(runs[0].trigger, RunTrigger::Periodic);
    assert_eq!(runs[0].attempt_number, 1);

    let status = db.get_sync_status("fast").await.unwrap().unwrap();
    assert_eq!(status.status, SyncStatusValue::Success);
    assert!(status.last_success_at.is_some());
}

/// Test 2: Failures retry until the cap, then the firing fails permanently
#[tokio::test]
async fn test_retry_chain_exhausts_attempts() {
    let db = create_test_database().await;
    let provider = Arc::new(ScriptedProvider::new(Err(SyncError::ServerError(503))));
    let scheduler = create_scheduler(Arc::clone(&db), Arc::clone(&provider));

    scheduler
        .schedule(fast_task("flaky", 10_000, 20))
        .await
        .unwrap();

    // Backoff waits are 20ms then 40ms
    tokio::time::sleep(Duration::from_millis(500)).await;
    scheduler.stop().await;

    assert_eq!(provider.calls(), 3);

    // Newest first
    let runs = db.get_runs("flaky", 10).await.unwrap();
    let outcomes: Vec<_> = runs.iter().map(|r| r.outcome).collect();
    assert_eq!(
        outcomes,
        vec![
            RunOutcome::PermanentFailure,
            RunOutcome::Retry,
            RunOutcome::Retry
        ]
    );
    let attempts: Vec<_> = runs.iter().map(|r| r.attempt_number).collect();
    assert_eq!(attempts, vec![3, 2, 1]);
    assert!(runs[0]
        .error_message
        .as_deref()
        .unwrap()
        .contains("Attempts exhausted after 3 tries"));

    let status = db.get_sync_status("flaky").await.unwrap().unwrap();
    assert_eq!(status.status, SyncStatusValue::Failed);
}

/// Test 3: A success during retries ends the firing
#[tokio::test]
async fn test_success_after_retry() {
    let db = create_test_database().await;
    let provider = Arc::new(
        ScriptedProvider::new(Ok(())).with_script(vec![Err(SyncError::NetworkTimeout)]),
    );
    let scheduler = create_scheduler(Arc::clone(&db), Arc::clone(&provider));

    scheduler
        .schedule(fast_task("recovering", 10_000, 20))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;
    scheduler.stop().await;

    assert_eq!(provider.calls(), 2);

    let runs = db.get_runs("recovering", 10).await.unwrap();
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[0].outcome, RunOutcome::Success);
    assert_eq!(runs[0].attempt_number, 2);
    assert_eq!(runs[1].outcome, RunOutcome::Retry);
}

/// Test 4: The task keeps firing at its interval
#[tokio::test]
async fn test_periodic_firings() {
    let db = create_test_database().await;
    let provider = Arc::new(ScriptedProvider::new(Ok(())));
    let scheduler = create_scheduler(Arc::clone(&db), Arc::clone(&provider));

    scheduler
        .schedule(fast_task("ticking", 100, 10))
        .await
        .unwrap();

    // Firings at 0, 100, 200 and 300ms
    tokio::time::sleep(Duration::from_millis(350)).await;
    scheduler.stop().await;

    let calls = provider.calls();
    assert!((3..=5).contains(&calls), "unexpected firings: {}", calls);
}

/// Test 5: Scheduling twice keeps the first definition
#[tokio::test]
async fn test_schedule_is_idempotent() {
    let db = create_test_database().await;
    let provider = Arc::new(ScriptedProvider::new(Ok(())));
    let scheduler = create_scheduler(Arc::clone(&db), Arc::clone(&provider));

    scheduler
        .schedule(fast_task("dup", 10_000, 10))
        .await
        .unwrap();
    let second = scheduler
        .schedule(fast_task("dup", 20_000, 10).with_max_attempts(5))
        .await
        .unwrap();
    assert_eq!(second, ScheduleOutcome::AlreadyScheduled);

    let stored = db.get_task("dup").await.unwrap().unwrap();
    assert_eq!(stored.interval, Duration::from_secs(10));
    assert_eq!(stored.max_attempts_per_cycle, 3);

    tokio::time::sleep(Duration::from_millis(100)).await;
    scheduler.stop().await;
    assert_eq!(provider.calls(), 1);
}

/// Test 6: Unscheduling during backoff cancels the pending retry
#[tokio::test]
async fn test_unschedule_cancels_retry() {
    let db = create_test_database().await;
    let provider = Arc::new(ScriptedProvider::new(Err(SyncError::ServerError(500))));
    let scheduler = create_scheduler(Arc::clone(&db), Arc::clone(&provider));

    scheduler
        .schedule(fast_task("doomed", 10_000, 300))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(scheduler.unschedule("doomed").await.unwrap());
    assert!(!scheduler.is_scheduled("doomed").await);

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(provider.calls(), 1);
    assert!(db.get_task("doomed").await.unwrap().is_none());

    // Unknown names are a no-op
    assert!(!scheduler.unschedule("doomed").await.unwrap());
}

/// Test 7: A new scheduler resumes tasks persisted by an earlier one
#[tokio::test]
async fn test_resume_persisted_task() {
    let db = create_test_database().await;

    let first_provider = Arc::new(ScriptedProvider::new(Ok(())));
    let first = create_scheduler(Arc::clone(&db), Arc::clone(&first_provider));
    first
        .schedule(fast_task("persisted", 10_000, 10))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    first.stop().await;

    let second_provider = Arc::new(ScriptedProvider::new(Ok(())));
    let second = create_scheduler(Arc::clone(&db), Arc::clone(&second_provider));
    assert_eq!(second.resume().await.unwrap(), 1);
    assert!(second.is_scheduled("persisted").await);

    tokio::time::sleep(Duration::from_millis(100)).await;
    second.stop().await;

    assert_eq!(second_provider.calls(), 1);
    assert_eq!(db.get_runs("persisted", 10).await.unwrap().len(), 2);
}

/// Test 8: Manual syncs run once and are recorded with their trigger
#[tokio::test]
async fn test_manual_sync_recorded() {
    let db = create_test_database().await;
    let provider = Arc::new(
        ScriptedProvider::new(Ok(())).with_script(vec![Err(SyncError::ConnectionRefused)]),
    );
    let scheduler = create_scheduler(Arc::clone(&db), Arc::clone(&provider));
    let task = fast_task("manual", 10_000, 10);

    let err = scheduler.trigger_manual_sync(&task).await.unwrap_err();
    assert!(matches!(
        err,
        SchedulerError::Attempt(AttemptError::Provider(SyncError::ConnectionRefused))
    ));
    assert!(scheduler.trigger_manual_sync(&task).await.is_ok());
    assert_eq!(provider.calls(), 2);

    let runs = db.get_runs("manual", 10).await.unwrap();
    assert_eq!(runs.len(), 2);
    assert!(runs.iter().all(|r| r.trigger == RunTrigger::Manual));
    assert_eq!(runs[0].outcome, RunOutcome::Success);
    assert_eq!(runs[1].outcome, RunOutcome::PermanentFailure);

    // Manual syncs do not schedule anything
    assert!(!scheduler.is_scheduled("manual").await);
}

/// Test 9: A provider that is not ready is never asked to sync
#[tokio::test]
async fn test_manual_sync_not_ready() {
    let db = create_test_database().await;
    let provider = Arc::new(ScriptedProvider::new(Ok(())));
    provider.set_ready(false);
    let scheduler = create_scheduler(Arc::clone(&db), Arc::clone(&provider));

    let err = scheduler
        .trigger_manual_sync(&fast_task("unready", 10_000, 10))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        SchedulerError::Attempt(AttemptError::ProviderNotReady)
    ));
    assert_eq!(provider.calls(), 0);
}
