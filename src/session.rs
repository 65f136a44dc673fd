//! Host-facing sync session
//!
//! Owns the scheduler and the configured task definition and exposes the
//! control operations a host needs: toggling auto-sync, one-shot syncs,
//! readiness and status. Dropping the session's loops on process exit keeps
//! the persisted schedule; ending the session removes it.

use serde::Serialize;
use tracing::info;

use crate::database::Database;
use crate::error::SchedulerError;
use crate::models::{SyncRun, SyncStatus, SyncTask};
use crate::sync::{ScheduleOutcome, SyncScheduler};

/// Snapshot returned by [`SyncSession::status`]
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    /// Whether the periodic loop runs in this process
    pub auto_sync_enabled: bool,
    /// Whether the provider reports it is ready
    pub provider_ready: bool,
    /// Effective task definition
    pub task: serde_json::Value,
    /// Last known state of the task
    pub last_sync: Option<SyncStatus>,
}

/// Sync session bound to one task definition
pub struct SyncSession<D: Database + 'static> {
    scheduler: SyncScheduler<D>,
    task: SyncTask,
}

impl<D: Database + 'static> SyncSession<D> {
    /// Create a session without touching the schedule
    pub fn new(scheduler: SyncScheduler<D>, task: SyncTask) -> Self {
        Self { scheduler, task }
    }

    /// Resume persisted schedules, then enable auto-sync if requested
    pub async fn start(
        scheduler: SyncScheduler<D>,
        task: SyncTask,
        auto_sync: bool,
    ) -> Result<Self, SchedulerError> {
        let session = Self::new(scheduler, task);
        session.scheduler.resume().await?;
        if auto_sync {
            session.enable_auto_sync().await?;
        }
        Ok(session)
    }

    /// Configured task definition
    pub fn task(&self) -> &SyncTask {
        &self.task
    }

    /// Underlying scheduler
    pub fn scheduler(&self) -> &SyncScheduler<D> {
        &self.scheduler
    }

    /// Schedule the periodic task; a no-op if already scheduled
    pub async fn enable_auto_sync(&self) -> Result<ScheduleOutcome, SchedulerError> {
        let outcome = self.scheduler.schedule(self.task.clone()).await?;
        info!(task = %self.task.name, outcome = ?outcome, "Auto-sync enabled");
        Ok(outcome)
    }

    /// Remove the periodic task; a no-op if not scheduled
    pub async fn disable_auto_sync(&self) -> Result<bool, SchedulerError> {
        let removed = self.scheduler.unschedule(&self.task.name).await?;
        info!(task = %self.task.name, removed, "Auto-sync disabled");
        Ok(removed)
    }

    /// Whether the periodic loop runs in this process
    pub async fn is_auto_sync_enabled(&self) -> bool {
        self.scheduler.is_scheduled(&self.task.name).await
    }

    /// Run one attempt now and report its result
    pub async fn trigger_manual_sync(&self) -> Result<(), SchedulerError> {
        self.scheduler.trigger_manual_sync(&self.task).await
    }

    /// Whether the provider reports it is ready
    pub async fn is_ready(&self) -> bool {
        self.scheduler.provider_ready().await
    }

    /// Current session state
    pub async fn status(&self) -> Result<SessionStatus, SchedulerError> {
        let task = self
            .scheduler
            .task(&self.task.name)
            .await?
            .unwrap_or_else(|| self.task.clone());

        Ok(SessionStatus {
            auto_sync_enabled: self.is_auto_sync_enabled().await,
            provider_ready: self.is_ready().await,
            task: task.to_json(),
            last_sync: self.scheduler.status(&self.task.name).await?,
        })
    }

    /// Most recent runs of the task, newest first
    pub async fn recent_runs(&self, limit: u32) -> Result<Vec<SyncRun>, SchedulerError> {
        self.scheduler.recent_runs(&self.task.name, limit).await
    }

    /// Stop loops but keep the persisted schedule
    pub async fn detach(&self) {
        info!("Detaching sync session");
        self.scheduler.stop().await;
    }

    /// Disable auto-sync and stop all loops
    pub async fn shutdown(&self) -> Result<(), SchedulerError> {
        info!("Shutting down sync session");
        self.disable_auto_sync().await?;
        self.scheduler.stop().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::MockDatabase;
    use crate::models::Constraints;
    use crate::sync::provider::MockSyncProvider;
    use crate::sync::{AssumeConnected, SchedulerConfig, SyncWorker};
    use std::sync::Arc;

    fn ready_provider(ready: bool) -> MockSyncProvider {
        let mut provider = MockSyncProvider::new();
        provider.expect_is_ready().returning(move || ready);
        provider.expect_attempt_sync().returning(|| Ok(()));
        provider
    }

    fn base_db() -> MockDatabase {
        let mut db = MockDatabase::new();
        db.expect_list_tasks().returning(|| Ok(vec![]));
        db.expect_insert_run().returning(|_| Ok(1));
        db.expect_update_sync_status().returning(|_| Ok(()));
        db.expect_get_sync_status().returning(|_| Ok(None));
        db
    }

    fn session(db: MockDatabase, provider: MockSyncProvider) -> SyncSession<MockDatabase> {
        let worker = SyncWorker::new(Arc::new(provider), Arc::new(AssumeConnected));
        let scheduler =
            SyncScheduler::new(SchedulerConfig::default(), Arc::new(db), Arc::new(worker));
        SyncSession::new(
            scheduler,
            SyncTask::default().with_constraints(Constraints::none()),
        )
    }

    // Test 1: Starting with auto-sync schedules the task
    #[tokio::test(start_paused = true)]
    async fn test_start_with_auto_sync() {
        let mut db = base_db();
        db.expect_insert_task_if_absent()
            .times(1)
            .returning(|_| Ok(true));

        let s = session(db, ready_provider(true));
        let SyncSession { scheduler, task } = s;
        let session = SyncSession::start(scheduler, task, true).await.unwrap();

        assert!(session.is_auto_sync_enabled().await);
        session.detach().await;
    }

    // Test 2: Starting without auto-sync leaves the schedule alone
    #[tokio::test]
    async fn test_start_without_auto_sync() {
        let mut db = base_db();
        db.expect_insert_task_if_absent().times(0);

        let s = session(db, ready_provider(true));
        let SyncSession { scheduler, task } = s;
        let session = SyncSession::start(scheduler, task, false).await.unwrap();

        assert!(!session.is_auto_sync_enabled().await);
    }

    // Test 3: Readiness delegates to the provider
    #[tokio::test]
    async fn test_is_ready() {
        assert!(session(base_db(), ready_provider(true)).is_ready().await);
        assert!(!session(base_db(), ready_provider(false)).is_ready().await);
    }

    // Test 4: Shutdown removes the schedule, detach keeps it
    #[tokio::test(start_paused = true)]
    async fn test_shutdown_and_detach() {
        let mut db = base_db();
        db.expect_insert_task_if_absent().returning(|_| Ok(true));
        db.expect_delete_task()
            .withf(|name| name == "toolkit_periodic_sync")
            .times(1)
            .returning(|_| Ok(true));

        let session = session(db, ready_provider(true));
        session.enable_auto_sync().await.unwrap();
        session.detach().await;
        assert!(!session.is_auto_sync_enabled().await);

        session.enable_auto_sync().await.unwrap();
        session.shutdown().await.unwrap();
        assert!(!session.is_auto_sync_enabled().await);
    }

    // Test 5: Status reports the configured task when nothing is persisted
    #[tokio::test]
    async fn test_status_snapshot() {
        let mut db = base_db();
        db.expect_get_task().returning(|_| Ok(None));

        let session = session(db, ready_provider(false));
        let status = session.status().await.unwrap();

        assert!(!status.auto_sync_enabled);
        assert!(!status.provider_ready);
        assert_eq!(status.task["name"], "toolkit_periodic_sync");
        assert_eq!(status.task["interval_secs"], 900);
        assert!(status.last_sync.is_none());
    }

    // Test 6: Manual trigger reports the provider's result
    #[tokio::test]
    async fn test_manual_trigger() {
        let session = session(base_db(), ready_provider(true));
        assert!(session.trigger_manual_sync().await.is_ok());
    }
}
