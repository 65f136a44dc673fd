//! Periodic sync scheduler
//!
//! Each scheduled task runs in its own tokio task: an `interval_at` loop
//! starts a [`Firing`] on every tick and drives it through its retry chain.
//! Firings of one task are sequential. Backoff waits race a cancellation
//! watch channel; the provider attempt itself is never raced, so
//! unscheduling lets an in-flight attempt finish and record its run.
//!
//! Each task name owns an in-flight lock that outlives its loop. Periodic
//! attempts and manual syncs take it around the provider call, so a loop
//! restarted right after an unschedule, or a manual sync, waits for the
//! attempt still running under the same name.

use chrono::Utc;
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::worker::{Firing, SyncWorker};
use crate::database::Database;
use crate::error::SchedulerError;
use crate::models::{Outcome, SyncRun, SyncStatus, SyncTask, MIN_PERIODIC_INTERVAL};

/// Runtime settings for the scheduler
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Shortest accepted interval; shorter requests are raised to it
    pub min_interval: Duration,
    /// Delay before the first firing of a newly started loop
    pub initial_delay: Duration,
    /// Upper bound of the random delay added before each firing
    pub jitter: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            min_interval: MIN_PERIODIC_INTERVAL,
            initial_delay: Duration::ZERO,
            jitter: Duration::ZERO,
        }
    }
}

/// Result of [`SyncScheduler::schedule`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    /// The task was registered and its loop started
    Scheduled,
    /// A task with this name already exists; it was kept as is
    AlreadyScheduled,
}

struct Job {
    cancel_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Job {
    fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

/// Schedules and drives periodic sync tasks
pub struct SyncScheduler<D: Database + 'static> {
    config: SchedulerConfig,
    database: Arc<D>,
    worker: Arc<SyncWorker>,
    jobs: Arc<Mutex<HashMap<String, Job>>>,
    in_flight: Arc<StdMutex<HashMap<String, Arc<Mutex<()>>>>>,
    pending_manual: Arc<StdMutex<HashSet<String>>>,
}

impl<D: Database + 'static> Clone for SyncScheduler<D> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            database: self.database.clone(),
            worker: self.worker.clone(),
            jobs: self.jobs.clone(),
            in_flight: self.in_flight.clone(),
            pending_manual: self.pending_manual.clone(),
        }
    }
}

impl<D: Database + 'static> SyncScheduler<D> {
    /// Create a scheduler; no loop runs until `schedule` or `resume`
    pub fn new(config: SchedulerConfig, database: Arc<D>, worker: Arc<SyncWorker>) -> Self {
        Self {
            config,
            database,
            worker,
            jobs: Arc::new(Mutex::new(HashMap::new())),
            in_flight: Arc::new(StdMutex::new(HashMap::new())),
            pending_manual: Arc::new(StdMutex::new(HashSet::new())),
        }
    }

    /// Register recurring execution of `task`
    ///
    /// If a task with the same name is already scheduled, the existing
    /// schedule is kept and not restarted. A zero interval is rejected
    /// before anything is persisted.
    pub async fn schedule(&self, mut task: SyncTask) -> Result<ScheduleOutcome, SchedulerError> {
        let requested = task.interval;
        if task.clamp_interval(self.config.min_interval) {
            warn!(
                task = %task.name,
                requested_secs = requested.as_secs(),
                interval_secs = task.interval.as_secs(),
                "Interval below platform minimum, raised"
            );
        }
        check_interval(&task)?;

        let mut jobs = self.jobs.lock().await;

        if self.database.insert_task_if_absent(&task).await? {
            info!(
                task = %task.name,
                interval_secs = task.interval.as_secs(),
                max_attempts = task.max_attempts_per_cycle,
                "Sync task scheduled"
            );
            self.spawn_job(&mut jobs, task)?;
            return Ok(ScheduleOutcome::Scheduled);
        }

        // Persisted by an earlier run of the process but not yet running here
        let running = jobs.get(&task.name).is_some_and(Job::is_running);
        if !running {
            if let Some(stored) = self.database.get_task(&task.name).await? {
                debug!(task = %stored.name, "Starting loop for persisted task");
                self.spawn_job(&mut jobs, stored)?;
            }
        }

        debug!(task = %task.name, "Task already scheduled, keeping existing schedule");
        Ok(ScheduleOutcome::AlreadyScheduled)
    }

    /// Cancel future firings and pending retries of a task
    ///
    /// Returns true if anything was scheduled under `name`. An attempt
    /// already inside the provider runs to completion.
    pub async fn unschedule(&self, name: &str) -> Result<bool, SchedulerError> {
        let mut jobs = self.jobs.lock().await;

        let removed = self.database.delete_task(name).await?;
        let job = jobs.remove(name);
        let had_job = job.is_some();

        if let Some(job) = job {
            let _ = job.cancel_tx.send(true);
        }

        if removed || had_job {
            info!(task = name, "Sync task unscheduled");
        } else {
            debug!(task = name, "Unschedule requested for unknown task");
        }
        Ok(removed || had_job)
    }

    /// Start loops for every persisted task not already running
    ///
    /// Returns the number of loops started. Persisted tasks that cannot be
    /// driven are logged and skipped.
    pub async fn resume(&self) -> Result<usize, SchedulerError> {
        let tasks = self.database.list_tasks().await?;
        let mut jobs = self.jobs.lock().await;

        let mut started = 0;
        for task in tasks {
            if jobs.get(&task.name).is_some_and(Job::is_running) {
                continue;
            }
            debug!(task = %task.name, "Resuming persisted task");
            match self.spawn_job(&mut jobs, task) {
                Ok(()) => started += 1,
                Err(e) => error!(error = %e, "Skipping persisted task"),
            }
        }

        info!(tasks = started, "Sync scheduler resumed");
        Ok(started)
    }

    /// Stop every loop without touching persisted schedules
    ///
    /// Waits for attempts in flight to finish.
    pub async fn stop(&self) {
        let jobs: Vec<Job> = {
            let mut jobs = self.jobs.lock().await;
            jobs.drain().map(|(_, job)| job).collect()
        };

        for job in &jobs {
            let _ = job.cancel_tx.send(true);
        }
        let count = jobs.len();
        for job in jobs {
            let _ = job.handle.await;
        }

        info!(tasks = count, "Sync scheduler stopped");
    }

    /// Whether a loop for `name` runs in this process
    pub async fn is_scheduled(&self, name: &str) -> bool {
        self.jobs.lock().await.get(name).is_some_and(Job::is_running)
    }

    /// Persisted definition of a task
    pub async fn task(&self, name: &str) -> Result<Option<SyncTask>, SchedulerError> {
        Ok(self.database.get_task(name).await?)
    }

    /// Whether the provider reports it is ready
    pub async fn provider_ready(&self) -> bool {
        self.worker.provider_ready().await
    }

    /// Run a single attempt now and report its result
    ///
    /// No backoff and no attempt cap apply. While one manual sync for a task
    /// is pending, another request for the same task is rejected.
    pub async fn trigger_manual_sync(&self, task: &SyncTask) -> Result<(), SchedulerError> {
        let _pending = ManualSyncGuard::acquire(&self.pending_manual, &task.name)?;
        info!(task = %task.name, "Manual sync triggered");

        let in_flight = self.in_flight_lock(&task.name);
        let _running = in_flight.lock().await;

        let firing = Firing::manual(task.clone());
        let recorder = self.recorder();

        let status = recorder.load_status(&task.name).await.in_progress(1);
        recorder.save_status(&status).await;

        let result = self.worker.attempt(firing.task()).await;
        let outcome = match &result {
            Ok(()) => Outcome::Success,
            Err(err) => Outcome::PermanentFailure(err.clone()),
        };

        recorder
            .record_run(SyncRun::from_outcome(
                &task.name,
                firing.trigger(),
                firing.attempt_number(),
                &outcome,
                firing.started_at(),
            ))
            .await;

        match &result {
            Ok(()) => {
                info!(task = %task.name, "Manual sync completed");
                recorder.save_status(&status.success()).await;
            }
            Err(err) => {
                warn!(task = %task.name, error = %err, "Manual sync failed");
                recorder.save_status(&status.failed(err.to_string())).await;
            }
        }

        result.map_err(SchedulerError::from)
    }

    /// Last known status of every task
    pub async fn statuses(&self) -> Result<Vec<SyncStatus>, SchedulerError> {
        Ok(self.database.get_all_sync_statuses().await?)
    }

    /// Last known status of one task
    pub async fn status(&self, name: &str) -> Result<Option<SyncStatus>, SchedulerError> {
        Ok(self.database.get_sync_status(name).await?)
    }

    /// Most recent runs of a task, newest first
    pub async fn recent_runs(&self, name: &str, limit: u32) -> Result<Vec<SyncRun>, SchedulerError> {
        Ok(self.database.get_runs(name, limit).await?)
    }

    fn recorder(&self) -> RunRecorder<D> {
        RunRecorder {
            database: self.database.clone(),
        }
    }

    fn in_flight_lock(&self, name: &str) -> Arc<Mutex<()>> {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(name.to_string())
            .or_default()
            .clone()
    }

    fn spawn_job(
        &self,
        jobs: &mut HashMap<String, Job>,
        task: SyncTask,
    ) -> Result<(), SchedulerError> {
        check_interval(&task)?;

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let driver = FiringDriver {
            config: self.config.clone(),
            worker: self.worker.clone(),
            recorder: self.recorder(),
            in_flight: self.in_flight_lock(&task.name),
        };

        let name = task.name.clone();
        let handle = tokio::spawn(driver.run_periodic(task, cancel_rx));

        if let Some(old) = jobs.insert(name, Job { cancel_tx, handle }) {
            let _ = old.cancel_tx.send(true);
        }
        Ok(())
    }
}

/// `interval_at` cannot drive a zero period
fn check_interval(task: &SyncTask) -> Result<(), SchedulerError> {
    if task.interval.is_zero() {
        return Err(SchedulerError::InvalidInterval(task.name.clone()));
    }
    Ok(())
}

/// Marks a manual sync as pending until dropped
struct ManualSyncGuard {
    pending: Arc<StdMutex<HashSet<String>>>,
    name: String,
}

impl ManualSyncGuard {
    fn acquire(
        pending: &Arc<StdMutex<HashSet<String>>>,
        name: &str,
    ) -> Result<Self, SchedulerError> {
        let mut set = pending.lock().unwrap_or_else(PoisonError::into_inner);
        if !set.insert(name.to_string()) {
            return Err(SchedulerError::ManualSyncPending(name.to_string()));
        }
        Ok(Self {
            pending: pending.clone(),
            name: name.to_string(),
        })
    }
}

impl Drop for ManualSyncGuard {
    fn drop(&mut self) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.name);
    }
}

/// Persists runs and status; storage failures are logged, never propagated
struct RunRecorder<D: Database + 'static> {
    database: Arc<D>,
}

impl<D: Database + 'static> RunRecorder<D> {
    async fn load_status(&self, task: &str) -> SyncStatus {
        match self.database.get_sync_status(task).await {
            Ok(Some(status)) => status,
            Ok(None) => SyncStatus::new(task),
            Err(e) => {
                warn!(task, error = %e, "Failed to load sync status");
                SyncStatus::new(task)
            }
        }
    }

    async fn save_status(&self, status: &SyncStatus) {
        if let Err(e) = self.database.update_sync_status(status).await {
            warn!(task = %status.task, error = %e, "Failed to update sync status");
        }
    }

    async fn record_run(&self, run: SyncRun) {
        if let Err(e) = self.database.insert_run(&run).await {
            warn!(
                task = %run.task_name,
                attempt = run.attempt_number,
                error = %e,
                "Failed to record sync run"
            );
        }
    }
}

/// Per-task loop state
struct FiringDriver<D: Database + 'static> {
    config: SchedulerConfig,
    worker: Arc<SyncWorker>,
    recorder: RunRecorder<D>,
    in_flight: Arc<Mutex<()>>,
}

impl<D: Database + 'static> FiringDriver<D> {
    async fn run_periodic(self, task: SyncTask, mut cancel_rx: watch::Receiver<bool>) {
        let name = task.name.clone();
        let start = Instant::now() + self.config.initial_delay;
        let mut ticker = interval_at(start, task.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        debug!(
            task = %name,
            interval_secs = task.interval.as_secs(),
            initial_delay_ms = self.config.initial_delay.as_millis() as u64,
            "Periodic sync loop started"
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel_rx.changed() => break,
                _ = ticker.tick() => {}
            }

            let jitter = self.jitter();
            if !jitter.is_zero() {
                tokio::select! {
                    biased;
                    _ = cancel_rx.changed() => break,
                    _ = tokio::time::sleep(jitter) => {}
                }
            }

            if self.drive_firing(&task, &mut cancel_rx).await.is_none() {
                break;
            }
        }

        debug!(task = %name, "Periodic sync loop stopped");
    }

    /// Drive one firing until it succeeds or fails permanently
    ///
    /// Returns `None` if cancelled before an attempt starts or during a
    /// backoff wait.
    async fn drive_firing(
        &self,
        task: &SyncTask,
        cancel_rx: &mut watch::Receiver<bool>,
    ) -> Option<Outcome> {
        let mut firing = Firing::start(task.clone());
        let mut status = self.recorder.load_status(&task.name).await;

        loop {
            let running = tokio::select! {
                biased;
                _ = cancel_rx.changed() => {
                    debug!(task = %task.name, "Firing cancelled before attempt");
                    return None;
                }
                guard = self.in_flight.lock() => guard,
            };

            let started_at = Utc::now();
            status = status.in_progress(firing.attempt_number());
            self.recorder.save_status(&status).await;

            let outcome = self.worker.run_once(&firing).await;
            self.recorder
                .record_run(SyncRun::from_outcome(
                    &task.name,
                    firing.trigger(),
                    firing.attempt_number(),
                    &outcome,
                    started_at,
                ))
                .await;
            drop(running);

            match outcome {
                Outcome::Retry(err) => {
                    status = status.retrying(err.to_string());
                    self.recorder.save_status(&status).await;

                    let delay = firing.retry_delay(&err);
                    if let Some(metrics) = self.worker.metrics() {
                        metrics.record_backoff(&task.name, delay.as_secs_f64());
                    }
                    debug!(
                        task = %task.name,
                        attempt = firing.attempt_number(),
                        delay_ms = delay.as_millis() as u64,
                        "Waiting before retry"
                    );

                    tokio::select! {
                        biased;
                        _ = cancel_rx.changed() => {
                            debug!(task = %task.name, "Retry cancelled");
                            return None;
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                    firing = firing.next_attempt();
                }
                Outcome::Success => {
                    self.recorder.save_status(&status.success()).await;
                    self.record_firing(&task.name, "success");
                    return Some(Outcome::Success);
                }
                Outcome::PermanentFailure(err) => {
                    error!(
                        task = %task.name,
                        attempts = firing.attempt_number(),
                        error = %err,
                        "Sync firing failed, waiting for next periodic run"
                    );
                    self.recorder
                        .save_status(&status.failed(err.to_string()))
                        .await;
                    self.record_firing(&task.name, "permanent_failure");
                    return Some(Outcome::PermanentFailure(err));
                }
            }
        }
    }

    fn record_firing(&self, task: &str, outcome: &str) {
        if let Some(metrics) = self.worker.metrics() {
            metrics.record_firing(task, outcome);
        }
    }

    fn jitter(&self) -> Duration {
        let max_ms = self.config.jitter.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..max_ms))
    }
}
