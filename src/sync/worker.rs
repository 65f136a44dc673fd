//! Single-attempt execution and outcome classification
//!
//! A [`Firing`] is one periodic activation of a task together with its retry
//! chain. It is moved through the retry loop by value, so the attempt counter
//! lives with the firing rather than in shared state.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::constraints::{self, ConnectivityProbe};
use super::provider::SyncProvider;
use crate::error::{AttemptError, RetryableError, SyncError};
use crate::models::{Outcome, RunTrigger, SyncTask};
use crate::otel::Metrics;

/// One activation of a task and its position in the retry chain
#[derive(Debug, Clone)]
pub struct Firing {
    task: SyncTask,
    attempt_number: u32,
    trigger: RunTrigger,
    started_at: DateTime<Utc>,
}

impl Firing {
    /// Start a periodic firing at attempt 1
    pub fn start(task: SyncTask) -> Self {
        Self::with_trigger(task, RunTrigger::Periodic)
    }

    /// A one-shot manual firing
    pub fn manual(task: SyncTask) -> Self {
        Self::with_trigger(task, RunTrigger::Manual)
    }

    fn with_trigger(task: SyncTask, trigger: RunTrigger) -> Self {
        Self {
            task,
            attempt_number: 1,
            trigger,
            started_at: Utc::now(),
        }
    }

    /// Task being executed
    pub fn task(&self) -> &SyncTask {
        &self.task
    }

    /// 1-based attempt number within this firing
    pub fn attempt_number(&self) -> u32 {
        self.attempt_number
    }

    /// What started the firing
    pub fn trigger(&self) -> RunTrigger {
        self.trigger
    }

    /// When the firing started
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Whether the current attempt is the last one the budget allows
    pub fn is_last_attempt(&self) -> bool {
        self.attempt_number >= self.task.max_attempts_per_cycle
    }

    /// Wait before re-driving after the current attempt failed
    pub fn backoff_delay(&self) -> Duration {
        self.task.backoff.delay_after(self.attempt_number)
    }

    /// Wait before the next attempt, never shorter than a server-requested wait
    pub fn retry_delay(&self, err: &AttemptError) -> Duration {
        let backoff = self.backoff_delay();
        err.retry_after().map_or(backoff, |wait| backoff.max(wait))
    }

    /// Advance to the next attempt
    pub fn next_attempt(mut self) -> Self {
        self.attempt_number += 1;
        self
    }
}

/// Executes attempts against the injected provider
pub struct SyncWorker {
    provider: Arc<dyn SyncProvider>,
    probe: Arc<dyn ConnectivityProbe>,
    retry_all_provider_errors: bool,
    attempt_timeout: Option<Duration>,
    metrics: Option<Arc<Metrics>>,
}

impl SyncWorker {
    /// Create a worker that retries every provider error
    pub fn new(provider: Arc<dyn SyncProvider>, probe: Arc<dyn ConnectivityProbe>) -> Self {
        Self {
            provider,
            probe,
            retry_all_provider_errors: true,
            attempt_timeout: None,
            metrics: None,
        }
    }

    /// When false, non-retryable provider errors end the firing at once
    pub fn with_retry_all_provider_errors(mut self, retry_all: bool) -> Self {
        self.retry_all_provider_errors = retry_all;
        self
    }

    /// Bound a single provider call
    pub fn with_attempt_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Record attempt metrics
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Metrics sink, if any
    pub fn metrics(&self) -> Option<&Arc<Metrics>> {
        self.metrics.as_ref()
    }

    /// Whether the provider reports it is ready
    pub async fn provider_ready(&self) -> bool {
        self.provider.is_ready().await
    }

    /// Run one attempt: constraints, readiness, then the provider
    ///
    /// The provider is never called when a constraint is unmet or it is not
    /// ready.
    pub async fn attempt(&self, task: &SyncTask) -> Result<(), AttemptError> {
        constraints::evaluate(&task.constraints, self.probe.as_ref()).await?;

        if !self.provider.is_ready().await {
            return Err(AttemptError::ProviderNotReady);
        }

        let result = match self.attempt_timeout {
            Some(limit) => tokio::time::timeout(limit, self.provider.attempt_sync())
                .await
                .unwrap_or(Err(SyncError::NetworkTimeout)),
            None => self.provider.attempt_sync().await,
        };

        result.map_err(AttemptError::Provider)
    }

    /// Run the firing's current attempt and classify the result
    pub async fn run_once(&self, firing: &Firing) -> Outcome {
        let task = firing.task();
        info!(
            task = %task.name,
            attempt = firing.attempt_number(),
            trigger = %firing.trigger(),
            "Starting sync attempt"
        );

        let started = Instant::now();
        let result = self.attempt(task).await;
        let elapsed = started.elapsed();

        if let Some(metrics) = &self.metrics {
            let label = match &result {
                Ok(()) => "success",
                Err(err) => err.kind(),
            };
            metrics.record_attempt(&task.name, label, elapsed.as_secs_f64());
        }

        let outcome = self.classify(firing, result);
        match &outcome {
            Outcome::Success => info!(
                task = %task.name,
                attempt = firing.attempt_number(),
                duration_ms = elapsed.as_millis() as u64,
                "Sync completed successfully"
            ),
            Outcome::Retry(err) => warn!(
                task = %task.name,
                attempt = firing.attempt_number(),
                max_attempts = task.max_attempts_per_cycle,
                kind = err.kind(),
                error = %err,
                "Sync attempt failed, will retry"
            ),
            Outcome::PermanentFailure(err) => error!(
                task = %task.name,
                attempt = firing.attempt_number(),
                kind = err.root().kind(),
                error = %err,
                "Sync failed, giving up until next periodic run"
            ),
        }
        outcome
    }

    /// Map an attempt result onto the firing's outcome
    pub fn classify(&self, firing: &Firing, result: Result<(), AttemptError>) -> Outcome {
        let err = match result {
            Ok(()) => return Outcome::Success,
            Err(err) => err,
        };

        if !self.retry_all_provider_errors {
            if let AttemptError::Provider(ref sync_err) = err {
                if !sync_err.is_retryable() {
                    debug!(error = %sync_err, "Provider error is not retryable");
                    return Outcome::PermanentFailure(err);
                }
            }
        }

        if firing.is_last_attempt() {
            Outcome::PermanentFailure(AttemptError::AttemptsExhausted {
                attempts: firing.attempt_number(),
                last: Box::new(err),
            })
        } else {
            Outcome::Retry(err)
        }
    }
}
