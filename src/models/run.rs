//! Sync run records and firing outcomes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::AttemptError;

/// Result of one attempt as classified by the worker
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The provider synchronized successfully; the firing is done
    Success,
    /// The attempt failed but the firing has budget left
    Retry(AttemptError),
    /// The firing is over without success; wraps `AttemptsExhausted`
    /// unless the provider error was classified as non-retryable
    PermanentFailure(AttemptError),
}

impl Outcome {
    /// Whether this outcome ends the firing
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Outcome::Retry(_))
    }

    /// Error carried by a failed outcome
    pub fn error(&self) -> Option<&AttemptError> {
        match self {
            Outcome::Success => None,
            Outcome::Retry(err) | Outcome::PermanentFailure(err) => Some(err),
        }
    }

    /// Persisted form
    pub fn run_outcome(&self) -> RunOutcome {
        match self {
            Outcome::Success => RunOutcome::Success,
            Outcome::Retry(_) => RunOutcome::Retry,
            Outcome::PermanentFailure(_) => RunOutcome::PermanentFailure,
        }
    }
}

/// Persisted outcome of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Attempt succeeded
    Success,
    /// Attempt failed, a retry follows
    Retry,
    /// Attempt failed and ended its firing
    PermanentFailure,
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Success => write!(f, "success"),
            RunOutcome::Retry => write!(f, "retry"),
            RunOutcome::PermanentFailure => write!(f, "permanent_failure"),
        }
    }
}

impl FromStr for RunOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(RunOutcome::Success),
            "retry" => Ok(RunOutcome::Retry),
            "permanent_failure" => Ok(RunOutcome::PermanentFailure),
            other => Err(format!("unknown run outcome '{}'", other)),
        }
    }
}

/// What started a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunTrigger {
    /// Periodic firing or one of its retries
    Periodic,
    /// One-shot manual trigger
    Manual,
}

impl fmt::Display for RunTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunTrigger::Periodic => write!(f, "periodic"),
            RunTrigger::Manual => write!(f, "manual"),
        }
    }
}

impl FromStr for RunTrigger {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "periodic" => Ok(RunTrigger::Periodic),
            "manual" => Ok(RunTrigger::Manual),
            other => Err(format!("unknown run trigger '{}'", other)),
        }
    }
}

/// One execution of a sync task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRun {
    /// Database ID (None for new records)
    pub id: Option<i64>,

    /// Task name
    pub task_name: String,

    /// What started the run
    pub trigger: RunTrigger,

    /// 1-based attempt number within the firing
    pub attempt_number: u32,

    /// Classified outcome
    pub outcome: RunOutcome,

    /// Error message for failed attempts
    pub error_message: Option<String>,

    /// When the attempt started
    pub started_at: DateTime<Utc>,

    /// When the attempt finished
    pub finished_at: DateTime<Utc>,
}

impl SyncRun {
    /// Build a run record from a classified outcome
    pub fn from_outcome(
        task_name: impl Into<String>,
        trigger: RunTrigger,
        attempt_number: u32,
        outcome: &Outcome,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: None,
            task_name: task_name.into(),
            trigger,
            attempt_number,
            outcome: outcome.run_outcome(),
            error_message: outcome.error().map(|e| e.to_string()),
            started_at,
            finished_at: Utc::now(),
        }
    }
}
