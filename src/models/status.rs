//! Last known sync state per task

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Sync status for a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncStatus {
    /// Task name
    pub task: String,

    /// Status of the latest attempt
    pub status: SyncStatusValue,

    /// Attempt number of the latest attempt
    pub attempt_number: u32,

    /// When the latest attempt started
    pub last_attempt_at: Option<DateTime<Utc>>,

    /// When the task last synced successfully
    pub last_success_at: Option<DateTime<Utc>>,

    /// Error message if the latest attempt failed
    pub error_message: Option<String>,
}

impl SyncStatus {
    /// Create a new sync status
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            status: SyncStatusValue::Pending,
            attempt_number: 0,
            last_attempt_at: None,
            last_success_at: None,
            error_message: None,
        }
    }

    /// Mark an attempt as started
    pub fn in_progress(mut self, attempt_number: u32) -> Self {
        self.status = SyncStatusValue::InProgress;
        self.attempt_number = attempt_number;
        self.last_attempt_at = Some(Utc::now());
        self
    }

    /// Mark as successful
    pub fn success(mut self) -> Self {
        self.status = SyncStatusValue::Success;
        self.last_success_at = Some(Utc::now());
        self.error_message = None;
        self
    }

    /// Mark as waiting for a retry
    pub fn retrying(mut self, error: impl Into<String>) -> Self {
        self.status = SyncStatusValue::Retrying;
        self.error_message = Some(error.into());
        self
    }

    /// Mark as failed for this firing
    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.status = SyncStatusValue::Failed;
        self.error_message = Some(error.into());
        self
    }
}

/// Status value for sync operations
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatusValue {
    /// Sync has never been run
    #[default]
    Pending,
    /// An attempt is currently running
    InProgress,
    /// Last attempt was successful
    Success,
    /// Last attempt failed, a retry is scheduled
    Retrying,
    /// Last firing ended without success
    Failed,
}

impl std::fmt::Display for SyncStatusValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncStatusValue::Pending => write!(f, "pending"),
            SyncStatusValue::InProgress => write!(f, "in_progress"),
            SyncStatusValue::Success => write!(f, "success"),
            SyncStatusValue::Retrying => write!(f, "retrying"),
            SyncStatusValue::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for SyncStatusValue {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SyncStatusValue::Pending),
            "in_progress" => Ok(SyncStatusValue::InProgress),
            "success" => Ok(SyncStatusValue::Success),
            "retrying" => Ok(SyncStatusValue::Retrying),
            "failed" => Ok(SyncStatusValue::Failed),
            other => Err(format!("unknown sync status '{}'", other)),
        }
    }
}
