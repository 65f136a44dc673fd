//! Application error types for band-sync
//!
//! This module defines common error types used throughout the application.
//! All error types use `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Errors reported by a sync provider for a single synchronization attempt
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SyncError {
    /// Network timeout
    #[error("Network timeout")]
    NetworkTimeout,

    /// Connection refused
    #[error("Connection refused")]
    ConnectionRefused,

    /// Rate limited by the sync server
    #[error("Rate limited, retry after {0} seconds")]
    RateLimited(u64),

    /// Server error
    #[error("Server error: HTTP {0}")]
    ServerError(u16),

    /// Invalid data received
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Resource not found
    #[error("Resource not found")]
    NotFound,

    /// Unauthorized
    #[error("Unauthorized")]
    Unauthorized,

    /// Generic network error
    #[error("Network error: {0}")]
    Network(String),
}

/// Why a single attempt inside a firing did not succeed
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AttemptError {
    /// A declared precondition (e.g. network connectivity) does not hold
    #[error("Constraint not met: {0}")]
    ConstraintUnmet(String),

    /// The provider reports it is not ready (e.g. device not configured)
    #[error("Sync provider not ready")]
    ProviderNotReady,

    /// The provider attempted a sync and failed
    #[error("Sync attempt failed: {0}")]
    Provider(#[from] SyncError),

    /// The firing used up its attempt budget
    #[error("Attempts exhausted after {attempts} tries: {last}")]
    AttemptsExhausted {
        /// Number of attempts made in the firing
        attempts: u32,
        /// Error of the final attempt
        last: Box<AttemptError>,
    },
}

impl AttemptError {
    /// The innermost error, unwrapping `AttemptsExhausted`
    pub fn root(&self) -> &AttemptError {
        match self {
            AttemptError::AttemptsExhausted { last, .. } => last.root(),
            other => other,
        }
    }

    /// Server-requested wait before the next attempt, if any
    pub fn retry_after(&self) -> Option<std::time::Duration> {
        match self.root() {
            AttemptError::Provider(SyncError::RateLimited(secs)) => {
                Some(std::time::Duration::from_secs(*secs))
            }
            _ => None,
        }
    }

    /// Short machine-readable label used in logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            AttemptError::ConstraintUnmet(_) => "constraint_unmet",
            AttemptError::ProviderNotReady => "provider_not_ready",
            AttemptError::Provider(_) => "provider_error",
            AttemptError::AttemptsExhausted { .. } => "attempts_exhausted",
        }
    }
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DbError {
    /// SQLite error
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Error from the async connection wrapper
    #[error("Database connection error: {0}")]
    Connection(#[from] tokio_rusqlite::Error),

    /// Record not found
    #[error("Record not found")]
    NotFound,

    /// Stored value could not be decoded
    #[error("Invalid stored value: {0}")]
    InvalidValue(String),
}

/// Errors surfaced by the scheduler's control operations
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Persistence failure
    #[error("Scheduler storage error: {0}")]
    Database(#[from] DbError),

    /// A manual sync for this task has not delivered its result yet
    #[error("Manual sync already pending for task {0}")]
    ManualSyncPending(String),

    /// The single manual attempt failed
    #[error("Manual sync failed: {0}")]
    Attempt(#[from] AttemptError),

    /// The task cannot be driven by a periodic loop
    #[error("Invalid interval for task {0}: must be greater than zero")]
    InvalidInterval(String),
}

/// Trait for determining if an error is retryable
pub trait RetryableError {
    /// Returns true if the error is retryable
    fn is_retryable(&self) -> bool;
}

impl RetryableError for SyncError {
    fn is_retryable(&self) -> bool {
        match self {
            SyncError::NetworkTimeout => true,
            SyncError::ConnectionRefused => true,
            SyncError::RateLimited(_) => true,
            SyncError::ServerError(code) if *code >= 500 => true,
            SyncError::Network(_) => true,

            SyncError::InvalidData(_) => false,
            SyncError::NotFound => false,
            SyncError::Unauthorized => false,
            SyncError::ServerError(_) => false, // 4xx errors
        }
    }
}

impl RetryableError for AttemptError {
    fn is_retryable(&self) -> bool {
        match self {
            AttemptError::ConstraintUnmet(_) | AttemptError::ProviderNotReady => true,
            AttemptError::Provider(err) => err.is_retryable(),
            AttemptError::AttemptsExhausted { .. } => false,
        }
    }
}
