//! Domain models for band-sync
//!
//! This module contains the core domain models used throughout the application.

pub mod run;
pub mod status;
pub mod task;

// Re-export commonly used types
pub use run::{Outcome, RunOutcome, RunTrigger, SyncRun};
pub use status::{SyncStatus, SyncStatusValue};
pub use task::{Constraints, SyncTask, DEFAULT_TASK_NAME, MIN_PERIODIC_INTERVAL};
