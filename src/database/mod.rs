//! Database layer for band-sync
//!
//! This module defines the database trait and SQLite implementation.

pub mod migrations;
pub mod sqlite;

pub use sqlite::SqliteDatabase;

use async_trait::async_trait;

use crate::error::DbError;
use crate::models::{SyncRun, SyncStatus, SyncTask};

/// Database trait for data persistence
///
/// Uses `async_trait` for async methods and `mockall::automock` for testing.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Database: Send + Sync {
    // =========================================================================
    // Scheduled tasks
    // =========================================================================

    /// Persist a task unless one with the same name exists
    ///
    /// Returns true if the task was inserted; an existing definition is left
    /// untouched.
    async fn insert_task_if_absent(&self, task: &SyncTask) -> Result<bool, DbError>;

    /// Get a scheduled task by name
    async fn get_task(&self, name: &str) -> Result<Option<SyncTask>, DbError>;

    /// List all scheduled tasks
    async fn list_tasks(&self) -> Result<Vec<SyncTask>, DbError>;

    /// Remove a scheduled task
    ///
    /// Returns true if a task was removed.
    async fn delete_task(&self, name: &str) -> Result<bool, DbError>;

    // =========================================================================
    // Run history
    // =========================================================================

    /// Record one attempt, returning its ID
    async fn insert_run(&self, run: &SyncRun) -> Result<i64, DbError>;

    /// Most recent runs of a task, newest first
    async fn get_runs(&self, task: &str, limit: u32) -> Result<Vec<SyncRun>, DbError>;

    // =========================================================================
    // Sync status operations
    // =========================================================================

    /// Update sync status for a task
    async fn update_sync_status(&self, status: &SyncStatus) -> Result<(), DbError>;

    /// Get sync status for a task
    async fn get_sync_status(&self, task: &str) -> Result<Option<SyncStatus>, DbError>;

    /// Get all sync statuses
    async fn get_all_sync_statuses(&self) -> Result<Vec<SyncStatus>, DbError>;
}
