//! SQLite implementation of the Database trait
//!
//! This module provides a SQLite-based implementation of the Database trait
//! using rusqlite and tokio-rusqlite for async operations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::OptionalExtension;
use std::time::Duration;
use tokio_rusqlite::Connection;

use super::migrations::CREATE_SCHEMA;
use super::Database;
use crate::error::DbError;
use crate::models::{Constraints, SyncRun, SyncStatus, SyncTask};
use crate::sync::retry::{BackoffKind, BackoffPolicy};

/// Run records kept per task unless configured otherwise
pub const DEFAULT_RUN_RETENTION: u32 = 1000;

/// SQLite database implementation
pub struct SqliteDatabase {
    conn: Connection,
    run_retention: u32,
}

impl SqliteDatabase {
    /// Create a new SQLite database connection
    ///
    /// Use `:memory:` for in-memory database or a file path for persistent storage.
    pub async fn new(path: &str) -> Result<Self, DbError> {
        let conn = Connection::open(path).await?;

        conn.call(|conn| {
            conn.execute_batch(CREATE_SCHEMA)?;
            Ok(())
        })
        .await?;

        Ok(Self {
            conn,
            run_retention: DEFAULT_RUN_RETENTION,
        })
    }

    /// Keep at most `retention` run records per task (at least one)
    pub fn with_run_retention(mut self, retention: u32) -> Self {
        self.run_retention = retention.max(1);
        self
    }

    /// Create a new in-memory database (useful for testing)
    pub async fn in_memory() -> Result<Self, DbError> {
        Self::new(":memory:").await
    }
}

const TASK_COLUMNS: &str = "name, interval_ms, requires_network, backoff_kind, \
                            backoff_base_ms, backoff_max_ms, max_attempts";

const STATUS_COLUMNS: &str =
    "task, status, attempt_number, last_attempt_at, last_success_at, error_message";

#[async_trait]
impl Database for SqliteDatabase {
    // =========================================================================
    // Scheduled tasks
    // =========================================================================

    async fn insert_task_if_absent(&self, task: &SyncTask) -> Result<bool, DbError> {
        let name = task.name.clone();
        let interval_ms = duration_to_ms(task.interval);
        let requires_network = task.constraints.requires_network;
        let backoff_kind = task.backoff.kind.to_string();
        let backoff_base_ms = duration_to_ms(task.backoff.base_delay);
        let backoff_max_ms = task.backoff.max_delay.map(duration_to_ms);
        let max_attempts = task.max_attempts_per_cycle;

        self.conn
            .call(move |conn| {
                let inserted = conn.execute(
                    r#"
                    INSERT OR IGNORE INTO sync_tasks
                    (name, interval_ms, requires_network, backoff_kind,
                     backoff_base_ms, backoff_max_ms, max_attempts)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                    "#,
                    rusqlite::params![
                        name,
                        interval_ms,
                        requires_network,
                        backoff_kind,
                        backoff_base_ms,
                        backoff_max_ms,
                        max_attempts
                    ],
                )?;
                Ok(inserted == 1)
            })
            .await
            .map_err(Into::into)
    }

    async fn get_task(&self, name: &str) -> Result<Option<SyncTask>, DbError> {
        let name = name.to_string();

        self.conn
            .call(move |conn| {
                let task = conn
                    .query_row(
                        &format!("SELECT {} FROM sync_tasks WHERE name = ?1", TASK_COLUMNS),
                        [&name],
                        task_from_row,
                    )
                    .optional()?;
                Ok(task)
            })
            .await
            .map_err(Into::into)
    }

    async fn list_tasks(&self) -> Result<Vec<SyncTask>, DbError> {
        self.conn
            .call(|conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM sync_tasks ORDER BY name",
                    TASK_COLUMNS
                ))?;

                let tasks = stmt
                    .query_map([], task_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;

                Ok(tasks)
            })
            .await
            .map_err(Into::into)
    }

    async fn delete_task(&self, name: &str) -> Result<bool, DbError> {
        let name = name.to_string();

        self.conn
            .call(move |conn| {
                let deleted = conn.execute("DELETE FROM sync_tasks WHERE name = ?1", [&name])?;
                Ok(deleted > 0)
            })
            .await
            .map_err(Into::into)
    }

    // =========================================================================
    // Run history
    // =========================================================================

    async fn insert_run(&self, run: &SyncRun) -> Result<i64, DbError> {
        let task_name = run.task_name.clone();
        let trigger = run.trigger.to_string();
        let attempt_number = run.attempt_number;
        let outcome = run.outcome.to_string();
        let error_message = run.error_message.clone();
        let started_at = run.started_at.to_rfc3339();
        let finished_at = run.finished_at.to_rfc3339();
        let retention = self.run_retention;

        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute(
                    r#"
                    INSERT INTO sync_runs
                    (task_name, trigger_kind, attempt_number, outcome, error_message,
                     started_at, finished_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                    "#,
                    rusqlite::params![
                        task_name,
                        trigger,
                        attempt_number,
                        outcome,
                        error_message,
                        started_at,
                        finished_at
                    ],
                )?;
                let id = tx.last_insert_rowid();

                tx.execute(
                    r#"
                    DELETE FROM sync_runs
                    WHERE task_name = ?1 AND id NOT IN (
                        SELECT id FROM sync_runs WHERE task_name = ?1
                        ORDER BY id DESC LIMIT ?2
                    )
                    "#,
                    rusqlite::params![task_name, retention],
                )?;
                tx.commit()?;
                Ok(id)
            })
            .await
            .map_err(Into::into)
    }

    async fn get_runs(&self, task: &str, limit: u32) -> Result<Vec<SyncRun>, DbError> {
        let task = task.to_string();

        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    r#"
                    SELECT id, task_name, trigger_kind, attempt_number, outcome,
                           error_message, started_at, finished_at
                    FROM sync_runs
                    WHERE task_name = ?1
                    ORDER BY id DESC
                    LIMIT ?2
                    "#,
                )?;

                let runs = stmt
                    .query_map(rusqlite::params![task, limit], |row| {
                        Ok(SyncRun {
                            id: Some(row.get(0)?),
                            task_name: row.get(1)?,
                            trigger: parse_column(row.get::<_, String>(2)?, 2)?,
                            attempt_number: row.get(3)?,
                            outcome: parse_column(row.get::<_, String>(4)?, 4)?,
                            error_message: row.get(5)?,
                            started_at: required_datetime(row.get(6)?, 6)?,
                            finished_at: required_datetime(row.get(7)?, 7)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;

                Ok(runs)
            })
            .await
            .map_err(Into::into)
    }

    // =========================================================================
    // Sync status operations
    // =========================================================================

    async fn update_sync_status(&self, status: &SyncStatus) -> Result<(), DbError> {
        let task = status.task.clone();
        let status_str = status.status.to_string();
        let attempt_number = status.attempt_number;
        let last_attempt_at = status.last_attempt_at.map(|dt| dt.to_rfc3339());
        let last_success_at = status.last_success_at.map(|dt| dt.to_rfc3339());
        let error_message = status.error_message.clone();

        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"
                    INSERT OR REPLACE INTO sync_status
                    (task, status, attempt_number, last_attempt_at, last_success_at, error_message)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                    "#,
                    rusqlite::params![
                        task,
                        status_str,
                        attempt_number,
                        last_attempt_at,
                        last_success_at,
                        error_message
                    ],
                )?;
                Ok(())
            })
            .await?;

        Ok(())
    }

    async fn get_sync_status(&self, task: &str) -> Result<Option<SyncStatus>, DbError> {
        let task = task.to_string();

        self.conn
            .call(move |conn| {
                let status = conn
                    .query_row(
                        &format!("SELECT {} FROM sync_status WHERE task = ?1", STATUS_COLUMNS),
                        [&task],
                        status_from_row,
                    )
                    .optional()?;
                Ok(status)
            })
            .await
            .map_err(Into::into)
    }

    async fn get_all_sync_statuses(&self) -> Result<Vec<SyncStatus>, DbError> {
        self.conn
            .call(|conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM sync_status ORDER BY task",
                    STATUS_COLUMNS
                ))?;

                let statuses = stmt
                    .query_map([], status_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;

                Ok(statuses)
            })
            .await
            .map_err(Into::into)
    }
}

fn task_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SyncTask> {
    let kind: BackoffKind = parse_column(row.get::<_, String>(3)?, 3)?;
    let base = ms_to_duration(row.get(4)?);
    let mut backoff = match kind {
        BackoffKind::Exponential => BackoffPolicy::exponential(base),
        BackoffKind::Linear => BackoffPolicy::linear(base),
    };
    if let Some(max_ms) = row.get::<_, Option<i64>>(5)? {
        backoff = backoff.with_max_delay(ms_to_duration(max_ms));
    }

    let constraints = if row.get::<_, bool>(2)? {
        Constraints::network_connected()
    } else {
        Constraints::none()
    };

    Ok(SyncTask::new(row.get::<_, String>(0)?)
        .with_interval(ms_to_duration(row.get(1)?))
        .with_constraints(constraints)
        .with_backoff(backoff)
        .with_max_attempts(row.get(6)?))
}

fn status_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SyncStatus> {
    Ok(SyncStatus {
        task: row.get(0)?,
        status: parse_column(row.get::<_, String>(1)?, 1)?,
        attempt_number: row.get(2)?,
        last_attempt_at: parse_datetime(row.get(3)?),
        last_success_at: parse_datetime(row.get(4)?),
        error_message: row.get(5)?,
    })
}

fn duration_to_ms(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

fn ms_to_duration(ms: i64) -> Duration {
    Duration::from_millis(ms.max(0) as u64)
}

/// Parse a text column through `FromStr`, reporting failures as conversion errors
fn parse_column<T>(value: String, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    value
        .parse()
        .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
}

fn required_datetime(value: String, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    parse_datetime(Some(value.clone())).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("invalid timestamp '{}'", value).into(),
        )
    })
}

/// Parse datetime string from SQLite
fn parse_datetime(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
            .or_else(|| {
                // SQLite CURRENT_TIMESTAMP format
                chrono::NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S")
                    .ok()
                    .map(|dt| dt.and_utc())
            })
    })
}
