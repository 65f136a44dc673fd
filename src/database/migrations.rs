//! Database migrations for band-sync
//!
//! This module contains SQL migrations for the SQLite database schema.

/// SQL statement to create the initial database schema
pub const CREATE_SCHEMA: &str = r#"
-- Scheduled periodic tasks, one row per unique name
CREATE TABLE IF NOT EXISTS sync_tasks (
    name TEXT PRIMARY KEY,
    interval_ms INTEGER NOT NULL,
    requires_network INTEGER NOT NULL DEFAULT 1,
    backoff_kind TEXT NOT NULL DEFAULT 'exponential',
    backoff_base_ms INTEGER NOT NULL,
    backoff_max_ms INTEGER,
    max_attempts INTEGER NOT NULL DEFAULT 3,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP
);

-- One row per attempt
CREATE TABLE IF NOT EXISTS sync_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    task_name TEXT NOT NULL,
    trigger_kind TEXT NOT NULL,
    attempt_number INTEGER NOT NULL,
    outcome TEXT NOT NULL,
    error_message TEXT,
    started_at DATETIME NOT NULL,
    finished_at DATETIME NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_sync_runs_task ON sync_runs(task_name, id DESC);

-- Last known state per task
CREATE TABLE IF NOT EXISTS sync_status (
    task TEXT PRIMARY KEY,
    status TEXT NOT NULL DEFAULT 'pending',
    attempt_number INTEGER NOT NULL DEFAULT 0,
    last_attempt_at DATETIME,
    last_success_at DATETIME,
    error_message TEXT
);
"#;
