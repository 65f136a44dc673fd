//! Common test utilities and helpers for integration tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use band_sync::database::SqliteDatabase;
use band_sync::error::SyncError;
use band_sync::models::{Constraints, SyncTask};
use band_sync::server::AppState;
use band_sync::session::SyncSession;
use band_sync::sync::{
    AssumeConnected, BackoffPolicy, SchedulerConfig, SyncProvider, SyncScheduler, SyncWorker,
};

/// Create an in-memory database for testing
pub async fn create_test_database() -> Arc<SqliteDatabase> {
    Arc::new(
        SqliteDatabase::in_memory()
            .await
            .expect("Failed to create test database"),
    )
}

/// Scheduler settings without the platform interval floor
pub fn fast_scheduler_config() -> SchedulerConfig {
    SchedulerConfig {
        min_interval: Duration::ZERO,
        initial_delay: Duration::ZERO,
        jitter: Duration::ZERO,
    }
}

/// Task firing every `interval_ms` with a `backoff_ms` exponential base
pub fn fast_task(name: &str, interval_ms: u64, backoff_ms: u64) -> SyncTask {
    SyncTask::new(name)
        .with_interval(Duration::from_millis(interval_ms))
        .with_constraints(Constraints::none())
        .with_backoff(BackoffPolicy::exponential(Duration::from_millis(backoff_ms)))
        .with_max_attempts(3)
}

/// Provider answering from a script, then from a fallback result
pub struct ScriptedProvider {
    ready: AtomicBool,
    script: Mutex<VecDeque<Result<(), SyncError>>>,
    fallback: Result<(), SyncError>,
    calls: AtomicU32,
}

impl ScriptedProvider {
    pub fn new(fallback: Result<(), SyncError>) -> Self {
        Self {
            ready: AtomicBool::new(true),
            script: Mutex::new(VecDeque::new()),
            fallback,
            calls: AtomicU32::new(0),
        }
    }

    pub fn with_script(self, script: Vec<Result<(), SyncError>>) -> Self {
        *self.script.lock().unwrap() = script.into();
        self
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SyncProvider for ScriptedProvider {
    async fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn attempt_sync(&self) -> Result<(), SyncError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| self.fallback.clone())
    }
}

/// Build a scheduler over `database` driven by `provider`
pub fn create_scheduler(
    database: Arc<SqliteDatabase>,
    provider: Arc<ScriptedProvider>,
) -> SyncScheduler<SqliteDatabase> {
    let worker = SyncWorker::new(provider, Arc::new(AssumeConnected));
    SyncScheduler::new(fast_scheduler_config(), database, Arc::new(worker))
}

/// Create a test application state around a session for `task`
pub fn create_test_state(
    database: Arc<SqliteDatabase>,
    provider: Arc<ScriptedProvider>,
    task: SyncTask,
) -> AppState<SqliteDatabase> {
    let scheduler = create_scheduler(database, provider);
    AppState {
        session: Arc::new(SyncSession::new(scheduler, task)),
    }
}

/// Run a test server in the background and return the address
/// The server will be shut down when the returned shutdown sender is dropped or sent
pub async fn run_test_server(
    state: AppState<SqliteDatabase>,
) -> (std::net::SocketAddr, tokio::sync::oneshot::Sender<()>) {
    use tokio::net::TcpListener;

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind test server");
    let addr = listener.local_addr().expect("Failed to get local address");

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

    let app = band_sync::server::build_router(state)
        .layer(tower_http::trace::TraceLayer::new_for_http());

    tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .expect("Server error");
    });

    // Give the server a moment to start
    tokio::time::sleep(Duration::from_millis(100)).await;

    (addr, shutdown_tx)
}
