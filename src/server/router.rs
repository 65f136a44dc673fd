//! HTTP router for band-sync
//!
//! This module defines the axum router for the control API. It provides
//! routes for:
//! - Health checks
//! - Auto-sync toggling and session status
//! - Manual sync triggers and run history

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::database::Database;
use crate::error::SchedulerError;
use crate::session::SyncSession;

/// Default number of runs returned by `/api/sync/runs`
const DEFAULT_RUNS_LIMIT: u32 = 20;

/// Upper bound on `limit` for `/api/sync/runs`
const MAX_RUNS_LIMIT: u32 = 500;

/// Shared application state
pub struct AppState<D: Database + 'static> {
    /// Sync session driving the configured task
    pub session: Arc<SyncSession<D>>,
}

impl<D: Database + 'static> Clone for AppState<D> {
    fn clone(&self) -> Self {
        Self {
            session: Arc::clone(&self.session),
        }
    }
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Query parameters for the run history endpoint
#[derive(Debug, Deserialize)]
pub struct RunsQuery {
    pub limit: Option<u32>,
}

/// Build the main application router
///
/// # Arguments
///
/// * `state` - Application state holding the sync session
///
/// # Returns
///
/// An axum Router configured with all endpoints
pub fn build_router<D: Database + 'static>(state: AppState<D>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/sync/status", get(api_status_handler::<D>))
        .route(
            "/api/sync/auto",
            post(api_enable_auto_handler::<D>).delete(api_disable_auto_handler::<D>),
        )
        .route("/api/sync/trigger", post(api_trigger_sync_handler::<D>))
        .route("/api/sync/runs", get(api_runs_handler::<D>))
        .with_state(state)
}

/// Health check endpoint handler
async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

fn internal_error(error: &SchedulerError, message: &str) -> (StatusCode, Json<serde_json::Value>) {
    tracing::error!(error = %error, "{}", message);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({ "error": message })),
    )
}

/// Session status handler
async fn api_status_handler<D: Database + 'static>(
    State(state): State<AppState<D>>,
) -> impl IntoResponse {
    match state.session.status().await {
        Ok(status) => (StatusCode::OK, Json(serde_json::json!(status))),
        Err(e) => internal_error(&e, "Failed to load sync status"),
    }
}

/// Enable auto-sync handler
async fn api_enable_auto_handler<D: Database + 'static>(
    State(state): State<AppState<D>>,
) -> impl IntoResponse {
    match state.session.enable_auto_sync().await {
        Ok(outcome) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "scheduled": outcome == crate::sync::ScheduleOutcome::Scheduled
            })),
        ),
        Err(e) => internal_error(&e, "Failed to enable auto-sync"),
    }
}

/// Disable auto-sync handler
async fn api_disable_auto_handler<D: Database + 'static>(
    State(state): State<AppState<D>>,
) -> impl IntoResponse {
    match state.session.disable_auto_sync().await {
        Ok(removed) => (StatusCode::OK, Json(serde_json::json!({ "removed": removed }))),
        Err(e) => internal_error(&e, "Failed to disable auto-sync"),
    }
}

/// Manual sync trigger handler
///
/// Waits for the single attempt and maps its result onto the response.
async fn api_trigger_sync_handler<D: Database + 'static>(
    State(state): State<AppState<D>>,
) -> impl IntoResponse {
    match state.session.trigger_manual_sync().await {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({ "success": true }))),
        Err(SchedulerError::ManualSyncPending(task)) => (
            StatusCode::CONFLICT,
            Json(serde_json::json!({
                "success": false,
                "error": format!("Manual sync already pending for {}", task)
            })),
        ),
        Err(SchedulerError::Attempt(e)) => {
            tracing::warn!(error = %e, kind = e.kind(), "Manual sync failed");
            (
                StatusCode::BAD_GATEWAY,
                Json(serde_json::json!({
                    "success": false,
                    "kind": e.kind(),
                    "error": e.to_string()
                })),
            )
        }
        Err(e) => internal_error(&e, "Failed to run manual sync"),
    }
}

/// Run history handler
async fn api_runs_handler<D: Database + 'static>(
    State(state): State<AppState<D>>,
    Query(query): Query<RunsQuery>,
) -> impl IntoResponse {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_RUNS_LIMIT)
        .min(MAX_RUNS_LIMIT);

    match state.session.recent_runs(limit).await {
        Ok(runs) => (
            StatusCode::OK,
            Json(serde_json::json!({ "runs": runs, "total": runs.len() })),
        ),
        Err(e) => internal_error(&e, "Failed to load sync runs"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::MockDatabase;
    use crate::error::{DbError, SyncError};
    use crate::models::{Constraints, Outcome, RunTrigger, SyncRun, SyncTask};
    use crate::sync::provider::MockSyncProvider;
    use crate::sync::{AssumeConnected, SchedulerConfig, SyncScheduler, SyncWorker};
    use axum_test::TestServer;
    use chrono::Utc;

    fn create_test_state(db: MockDatabase, provider: MockSyncProvider) -> AppState<MockDatabase> {
        let worker = SyncWorker::new(Arc::new(provider), Arc::new(AssumeConnected));
        let scheduler =
            SyncScheduler::new(SchedulerConfig::default(), Arc::new(db), Arc::new(worker));
        let task = SyncTask::default().with_constraints(Constraints::none());

        AppState {
            session: Arc::new(SyncSession::new(scheduler, task)),
        }
    }

    fn base_db() -> MockDatabase {
        let mut db = MockDatabase::new();
        db.expect_insert_run().returning(|_| Ok(1));
        db.expect_update_sync_status().returning(|_| Ok(()));
        db.expect_get_sync_status().returning(|_| Ok(None));
        db
    }

    fn provider(result: Result<(), SyncError>) -> MockSyncProvider {
        let mut provider = MockSyncProvider::new();
        provider.expect_is_ready().returning(|| true);
        provider
            .expect_attempt_sync()
            .returning(move || result.clone());
        provider
    }

    // Test 1: Health endpoint returns OK
    #[tokio::test]
    async fn test_health_endpoint_returns_ok() {
        let app = build_router(create_test_state(base_db(), provider(Ok(()))));
        let server = TestServer::new(app).unwrap();

        let response = server.get("/health").await;
        response.assert_status_ok();

        let body: HealthResponse = response.json();
        assert_eq!(body.status, "healthy");
        assert!(!body.version.is_empty());
    }

    // Test 2: Status endpoint reports the configured task
    #[tokio::test]
    async fn test_status_endpoint() {
        let mut db = base_db();
        db.expect_get_task().returning(|_| Ok(None));
        let app = build_router(create_test_state(db, provider(Ok(()))));
        let server = TestServer::new(app).unwrap();

        let response = server.get("/api/sync/status").await;
        response.assert_status_ok();

        let body: serde_json::Value = response.json();
        assert_eq!(body["auto_sync_enabled"], false);
        assert_eq!(body["provider_ready"], true);
        assert_eq!(body["task"]["name"], "toolkit_periodic_sync");
        assert!(body["last_sync"].is_null());
    }

    // Test 3: Enabling twice reports the second call as a no-op
    #[tokio::test(start_paused = true)]
    async fn test_enable_auto_sync_idempotent() {
        let mut db = base_db();
        let mut first = true;
        db.expect_insert_task_if_absent().returning(move |_| {
            let inserted = first;
            first = false;
            Ok(inserted)
        });
        let state = create_test_state(db, provider(Ok(())));
        let session = Arc::clone(&state.session);
        let server = TestServer::new(build_router(state)).unwrap();

        let response = server.post("/api/sync/auto").await;
        response.assert_status_ok();
        assert_eq!(response.json::<serde_json::Value>()["scheduled"], true);

        let response = server.post("/api/sync/auto").await;
        response.assert_status_ok();
        assert_eq!(response.json::<serde_json::Value>()["scheduled"], false);

        session.detach().await;
    }

    // Test 4: Disabling an unscheduled task is a no-op
    #[tokio::test]
    async fn test_disable_auto_sync_noop() {
        let mut db = base_db();
        db.expect_delete_task().returning(|_| Ok(false));
        let app = build_router(create_test_state(db, provider(Ok(()))));
        let server = TestServer::new(app).unwrap();

        let response = server.delete("/api/sync/auto").await;
        response.assert_status_ok();
        assert_eq!(response.json::<serde_json::Value>()["removed"], false);
    }

    // Test 5: Successful manual trigger
    #[tokio::test]
    async fn test_trigger_success() {
        let app = build_router(create_test_state(base_db(), provider(Ok(()))));
        let server = TestServer::new(app).unwrap();

        let response = server.post("/api/sync/trigger").await;
        response.assert_status_ok();
        assert_eq!(response.json::<serde_json::Value>()["success"], true);
    }

    // Test 6: Failed manual trigger maps to bad gateway with the error kind
    #[tokio::test]
    async fn test_trigger_failure() {
        let app = build_router(create_test_state(
            base_db(),
            provider(Err(SyncError::ServerError(503))),
        ));
        let server = TestServer::new(app).unwrap();

        let response = server.post("/api/sync/trigger").await;
        response.assert_status(StatusCode::BAD_GATEWAY);

        let body: serde_json::Value = response.json();
        assert_eq!(body["success"], false);
        assert_eq!(body["kind"], "provider_error");
    }

    // Test 7: Run history honours the limit parameter
    #[tokio::test]
    async fn test_runs_endpoint_limit() {
        let mut db = base_db();
        db.expect_get_runs()
            .withf(|name, limit| name == "toolkit_periodic_sync" && *limit == 5)
            .returning(|name, _| {
                Ok(vec![SyncRun::from_outcome(
                    name,
                    RunTrigger::Periodic,
                    1,
                    &Outcome::Success,
                    Utc::now(),
                )])
            });
        let app = build_router(create_test_state(db, provider(Ok(()))));
        let server = TestServer::new(app).unwrap();

        let response = server.get("/api/sync/runs?limit=5").await;
        response.assert_status_ok();

        let body: serde_json::Value = response.json();
        assert_eq!(body["total"], 1);
        assert_eq!(body["runs"][0]["outcome"], "success");
    }

    // Test 8: Storage failures surface as internal errors
    #[tokio::test]
    async fn test_runs_endpoint_storage_error() {
        let mut db = base_db();
        db.expect_get_runs()
            .withf(|_, limit| *limit == DEFAULT_RUNS_LIMIT)
            .returning(|_, _| Err(DbError::NotFound));
        let app = build_router(create_test_state(db, provider(Ok(()))));
        let server = TestServer::new(app).unwrap();

        let response = server.get("/api/sync/runs").await;
        response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    }
}
