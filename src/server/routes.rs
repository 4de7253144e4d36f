use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use crate::server::handlers::{health_handler, run_scan_handler, stats_handler, AppState};
use crate::server::logging::trace_ops_request;

/// Build the ops router.
///
/// # Routes
///
/// - `GET /health` - Liveness and scheduler state
/// - `GET /api/v1/notifications/stats` - Sent/failed/pending totals and recent activity
/// - `POST /api/v1/notifications/run` - Run a scan now and return its summary
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/v1/notifications/stats", get(stats_handler))
        .route("/api/v1/notifications/run", post(run_scan_handler))
        .layer(middleware::from_fn(trace_ops_request))
        .with_state(state)
}
