use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::{info, warn};

use crate::errors::{NotifierError, NotifierResult};
use crate::jobs::{NotificationStats, ReminderScheduler, ScanStatus};
use crate::server::logging::SCAN_ID_HEADER;

/// Shared application state for handlers.
#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<ReminderScheduler>,
}

/// Standard error response body for HTTP errors.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

/// Map internal `NotifierError` into an HTTP response.
///
/// Lets handlers return `Result<Json<T>, NotifierError>`.
impl IntoResponse for NotifierError {
    fn into_response(self) -> Response {
        let status = match self {
            NotifierError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            NotifierError::DeliveryError(_) => StatusCode::BAD_GATEWAY,
            NotifierError::ClassificationError(_) | NotifierError::InvalidRecord(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            NotifierError::DuplicateEntry { .. } => StatusCode::CONFLICT,
            NotifierError::ConfigError(_)
            | NotifierError::PersistenceError(_)
            | NotifierError::SchedulerError(_)
            | NotifierError::ServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = ErrorResponse {
            success: false,
            error: self.to_string(),
        };

        (status, Json(body)).into_response()
    }
}

/// Liveness plus scheduler state.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub scheduler_running: bool,
    pub scan_in_flight: bool,
}

pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "subnotify".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        scheduler_running: state.scheduler.is_running(),
        scan_in_flight: state.scheduler.engine().is_scanning(),
    })
}

/// Totals and recent activity from the notification log.
pub async fn stats_handler(
    State(state): State<AppState>,
) -> NotifierResult<Json<NotificationStats>> {
    let stats = state.scheduler.get_stats().await?;
    Ok(Json(stats))
}

/// Trigger a scan and wait for its summary.
///
/// - `200` when the scan completed
/// - `409` when another scan was already in flight
/// - `503` when the user store could not be listed
///
/// The scan id is also returned in `X-Scan-Id`.
pub async fn run_scan_handler(State(state): State<AppState>) -> impl IntoResponse {
    let summary = state.scheduler.run_once().await;

    let status = match summary.status {
        ScanStatus::Completed => {
            info!(
                "Manual scan {} finished: {} sent, {} failed",
                summary.scan_id, summary.sent, summary.failed
            );
            StatusCode::OK
        }
        ScanStatus::AlreadyRunning => StatusCode::CONFLICT,
        ScanStatus::Aborted => {
            warn!("Manual scan {} aborted", summary.scan_id);
            StatusCode::SERVICE_UNAVAILABLE
        }
    };

    let scan_id = summary.scan_id.clone();
    (status, [(SCAN_ID_HEADER, scan_id)], Json(summary))
}
