//! Request tracing for the ops server.
//!
//! Each request runs inside an `ops_request` span keyed by a request id. A
//! caller-supplied `X-Request-Id` is kept when it looks sane so a scan
//! triggered from a deploy script or cron wrapper can be followed end to end.
//! Scans started by `POST /run` log inside that span, and their id is echoed
//! back in `X-Scan-Id`.

use axum::{
    extract::Request,
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};
use std::time::Instant;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "X-Request-Id";

/// Set by the manual-run handler on its response.
pub const SCAN_ID_HEADER: &str = "X-Scan-Id";

const MAX_REQUEST_ID_LEN: usize = 64;

/// Request id for the current ops request, also stored in request extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

/// Reuse the caller's request id or mint a new one.
pub fn request_id_from(headers: &HeaderMap) -> RequestId {
    let incoming = headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|id| {
            !id.is_empty()
                && id.len() <= MAX_REQUEST_ID_LEN
                && id
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        });

    match incoming {
        Some(id) => RequestId(id.to_string()),
        None => RequestId(Uuid::new_v4().to_string()),
    }
}

pub async fn trace_ops_request(mut request: Request, next: Next) -> Response {
    let request_id = request_id_from(request.headers());
    request.extensions_mut().insert(request_id.clone());

    let span = info_span!(
        "ops_request",
        request_id = %request_id.0,
        method = %request.method(),
        route = %request.uri().path(),
    );

    let mut response = async move {
        let started = Instant::now();
        let response = next.run(request).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        let status = response.status();

        let scan_id = response
            .headers()
            .get(SCAN_ID_HEADER)
            .and_then(|v| v.to_str().ok());

        if status.is_server_error() {
            warn!(status = status.as_u16(), elapsed_ms, scan_id, "Ops request failed");
        } else {
            info!(status = status.as_u16(), elapsed_ms, scan_id, "Ops request served");
        }
        response
    }
    .instrument(span)
    .await;

    if let Ok(value) = HeaderValue::from_str(&request_id.0) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}
