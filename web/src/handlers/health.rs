//! Health check endpoint.
//!
//! Used by load balancers and monitoring to verify the process is up. Does
//! NOT check broker reachability; a broker outage surfaces per-request as a
//! `TRANSPORT_ERROR` or `SYNC_TIMEOUT` body instead.

use axum::Json;
use axum::http::StatusCode;
use serde_json::{Value, json};

/// Simple liveness check.
///
/// # Endpoint
///
/// ```text
/// GET /health
/// ```
#[allow(clippy::unused_async)]
pub async fn health_check() -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(json!({ "status": "ok" })))
}
