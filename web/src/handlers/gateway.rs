//! Router derivation and request dispatch.
//!
//! The router is built from the frozen registry at startup: every entry
//! contributes one `(method, path)` route. Command entries submit through
//! the correlation engine and wait for the broker round trip; query entries
//! invoke their handler in-process. Unknown routes fall through to a
//! structured 404 body so no path returns a bare framework error page.

use crate::error::ApiOutcome;
use crate::middleware::request_id_layer;
use crate::state::AppState;
use axum::extract::State;
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{MethodFilter, get, on};
use axum::{Json, Router};
use cbq_gateway::{Binding, GatewayError, RegistryEntry};
use serde_json::{Value, json};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Build the gateway router from the registry in `state`.
///
/// Routes with an HTTP method axum cannot filter on (e.g. `CONNECT`) are
/// skipped with a warning rather than failing startup; the registry has
/// already validated uniqueness.
#[must_use]
pub fn build_router(state: AppState) -> Router {
    let mut router = Router::new().route("/health", get(super::health::health_check));

    for entry in state.registry.entries() {
        let Ok(filter) = MethodFilter::try_from(entry.method.clone()) else {
            tracing::warn!(
                method = %entry.method,
                path = %entry.path,
                "Skipping route with unsupported method"
            );
            continue;
        };

        tracing::debug!(
            method = %entry.method,
            path = %entry.path,
            operation = %entry.operation,
            "Mounting gateway route"
        );

        let path = entry.path.clone();
        let entry = Arc::clone(entry);
        let handler = move |State(state): State<AppState>, body: Option<Json<Value>>| {
            let entry = Arc::clone(&entry);
            async move {
                let payload = body.map_or_else(|| json!({}), |Json(value)| value);
                dispatch(&state, &entry, payload).await
            }
        };
        router = router.route(&path, on(filter, handler));
    }

    router
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .layer(request_id_layer())
        .with_state(state)
}

/// Execute one registry entry for a request payload.
async fn dispatch(state: &AppState, entry: &RegistryEntry, payload: Value) -> ApiOutcome {
    let result = match entry.binding {
        Binding::Query => entry
            .invoke(payload)
            .await
            .map_err(|e| GatewayError::Handler(e.message)),
        Binding::Command => state.engine.submit(&entry.operation, payload).await,
    };

    match result {
        Ok(data) => ApiOutcome::Success(data),
        Err(err) => ApiOutcome::from(err),
    }
}

/// Structured 404 for routes outside the registry.
async fn not_found(uri: Uri) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": format!("No handler registered for {uri}"),
            "code": "NOT_FOUND",
        })),
    )
        .into_response()
}
