//! Outcome rendering for gateway routes.
//!
//! The gateway's caller contract is payload-level, not transport-level:
//! registered routes always answer `200 OK` with either a success body or a
//! structured error body. The `code` field distinguishes error classes so
//! callers can branch on `SYNC_TIMEOUT` without parsing message text, while
//! `error` carries the flattened human-readable message.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use cbq_gateway::GatewayError;
use serde::Serialize;
use serde_json::Value;

/// The rendered outcome of a gateway route.
#[derive(Debug)]
pub enum ApiOutcome {
    /// The handler produced data.
    Success(Value),
    /// Any failure, flattened to a code and message.
    Failure {
        /// Stable machine-readable error class.
        code: &'static str,
        /// Human-readable error message.
        message: String,
    },
}

/// Success body: `{"success": true, "data": ...}`.
#[derive(Serialize)]
struct SuccessBody {
    success: bool,
    data: Value,
}

/// Error body: `{"error": ..., "code": ...}`.
#[derive(Serialize)]
struct ErrorBody {
    error: String,
    code: &'static str,
}

impl ApiOutcome {
    /// Build a failure outcome.
    #[must_use]
    pub fn failure(code: &'static str, message: impl Into<String>) -> Self {
        Self::Failure {
            code,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiOutcome {
    fn into_response(self) -> Response {
        match self {
            Self::Success(data) => (
                StatusCode::OK,
                Json(SuccessBody {
                    success: true,
                    data,
                }),
            )
                .into_response(),
            Self::Failure { code, message } => {
                (StatusCode::OK, Json(ErrorBody { error: message, code })).into_response()
            },
        }
    }
}

impl From<GatewayError> for ApiOutcome {
    fn from(err: GatewayError) -> Self {
        let code = match &err {
            GatewayError::Validation(_) => "VALIDATION_ERROR",
            GatewayError::NotFound { .. } => "NOT_FOUND",
            GatewayError::UnroutableCommand { .. } => "UNROUTABLE_COMMAND",
            GatewayError::DuplicateRegistration(_) => "DUPLICATE_REGISTRATION",
            GatewayError::Transport(_) => "TRANSPORT_ERROR",
            GatewayError::Envelope(_) => "ENVELOPE_ERROR",
            GatewayError::SyncTimeout { .. } => "SYNC_TIMEOUT",
            GatewayError::Handler(_) => "HANDLER_ERROR",
        };

        // Infrastructure failures are logged server-side; the caller only
        // sees the flattened message.
        match &err {
            GatewayError::Transport(_) | GatewayError::Envelope(_) => {
                tracing::error!(error = %err, code = code, "Gateway infrastructure error");
            },
            GatewayError::SyncTimeout { .. } => {
                tracing::warn!(error = %err, "Sync wait timed out");
            },
            _ => {},
        }

        Self::Failure {
            code,
            message: err.to_string(),
        }
    }
}
