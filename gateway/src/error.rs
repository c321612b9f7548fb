//! Gateway error taxonomy.
//!
//! One enum spans the gateway's failure surface so every path from request
//! intake to response rendering is an explicit variant rather than an
//! uncaught fault. Timeout is a first-class expected outcome, not an
//! exceptional crash; handler failures are flattened to their message text
//! for the caller while the variant kind stays available for logging.

use cbq_core::bus::BusError;
use cbq_core::envelope::EnvelopeError;
use http::Method;
use thiserror::Error;

/// Errors produced by the registry, correlation engine, and dispatcher.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// A required request field is missing or invalid.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// No handler is registered for the requested route.
    #[error("No handler registered for {method} {path}")]
    NotFound {
        /// The request method.
        method: Method,
        /// The request path.
        path: String,
    },

    /// No handler is registered for the operation name, or the operation's
    /// group is not covered by any configured command topic.
    #[error("No route for operation '{operation}'")]
    UnroutableCommand {
        /// The unroutable operation name.
        operation: String,
    },

    /// A route or operation name was registered twice. Startup-time
    /// configuration error; fails process startup.
    #[error("Duplicate registration: {0}")]
    DuplicateRegistration(String),

    /// The broker transport failed.
    #[error(transparent)]
    Transport(#[from] BusError),

    /// An envelope could not be encoded or decoded.
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    /// No correlated response arrived within the sync timeout.
    #[error("No response for operation '{operation}' within {waited_ms}ms")]
    SyncTimeout {
        /// The operation that timed out.
        operation: String,
        /// How long the caller waited.
        waited_ms: u64,
    },

    /// The downstream handler failed; carries the flattened message the
    /// caller sees.
    #[error("{0}")]
    Handler(String),
}

impl GatewayError {
    /// Whether this error is the expected timeout outcome rather than a
    /// fault.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::SyncTimeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_display_names_operation_and_bound() {
        let err = GatewayError::SyncTimeout {
            operation: "cmd.public.products.create.v1".to_string(),
            waited_ms: 5000,
        };
        assert!(err.is_timeout());
        assert!(err.to_string().contains("cmd.public.products.create.v1"));
        assert!(err.to_string().contains("5000"));
    }

    #[test]
    fn transport_errors_pass_through_bus_error_text() {
        let err = GatewayError::from(BusError::ConnectionFailed("nope".to_string()));
        assert_eq!(err.to_string(), "Connection failed: nope");
        assert!(!err.is_timeout());
    }
}
