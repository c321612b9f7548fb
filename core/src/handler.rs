//! Handler contract for registered operations.
//!
//! A handler is the polymorphic unit of execution bound to an operation name
//! and route at registration time. Handlers take the command payload and
//! return either result data or a [`HandlerError`]; the dispatcher converts
//! the error into a failed response envelope, so handler failures never
//! surface as transport failures.

use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Error returned by a handler.
///
/// Carries a flattened, caller-visible message. Richer failure kinds are a
/// logging concern of the handler itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerError {
    /// Human-readable error message, returned to the caller verbatim.
    pub message: String,
}

impl HandlerError {
    /// Create a new handler error from a message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for HandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for HandlerError {}

/// Result of handler execution: JSON data or a flattened error.
pub type HandlerResult = Result<Value, HandlerError>;

/// A shareable handler function.
///
/// Handlers are stored in the registry as `Arc`'d closures so one handler can
/// be executed concurrently from many dispatch tasks without cloning state.
pub type HandlerFn = Arc<dyn Fn(Value) -> Pin<Box<dyn Future<Output = HandlerResult> + Send>> + Send + Sync>;

/// Wrap an async closure into a [`HandlerFn`].
///
/// # Example
///
/// ```
/// use cbq_core::handler::{handler_fn, HandlerError};
/// use serde_json::{json, Value};
///
/// let create = handler_fn(|payload: Value| async move {
///     if payload.get("name").is_none() {
///         return Err(HandlerError::new("Name is required"));
///     }
///     Ok(json!({ "created": true }))
/// });
/// ```
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(move |payload| {
        Box::pin(f(payload)) as Pin<Box<dyn Future<Output = HandlerResult> + Send>>
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn handler_fn_returns_data() {
        let handler = handler_fn(|payload: Value| async move {
            Ok(json!({ "echo": payload }))
        });

        let result = handler(json!({ "a": 1 })).await.unwrap();
        assert_eq!(result["echo"]["a"], 1);
    }

    #[tokio::test]
    async fn handler_fn_surfaces_errors_as_messages() {
        let handler =
            handler_fn(|_payload: Value| async move { Err(HandlerError::new("nope")) });

        let err = handler(json!({})).await.unwrap_err();
        assert_eq!(err.message, "nope");
    }

    #[tokio::test]
    async fn handler_fn_is_shareable_across_tasks() {
        let handler = handler_fn(|_payload: Value| async move { Ok(json!(1)) });

        let a = Arc::clone(&handler);
        let join = tokio::spawn(async move { a(json!({})).await });

        assert_eq!(handler(json!({})).await.unwrap(), json!(1));
        assert_eq!(join.await.unwrap().unwrap(), json!(1));
    }
}
