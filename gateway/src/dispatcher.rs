//! Dispatcher: the consumer side of the CBQ contract.
//!
//! The dispatcher subscribes to every configured command topic, decodes each
//! delivered [`CommandEnvelope`], resolves the registry by operation name,
//! and executes the bound handler in its own task so a slow handler never
//! stalls consumption. The outcome, success data or a flattened failure
//! message, is published back to the envelope's reply topic as a
//! [`ResponseEnvelope`] with the original correlation id.
//!
//! Failure policy:
//!
//! - Malformed envelopes and unroutable operations are logged and dropped,
//!   never retried, so a poison message cannot wedge the consumption loop.
//! - Handler failures are always converted to failed response envelopes,
//!   never propagated as transport failures.
//! - Response publishes are retried a bounded number of times with backoff
//!   before giving up with an error log; the caller's timeout covers the
//!   rest.

use crate::error::GatewayError;
use crate::registry::HandlerRegistry;
use cbq_core::bus::MessageBus;
use cbq_core::config::BrokerProfile;
use cbq_core::envelope::{CommandEnvelope, ResponseEnvelope};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Bounded retry for response publishes.
const PUBLISH_ATTEMPTS: u32 = 3;
const PUBLISH_BACKOFF: Duration = Duration::from_millis(50);

/// Consumer-side executor for delivered commands.
pub struct Dispatcher {
    bus: Arc<dyn MessageBus>,
    registry: Arc<HandlerRegistry>,
    topics: Vec<String>,
}

impl Dispatcher {
    /// Create a dispatcher consuming the profile's `handles` topics.
    #[must_use]
    pub fn new(
        bus: Arc<dyn MessageBus>,
        registry: Arc<HandlerRegistry>,
        profile: &BrokerProfile,
    ) -> Self {
        Self {
            bus,
            registry,
            topics: profile.handles.clone(),
        }
    }

    /// Subscribe to the command topics and spawn the consumption loop.
    ///
    /// The loop runs until the subscription stream ends. Each command is
    /// handled in a spawned task; the loop itself only decodes and routes.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Transport`] if the subscription cannot be
    /// created.
    pub async fn start(&self) -> Result<JoinHandle<()>, GatewayError> {
        let topic_refs: Vec<&str> = self.topics.iter().map(String::as_str).collect();
        let mut stream = self.bus.subscribe(&topic_refs).await?;

        let bus = Arc::clone(&self.bus);
        let registry = Arc::clone(&self.registry);

        tracing::info!(topics = ?self.topics, handlers = registry.len(), "Dispatcher started");

        Ok(tokio::spawn(async move {
            while let Some(item) = stream.next().await {
                match item {
                    Ok(delivery) => {
                        dispatch_delivery(&bus, &registry, &delivery.payload);
                    },
                    Err(e) => {
                        tracing::warn!(error = %e, "Command stream error");
                    },
                }
            }
            tracing::debug!("Dispatcher exiting");
        }))
    }
}

/// Decode, route, and execute one delivered command.
fn dispatch_delivery(bus: &Arc<dyn MessageBus>, registry: &Arc<HandlerRegistry>, payload: &[u8]) {
    let envelope = match CommandEnvelope::from_bytes(payload) {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::warn!(error = %e, "Dropping undecodable command envelope");
            return;
        },
    };

    let entry = match registry.resolve_operation(&envelope.operation) {
        Ok(entry) => entry,
        Err(e) => {
            // Unroutable: logged and dropped, not retried, so a poison
            // message cannot loop forever. The caller's timeout reports it.
            tracing::warn!(
                operation = %envelope.operation,
                correlation_id = %envelope.correlation_id,
                error = %e,
                "Dropping unroutable command"
            );
            return;
        },
    };

    let bus = Arc::clone(bus);
    tokio::spawn(async move {
        tracing::debug!(
            operation = %entry.operation,
            correlation_id = %envelope.correlation_id,
            "Executing command handler"
        );

        let response = match entry.invoke(envelope.payload).await {
            Ok(data) => ResponseEnvelope::ok(envelope.correlation_id, data),
            Err(e) => {
                tracing::debug!(
                    operation = %entry.operation,
                    correlation_id = %envelope.correlation_id,
                    error = %e,
                    "Handler failed"
                );
                ResponseEnvelope::fail(envelope.correlation_id, e.message)
            },
        };

        publish_with_retry(bus.as_ref(), &envelope.reply_topic, &response).await;
    });
}

/// Publish a response envelope, retrying transport failures a bounded number
/// of times before giving up.
async fn publish_with_retry(bus: &dyn MessageBus, topic: &str, response: &ResponseEnvelope) {
    let bytes = match response.to_bytes() {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode response envelope");
            return;
        },
    };

    for attempt in 1..=PUBLISH_ATTEMPTS {
        match bus.publish(topic, &bytes).await {
            Ok(()) => return,
            Err(e) if attempt < PUBLISH_ATTEMPTS => {
                tracing::warn!(
                    topic = %topic,
                    attempt = attempt,
                    error = %e,
                    "Retrying response publish"
                );
                tokio::time::sleep(PUBLISH_BACKOFF * attempt).await;
            },
            Err(e) => {
                tracing::error!(
                    topic = %topic,
                    correlation_id = %response.correlation_id,
                    error = %e,
                    "Giving up on response publish after bounded retries"
                );
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use crate::registry::RegistryBuilder;
    use cbq_core::config::BrokerProfile;
    use cbq_core::handler::handler_fn;
    use cbq_testing::InMemoryMessageBus;
    use http::Method;
    use serde_json::{Value, json};
    use uuid::Uuid;

    fn test_registry() -> Arc<HandlerRegistry> {
        let mut builder = RegistryBuilder::new();
        builder
            .register_command(
                "cmd.echo.v1",
                Method::POST,
                "/echo",
                handler_fn(|payload: Value| async move { Ok(json!({ "echo": payload })) }),
            )
            .unwrap();
        Arc::new(builder.build())
    }

    #[tokio::test]
    async fn delivered_command_yields_response_on_reply_topic() {
        let bus = Arc::new(InMemoryMessageBus::new());
        let profile = BrokerProfile::default();
        let dispatcher = Dispatcher::new(bus.clone(), test_registry(), &profile);
        let _running = dispatcher.start().await.unwrap();

        let mut replies = bus.subscribe(&["replies"]).await.unwrap();

        let command = CommandEnvelope::new(Uuid::new_v4(), "cmd.echo.v1", json!({ "n": 1 }), "replies");
        bus.publish("cmd", &command.to_bytes().unwrap()).await.unwrap();

        let delivery = replies.next().await.unwrap().unwrap();
        let response = ResponseEnvelope::from_bytes(&delivery.payload).unwrap();
        assert_eq!(response.correlation_id, command.correlation_id);
        assert!(response.success);
        assert_eq!(response.data.unwrap()["echo"]["n"], 1);
    }

    #[tokio::test]
    async fn handler_failure_becomes_failed_response_envelope() {
        let bus = Arc::new(InMemoryMessageBus::new());
        let mut builder = RegistryBuilder::new();
        builder
            .register_command(
                "cmd.fail.v1",
                Method::POST,
                "/fail",
                handler_fn(|_payload: Value| async move {
                    Err(cbq_core::handler::HandlerError::new("Name and price are required"))
                }),
            )
            .unwrap();
        let dispatcher = Dispatcher::new(
            bus.clone(),
            Arc::new(builder.build()),
            &BrokerProfile::default(),
        );
        let _running = dispatcher.start().await.unwrap();

        let mut replies = bus.subscribe(&["replies"]).await.unwrap();
        let command = CommandEnvelope::new(Uuid::new_v4(), "cmd.fail.v1", json!({}), "replies");
        bus.publish("cmd", &command.to_bytes().unwrap()).await.unwrap();

        let delivery = replies.next().await.unwrap().unwrap();
        let response = ResponseEnvelope::from_bytes(&delivery.payload).unwrap();
        assert!(!response.success);
        assert_eq!(response.error.as_deref(), Some("Name and price are required"));
    }

    #[tokio::test]
    async fn unroutable_and_malformed_commands_are_dropped() {
        let bus = Arc::new(InMemoryMessageBus::new());
        let dispatcher = Dispatcher::new(bus.clone(), test_registry(), &BrokerProfile::default());
        let _running = dispatcher.start().await.unwrap();

        let mut replies = bus.subscribe(&["replies"]).await.unwrap();

        // Not an envelope at all.
        bus.publish("cmd", b"not json").await.unwrap();
        // An envelope nothing handles.
        let unroutable =
            CommandEnvelope::new(Uuid::new_v4(), "cmd.unknown.v1", json!({}), "replies");
        bus.publish("cmd", &unroutable.to_bytes().unwrap()).await.unwrap();
        // A valid command, proving the loop survived both drops.
        let command = CommandEnvelope::new(Uuid::new_v4(), "cmd.echo.v1", json!({ "ok": true }), "replies");
        bus.publish("cmd", &command.to_bytes().unwrap()).await.unwrap();

        let delivery = replies.next().await.unwrap().unwrap();
        let response = ResponseEnvelope::from_bytes(&delivery.payload).unwrap();
        assert_eq!(response.correlation_id, command.correlation_id);
    }
}
