//! Correlation engine: synchronous calls over an asynchronous broker.
//!
//! For each submission the engine generates a fresh v4 UUID (128 random
//! bits, so collisions are structurally impossible under concurrent load),
//! registers a single-use rendezvous keyed by that id, publishes the command
//! envelope, and parks only the calling task until the correlated response
//! arrives or the sync timeout elapses. A single response pump task consumes
//! the reply topic for all in-flight calls; resolution never blocks on any
//! caller.
//!
//! # Exactly-Once Resolution
//!
//! The pending-call map is the only mutable shared structure. Removal from
//! the map is the arbitration point: whichever of the response pump or the
//! timeout path removes the entry wins, and the loser observes the entry
//! gone and no-ops. The pump completes the rendezvous while still holding
//! the lock, so a timed-out caller that finds its entry already claimed can
//! always recover the response from its channel.
//!
//! Responses with no matching pending call (late arrivals after a timeout,
//! or duplicate deliveries from the broker's at-least-once semantics) are
//! discarded with a debug log, never an error.

use crate::error::GatewayError;
use cbq_core::bus::{BusError, MessageBus};
use cbq_core::config::BrokerProfile;
use cbq_core::envelope::{CommandEnvelope, ResponseEnvelope};
use futures::StreamExt;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use uuid::Uuid;

type PendingMap = HashMap<Uuid, oneshot::Sender<ResponseEnvelope>>;

/// The request/response correlation engine.
///
/// Cheap to share: submissions borrow the engine, and one engine serves all
/// concurrent callers. Construct it from the broker profile that also
/// configures the dispatcher, then call [`CorrelationEngine::start`] once to
/// spawn the response pump before the first submission.
pub struct CorrelationEngine {
    bus: Arc<dyn MessageBus>,
    pending: Arc<Mutex<PendingMap>>,
    reply_topic: String,
    sync_timeout: Duration,
    handles: Vec<String>,
}

impl CorrelationEngine {
    /// Create an engine over the given transport.
    ///
    /// Takes the sync timeout, reply topic, and handled command groups from
    /// the profile.
    #[must_use]
    pub fn new(bus: Arc<dyn MessageBus>, profile: &BrokerProfile) -> Self {
        Self {
            bus,
            pending: Arc::new(Mutex::new(HashMap::new())),
            reply_topic: profile.reply_topic.clone(),
            sync_timeout: profile.sync_timeout(),
            handles: profile.handles.clone(),
        }
    }

    /// Subscribe to the reply topic and spawn the response pump.
    ///
    /// The pump runs until the subscription stream ends (bus dropped or
    /// connection torn down). Dropping the returned handle does not stop it;
    /// abort it for an orderly shutdown.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Transport`] if the reply-topic subscription
    /// cannot be created.
    pub async fn start(&self) -> Result<JoinHandle<()>, GatewayError> {
        let mut stream = self.bus.subscribe(&[self.reply_topic.as_str()]).await?;
        let pending = Arc::clone(&self.pending);

        tracing::info!(reply_topic = %self.reply_topic, "Response pump started");

        Ok(tokio::spawn(async move {
            while let Some(item) = stream.next().await {
                match item {
                    Ok(delivery) => match ResponseEnvelope::from_bytes(&delivery.payload) {
                        Ok(response) => resolve_pending(&pending, response),
                        Err(e) => {
                            tracing::warn!(error = %e, "Dropping undecodable response envelope");
                        },
                    },
                    Err(e) => {
                        tracing::warn!(error = %e, "Response stream error");
                    },
                }
            }
            tracing::debug!("Response pump exiting");
        }))
    }

    /// Submit an operation and wait for its correlated response.
    ///
    /// Publishes a [`CommandEnvelope`] to the command topic selected by the
    /// operation's leading group segment and blocks the calling task (only)
    /// until the dispatcher's response arrives or `sync_timeout` elapses.
    ///
    /// # Errors
    ///
    /// - [`GatewayError::UnroutableCommand`] if the operation's group is not
    ///   in the configured `handles` list
    /// - [`GatewayError::Transport`] if the publish fails (the pending call
    ///   is released immediately)
    /// - [`GatewayError::SyncTimeout`] if no response arrives in time (the
    ///   pending call is released; a later response is discarded)
    /// - [`GatewayError::Handler`] if the response reports a failed handler
    pub async fn submit(&self, operation: &str, payload: Value) -> Result<Value, GatewayError> {
        let topic = self.command_topic(operation)?.to_string();
        let correlation_id = Uuid::new_v4();
        let envelope =
            CommandEnvelope::new(correlation_id, operation, payload, self.reply_topic.clone());
        let bytes = envelope.to_bytes()?;

        let (tx, mut rx) = oneshot::channel();
        self.insert_pending(correlation_id, tx);

        tracing::debug!(
            operation = %operation,
            correlation_id = %correlation_id,
            topic = %topic,
            "Publishing command"
        );

        if let Err(e) = self.bus.publish(&topic, &bytes).await {
            // Failed publishes must not leak their pending slot.
            self.remove_pending(correlation_id);
            return Err(e.into());
        }

        match tokio::time::timeout(self.sync_timeout, &mut rx).await {
            Ok(Ok(response)) => into_result(operation, response),
            Ok(Err(_closed)) => {
                self.remove_pending(correlation_id);
                Err(GatewayError::Transport(BusError::TransportError(
                    "response channel closed before resolution".to_string(),
                )))
            },
            Err(_elapsed) => {
                if self.remove_pending(correlation_id).is_some() {
                    tracing::debug!(
                        operation = %operation,
                        correlation_id = %correlation_id,
                        "Sync wait timed out"
                    );
                    Err(GatewayError::SyncTimeout {
                        operation: operation.to_string(),
                        waited_ms: u64::try_from(self.sync_timeout.as_millis())
                            .unwrap_or(u64::MAX),
                    })
                } else {
                    // The pump claimed the entry before we could: it resolved
                    // the rendezvous under the map lock, so the response is
                    // already in our channel.
                    match rx.try_recv() {
                        Ok(response) => into_result(operation, response),
                        Err(_) => Err(GatewayError::SyncTimeout {
                            operation: operation.to_string(),
                            waited_ms: u64::try_from(self.sync_timeout.as_millis())
                                .unwrap_or(u64::MAX),
                        }),
                    }
                }
            },
        }
    }

    /// Number of in-flight pending calls. Exposed for leak assertions and
    /// gauge metrics.
    ///
    /// # Panics
    ///
    /// Panics if the pending-call lock is poisoned (a task panicked while
    /// holding it).
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn pending_calls(&self) -> usize {
        self.pending
            .lock()
            .expect("pending-call lock poisoned - indicates a panic in another task")
            .len()
    }

    /// Select the command topic for an operation from its leading group
    /// segment (`cmd.public.products.create.v1` routes to `cmd`).
    fn command_topic(&self, operation: &str) -> Result<&str, GatewayError> {
        let group = operation.split('.').next().unwrap_or(operation);
        self.handles
            .iter()
            .find(|topic| topic.as_str() == group)
            .map(String::as_str)
            .ok_or_else(|| GatewayError::UnroutableCommand {
                operation: operation.to_string(),
            })
    }

    #[allow(clippy::expect_used)]
    fn insert_pending(&self, correlation_id: Uuid, tx: oneshot::Sender<ResponseEnvelope>) {
        self.pending
            .lock()
            .expect("pending-call lock poisoned - indicates a panic in another task")
            .insert(correlation_id, tx);
    }

    #[allow(clippy::expect_used)]
    fn remove_pending(&self, correlation_id: Uuid) -> Option<oneshot::Sender<ResponseEnvelope>> {
        self.pending
            .lock()
            .expect("pending-call lock poisoned - indicates a panic in another task")
            .remove(&correlation_id)
    }
}

/// Resolve a delivered response against the pending-call map.
///
/// Claims the entry and completes the rendezvous under one lock hold so the
/// timeout path can rely on remove-order arbitration. Unknown correlation
/// ids are discarded silently.
#[allow(clippy::expect_used)]
fn resolve_pending(pending: &Mutex<PendingMap>, response: ResponseEnvelope) {
    let mut map = pending
        .lock()
        .expect("pending-call lock poisoned - indicates a panic in another task");
    match map.remove(&response.correlation_id) {
        Some(tx) => {
            if tx.send(response).is_err() {
                tracing::debug!("Caller gone before resolution");
            }
        },
        None => {
            tracing::debug!(
                correlation_id = %response.correlation_id,
                "Discarding response with no pending call (timed out or duplicate)"
            );
        },
    }
}

/// Unwrap a response envelope into the caller's result, flattening handler
/// failures to their message text.
fn into_result(operation: &str, response: ResponseEnvelope) -> Result<Value, GatewayError> {
    if response.success {
        Ok(response.data.unwrap_or(Value::Null))
    } else {
        Err(GatewayError::Handler(response.error.unwrap_or_else(|| {
            format!("Handler for '{operation}' failed")
        })))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use serde_json::json;

    fn engine_with_handles(handles: &[&str]) -> CorrelationEngine {
        let profile = BrokerProfile {
            handles: handles.iter().map(|s| (*s).to_string()).collect(),
            ..BrokerProfile::default()
        };
        CorrelationEngine::new(Arc::new(cbq_testing::InMemoryMessageBus::new()), &profile)
    }

    #[test]
    fn command_topic_uses_leading_group_segment() {
        let engine = engine_with_handles(&["cmd", "bulk"]);
        assert_eq!(
            engine.command_topic("cmd.public.products.create.v1").unwrap(),
            "cmd"
        );
        assert_eq!(engine.command_topic("bulk.import.v1").unwrap(), "bulk");
    }

    #[test]
    fn unconfigured_group_is_unroutable() {
        let engine = engine_with_handles(&["cmd"]);
        let err = engine.command_topic("qry.products.v1").unwrap_err();
        assert!(matches!(err, GatewayError::UnroutableCommand { .. }));
    }

    #[test]
    fn into_result_unwraps_success_data() {
        let response = ResponseEnvelope::ok(Uuid::new_v4(), json!({ "id": 3 }));
        assert_eq!(into_result("cmd.x.v1", response).unwrap(), json!({ "id": 3 }));
    }

    #[test]
    fn into_result_flattens_failure_to_handler_error() {
        let response = ResponseEnvelope::fail(Uuid::new_v4(), "Name and price are required");
        let err = into_result("cmd.x.v1", response).unwrap_err();
        assert!(matches!(
            err,
            GatewayError::Handler(msg) if msg == "Name and price are required"
        ));
    }

    #[test]
    fn resolve_pending_discards_unknown_ids() {
        let pending: Mutex<PendingMap> = Mutex::new(HashMap::new());
        // Must not panic or error.
        resolve_pending(&pending, ResponseEnvelope::ok(Uuid::new_v4(), json!(null)));
    }

    #[tokio::test]
    async fn resolve_pending_wakes_exactly_one_waiter() {
        let pending: Mutex<PendingMap> = Mutex::new(HashMap::new());
        let id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        pending.lock().unwrap().insert(id, tx);

        resolve_pending(&pending, ResponseEnvelope::ok(id, json!(1)));
        assert!(pending.lock().unwrap().is_empty());
        assert_eq!(rx.await.unwrap().data, Some(json!(1)));

        // Duplicate delivery after resolution: a no-op.
        resolve_pending(&pending, ResponseEnvelope::ok(id, json!(1)));
    }
}
