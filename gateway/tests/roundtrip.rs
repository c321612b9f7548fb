//! End-to-end correlation tests over the in-memory bus.
//!
//! These exercise the full chain the production deployment runs: engine
//! publishes a command, dispatcher consumes it, executes the handler, and
//! publishes the response the engine correlates back to the waiting caller.

#![allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect

use cbq_core::bus::MessageBus;
use cbq_core::config::BrokerProfile;
use cbq_core::envelope::{CommandEnvelope, ResponseEnvelope};
use cbq_core::handler::{HandlerError, handler_fn};
use cbq_gateway::{CorrelationEngine, Dispatcher, GatewayError, RegistryBuilder};
use cbq_testing::InMemoryMessageBus;
use futures::StreamExt;
use http::Method;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

fn test_profile(sync_timeout_ms: u64) -> BrokerProfile {
    BrokerProfile {
        sync_timeout_ms,
        reply_topic: "cbq.replies".to_string(),
        ..BrokerProfile::default()
    }
}

/// Product-create registry matching the canonical example: requires `name`
/// and `price`, echoes them back with a generated id.
fn product_registry() -> Arc<cbq_gateway::HandlerRegistry> {
    let mut builder = RegistryBuilder::new();
    builder
        .register_command(
            "cmd.public.products.create.v1",
            Method::POST,
            "/public/products",
            handler_fn(|payload: Value| async move {
                let (Some(name), Some(price)) = (payload.get("name"), payload.get("price")) else {
                    return Err(HandlerError::new("Name and price are required"));
                };
                Ok(json!({
                    "id": uuid::Uuid::new_v4(),
                    "name": name,
                    "price": price,
                }))
            }),
        )
        .unwrap();
    Arc::new(builder.build())
}

#[tokio::test]
async fn submit_returns_dispatcher_response_exactly_once() {
    let bus = Arc::new(InMemoryMessageBus::new());
    let profile = test_profile(5000);

    let engine = CorrelationEngine::new(bus.clone(), &profile);
    let _pump = engine.start().await.unwrap();
    let _dispatch = Dispatcher::new(bus.clone(), product_registry(), &profile)
        .start()
        .await
        .unwrap();

    let data = engine
        .submit(
            "cmd.public.products.create.v1",
            json!({ "name": "Widget", "price": 9.99 }),
        )
        .await
        .unwrap();

    assert_eq!(data["name"], "Widget");
    assert_eq!(data["price"], 9.99);
    assert!(data["id"].is_string());
    assert_eq!(engine.pending_calls(), 0);
}

#[tokio::test]
async fn validation_failure_reaches_caller_as_flattened_message() {
    let bus = Arc::new(InMemoryMessageBus::new());
    let profile = test_profile(5000);

    let engine = CorrelationEngine::new(bus.clone(), &profile);
    let _pump = engine.start().await.unwrap();
    let _dispatch = Dispatcher::new(bus.clone(), product_registry(), &profile)
        .start()
        .await
        .unwrap();

    // Missing price: the handler's validation fails before any persistence.
    let err = engine
        .submit("cmd.public.products.create.v1", json!({ "name": "Widget" }))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        GatewayError::Handler(msg) if msg == "Name and price are required"
    ));
    assert_eq!(engine.pending_calls(), 0);
}

#[tokio::test]
async fn no_response_times_out_and_releases_the_pending_call() {
    let bus = Arc::new(InMemoryMessageBus::new());
    let profile = test_profile(100);

    // No dispatcher: nothing will ever answer.
    let engine = CorrelationEngine::new(bus.clone(), &profile);
    let _pump = engine.start().await.unwrap();

    let err = engine
        .submit("cmd.public.products.create.v1", json!({ "name": "Widget" }))
        .await
        .unwrap_err();

    assert!(err.is_timeout());
    assert!(matches!(
        err,
        GatewayError::SyncTimeout { waited_ms: 100, .. }
    ));
    assert_eq!(engine.pending_calls(), 0, "timed-out call leaked its slot");
}

#[tokio::test]
async fn sustained_timeout_load_does_not_leak_pending_calls() {
    let bus = Arc::new(InMemoryMessageBus::new());
    let profile = test_profile(50);

    let engine = Arc::new(CorrelationEngine::new(bus.clone(), &profile));
    let _pump = engine.start().await.unwrap();

    let submits: Vec<_> = (0..20)
        .map(|i| {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                engine
                    .submit("cmd.public.products.create.v1", json!({ "n": i }))
                    .await
            })
        })
        .collect();

    for submit in submits {
        assert!(submit.await.unwrap().unwrap_err().is_timeout());
    }
    assert_eq!(engine.pending_calls(), 0);
}

#[tokio::test]
async fn late_response_after_timeout_is_discarded_silently() {
    let bus = Arc::new(InMemoryMessageBus::new());
    let profile = test_profile(100);

    let engine = CorrelationEngine::new(bus.clone(), &profile);
    let _pump = engine.start().await.unwrap();

    // Tap the command topic to learn the correlation id the engine used.
    let mut commands = bus.subscribe(&["cmd"]).await.unwrap();

    let err = engine
        .submit("cmd.public.products.create.v1", json!({}))
        .await
        .unwrap_err();
    assert!(err.is_timeout());

    let command =
        CommandEnvelope::from_bytes(&commands.next().await.unwrap().unwrap().payload).unwrap();

    // Answer far too late.
    let late = ResponseEnvelope::ok(command.correlation_id, json!({ "too": "late" }));
    bus.publish("cbq.replies", &late.to_bytes().unwrap()).await.unwrap();

    // Give the pump a beat to observe and discard it.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(engine.pending_calls(), 0);

    // The engine is still fully operational afterwards.
    let err = engine
        .submit("cmd.public.products.create.v1", json!({}))
        .await
        .unwrap_err();
    assert!(err.is_timeout());
}

#[tokio::test]
async fn duplicate_response_delivery_resolves_at_most_one_caller() {
    let bus = Arc::new(InMemoryMessageBus::new());
    let profile = test_profile(2000);

    let engine = Arc::new(CorrelationEngine::new(bus.clone(), &profile));
    let _pump = engine.start().await.unwrap();

    // Hand-rolled dispatcher that answers every command twice, simulating
    // at-least-once broker delivery.
    let mut commands = bus.subscribe(&["cmd"]).await.unwrap();
    let responder_bus = bus.clone();
    tokio::spawn(async move {
        while let Some(Ok(delivery)) = commands.next().await {
            let command = CommandEnvelope::from_bytes(&delivery.payload).unwrap();
            let response = ResponseEnvelope::ok(command.correlation_id, json!({ "n": 1 }));
            let bytes = response.to_bytes().unwrap();
            responder_bus.publish(&command.reply_topic, &bytes).await.unwrap();
            responder_bus.publish(&command.reply_topic, &bytes).await.unwrap();
        }
    });

    let data = engine
        .submit("cmd.public.products.create.v1", json!({}))
        .await
        .unwrap();
    assert_eq!(data, json!({ "n": 1 }));

    // The duplicate must have been discarded, not parked anywhere.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(engine.pending_calls(), 0);
}

#[tokio::test]
async fn concurrent_submissions_never_cross_resolve() {
    let bus = Arc::new(InMemoryMessageBus::new());
    let profile = test_profile(5000);

    let mut builder = RegistryBuilder::new();
    builder
        .register_command(
            "cmd.echo.v1",
            Method::POST,
            "/echo",
            handler_fn(|payload: Value| async move { Ok(payload) }),
        )
        .unwrap();
    let registry = Arc::new(builder.build());

    let engine = Arc::new(CorrelationEngine::new(bus.clone(), &profile));
    let _pump = engine.start().await.unwrap();
    let _dispatch = Dispatcher::new(bus.clone(), registry, &profile)
        .start()
        .await
        .unwrap();

    let submits: Vec<_> = (0..32)
        .map(|i| {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                let data = engine.submit("cmd.echo.v1", json!({ "n": i })).await?;
                Ok::<_, GatewayError>((i, data))
            })
        })
        .collect();

    for submit in submits {
        let (i, data) = submit.await.unwrap().unwrap();
        assert_eq!(data["n"], i, "caller {i} received someone else's response");
    }
    assert_eq!(engine.pending_calls(), 0);
}

#[tokio::test]
async fn operation_outside_configured_groups_fails_before_publish() {
    let bus = Arc::new(InMemoryMessageBus::new());
    let profile = test_profile(5000);

    let engine = CorrelationEngine::new(bus.clone(), &profile);
    let _pump = engine.start().await.unwrap();

    let err = engine
        .submit("qry.public.products.v1", json!({}))
        .await
        .unwrap_err();

    assert!(matches!(err, GatewayError::UnroutableCommand { .. }));
    assert_eq!(engine.pending_calls(), 0);
}

#[tokio::test]
async fn publish_failure_releases_the_pending_call() {
    // A bus whose publish always fails but whose subscribe works, so the
    // pump can start.
    struct FailingPublishBus(InMemoryMessageBus);

    impl MessageBus for FailingPublishBus {
        fn publish(
            &self,
            topic: &str,
            _payload: &[u8],
        ) -> std::pin::Pin<
            Box<dyn std::future::Future<Output = Result<(), cbq_core::bus::BusError>> + Send + '_>,
        > {
            let topic = topic.to_string();
            Box::pin(async move {
                Err(cbq_core::bus::BusError::PublishFailed {
                    topic,
                    reason: "broker unreachable".to_string(),
                })
            })
        }

        fn subscribe(
            &self,
            topics: &[&str],
        ) -> std::pin::Pin<
            Box<
                dyn std::future::Future<
                        Output = Result<cbq_core::bus::MessageStream, cbq_core::bus::BusError>,
                    > + Send
                    + '_,
            >,
        > {
            self.0.subscribe(topics)
        }
    }

    let bus = Arc::new(FailingPublishBus(InMemoryMessageBus::new()));
    let engine = CorrelationEngine::new(bus, &test_profile(5000));
    let _pump = engine.start().await.unwrap();

    let err = engine
        .submit("cmd.public.products.create.v1", json!({}))
        .await
        .unwrap_err();

    assert!(matches!(err, GatewayError::Transport(_)));
    assert_eq!(engine.pending_calls(), 0);
}
