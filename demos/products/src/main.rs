//! Products demo: the gateway wired end to end over a Kafka-compatible
//! broker.
//!
//! Routes:
//!
//! - `POST /public/products` → `cmd.public.products.create.v1`, published to
//!   the `cmd` topic and executed by the dispatcher
//! - `GET /public/products` → `qry.public.products.v1`, answered in-process
//!
//! Run a broker locally (e.g. `docker run -p 9092:9092 redpandadata/redpanda`),
//! then:
//!
//! ```text
//! CBQ_BROKERS=localhost:9092 cargo run -p cbq-products-demo
//! curl -X POST localhost:8080/public/products \
//!   -H 'content-type: application/json' \
//!   -d '{"name": "Widget", "price": 9.99}'
//! ```

use cbq_core::bus::MessageBus;
use cbq_core::config::BrokerProfile;
use cbq_core::handler::{HandlerError, handler_fn};
use cbq_gateway::{CorrelationEngine, Dispatcher, GatewayError, HandlerRegistry, RegistryBuilder};
use cbq_kafka::KafkaMessageBus;
use cbq_web::{AppState, build_router};
use http::Method;
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Register the product handlers over a shared in-memory store.
///
/// The store stands in for a real persistence layer; the gateway itself is
/// storage-agnostic.
#[allow(clippy::expect_used)] // Lock poisoning indicates a panicked handler task
fn product_registry() -> Result<HandlerRegistry, GatewayError> {
    let store: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));

    let create_store = Arc::clone(&store);
    let list_store = store;

    let mut builder = RegistryBuilder::new();
    builder
        .register_command(
            "cmd.public.products.create.v1",
            Method::POST,
            "/public/products",
            handler_fn(move |payload: Value| {
                let store = Arc::clone(&create_store);
                async move {
                    let (Some(name), Some(price)) = (payload.get("name"), payload.get("price"))
                    else {
                        return Err(HandlerError::new("Name and price are required"));
                    };
                    let product = json!({
                        "id": Uuid::new_v4(),
                        "name": name,
                        "price": price,
                    });
                    store
                        .lock()
                        .expect("product store lock poisoned")
                        .push(product.clone());
                    Ok(product)
                }
            }),
        )?
        .register_query(
            "qry.public.products.v1",
            Method::GET,
            "/public/products",
            handler_fn(move |_payload: Value| {
                let store = Arc::clone(&list_store);
                async move {
                    let products = store.lock().expect("product store lock poisoned").clone();
                    Ok(json!(products))
                }
            }),
        )?;
    Ok(builder.build())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let profile = BrokerProfile::from_env()?;
    tracing::info!(
        brokers = %profile.brokers,
        handles = ?profile.handles,
        reply_topic = %profile.reply_topic,
        "Starting products demo"
    );

    let bus: Arc<dyn MessageBus> = Arc::new(KafkaMessageBus::from_profile(&profile)?);
    let registry = Arc::new(product_registry()?);

    let engine = Arc::new(CorrelationEngine::new(Arc::clone(&bus), &profile));
    engine.start().await?;
    Dispatcher::new(bus, Arc::clone(&registry), &profile)
        .start()
        .await?;

    let app = build_router(AppState::new(engine, registry));
    let addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "Gateway listening");
    axum::serve(listener, app).await?;

    Ok(())
}
