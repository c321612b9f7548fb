//! Message bus abstraction over the broker transport.
//!
//! This module provides the [`MessageBus`] trait the gateway is generic over.
//! The trait owns nothing about envelope semantics: it moves opaque byte
//! payloads between topics, leaving encoding to the layers above. This keeps
//! the broker an external dependency boundary the correlation engine and
//! dispatcher can be tested against in memory.
//!
//! # Delivery Semantics
//!
//! Implementations provide **at-least-once** delivery: a message may arrive
//! more than once and out of order relative to other topics. Consumers must
//! be idempotent; the gateway achieves this by keying all resolution on
//! correlation ids.
//!
//! # Implementations
//!
//! - `KafkaMessageBus` (`cbq-kafka`) - production, Kafka-compatible brokers
//! - `InMemoryMessageBus` (`cbq-testing`) - deterministic in-process testing
//!
//! # Example
//!
//! ```rust,ignore
//! use cbq_core::bus::MessageBus;
//! use futures::StreamExt;
//!
//! async fn example(bus: &dyn MessageBus) {
//!     bus.publish("cmd", b"{...}").await?;
//!
//!     let mut stream = bus.subscribe(&["cmd"]).await?;
//!     while let Some(result) = stream.next().await {
//!         match result {
//!             Ok(delivery) => println!("{} bytes from {}", delivery.payload.len(), delivery.topic),
//!             Err(e) => eprintln!("Error: {e}"),
//!         }
//!     }
//! }
//! ```

use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during message bus operations.
#[derive(Error, Debug, Clone)]
pub enum BusError {
    /// Failed to connect to the broker.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to publish a message to a topic.
    #[error("Publish failed for topic '{topic}': {reason}")]
    PublishFailed {
        /// The topic that failed.
        topic: String,
        /// The reason for failure.
        reason: String,
    },

    /// Failed to subscribe to topics.
    #[error("Subscription failed for topics {topics:?}: {reason}")]
    SubscriptionFailed {
        /// The topics that failed to subscribe.
        topics: Vec<String>,
        /// The reason for failure.
        reason: String,
    },

    /// Network or transport error during consumption.
    #[error("Transport error: {0}")]
    TransportError(String),
}

/// A single message delivered from a subscription.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Delivery {
    /// The topic the message arrived on.
    pub topic: String,

    /// The raw message payload.
    pub payload: Vec<u8>,
}

impl Delivery {
    /// Create a new delivery.
    #[must_use]
    pub fn new(topic: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            payload,
        }
    }
}

/// Stream of deliveries from a subscription.
///
/// Each item is a `Result` so transport-level consumption errors reach the
/// subscriber without tearing the stream down.
pub type MessageStream = Pin<Box<dyn Stream<Item = Result<Delivery, BusError>> + Send>>;

/// Trait for broker transport implementations.
///
/// Publish is fire-and-forget: once the broker acknowledges, delivery timing
/// is out of the caller's hands. Subscribe registers a continuous consumption
/// loop that runs until the returned stream is dropped. Multiple independent
/// subscriptions may be active concurrently (one per logical "handles" group
/// plus the reply topic in a typical deployment).
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; the correlation engine and the
/// dispatcher share one bus behind an `Arc`.
///
/// # Dyn Compatibility
///
/// Methods return explicit `Pin<Box<dyn Future>>` instead of `async fn` so
/// the trait can be used as `Arc<dyn MessageBus>`.
pub trait MessageBus: Send + Sync {
    /// Publish a raw payload to a topic.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::PublishFailed`] if the broker rejects or cannot
    /// accept the message. Retry policy is the caller's decision.
    fn publish(
        &self,
        topic: &str,
        payload: &[u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), BusError>> + Send + '_>>;

    /// Subscribe to one or more topics and receive a stream of deliveries.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::SubscriptionFailed`] if the consumer cannot be
    /// created or the subscription is rejected.
    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<MessageStream, BusError>> + Send + '_>>;
}
