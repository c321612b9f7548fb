//! Kafka-compatible message bus for the CBQ gateway.
//!
//! This crate provides the production [`MessageBus`] implementation over
//! rdkafka. Any Kafka-protocol broker works: Apache Kafka, Redpanda, AWS
//! MSK, Azure Event Hubs. The gateway treats the broker purely as a
//! transport; command and response envelope semantics live above this layer,
//! so payloads move through here as opaque bytes.
//!
//! # Delivery Semantics
//!
//! **At-least-once delivery** with manual offset commits:
//! - Offsets are committed AFTER successful delivery to the subscriber's channel
//! - If the process crashes before commit, messages will be redelivered
//! - Consumers MUST be idempotent (the gateway keys all resolution on correlation ids)
//!
//! # Configuration
//!
//! The builder exposes the deployment surface of a broker profile:
//! - Broker addresses and consumer group id
//! - Security protocol (plaintext, SASL over plaintext/TLS, AWS MSK IAM)
//! - `receive_wait_timeout`: bound on the consumer's per-iteration poll cycle
//! - Producer send timeout, acks, and compression
//! - Subscriber buffer size and `auto.offset.reset`
//!
//! # Example
//!
//! ```no_run
//! use cbq_kafka::KafkaMessageBus;
//! use cbq_core::bus::MessageBus;
//! use futures::StreamExt;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let bus = KafkaMessageBus::builder()
//!     .brokers("localhost:9092")
//!     .group_id("cbq-gateway")
//!     .build()?;
//!
//! bus.publish("cmd", b"{\"operation\":\"cmd.ping.v1\"}").await?;
//!
//! let mut stream = bus.subscribe(&["cmd"]).await?;
//! while let Some(result) = stream.next().await {
//!     match result {
//!         Ok(delivery) => println!("{} bytes on {}", delivery.payload.len(), delivery.topic),
//!         Err(e) => eprintln!("Error: {e}"),
//!     }
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use cbq_core::bus::{BusError, Delivery, MessageBus, MessageStream};
use cbq_core::config::{BrokerProfile, SecurityProtocol};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Kafka-compatible [`MessageBus`] implementation.
///
/// One instance owns a producer and spawns an independent consumer per
/// `subscribe` call, so command-topic consumption and reply-topic consumption
/// run concurrently over the same connection parameters.
pub struct KafkaMessageBus {
    /// Kafka producer for publishing envelopes.
    producer: FutureProducer,
    /// Broker addresses (for creating consumers).
    brokers: String,
    /// Producer send timeout.
    send_timeout: Duration,
    /// Consumer group id.
    group_id: String,
    /// Bound on the consumer's per-iteration receive cycle.
    receive_wait_timeout: Duration,
    /// Security protocol applied to producers and consumers alike.
    security: SecurityProtocol,
    /// Delivery buffer size for subscribers.
    buffer_size: usize,
    /// Auto offset reset policy.
    auto_offset_reset: String,
}

impl KafkaMessageBus {
    /// Create a new bus with default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::ConnectionFailed`] if the producer cannot be
    /// created from the given addresses.
    pub fn new(brokers: &str) -> Result<Self, BusError> {
        Self::builder().brokers(brokers).build()
    }

    /// Create a new builder for configuring the bus.
    #[must_use]
    pub fn builder() -> KafkaMessageBusBuilder {
        KafkaMessageBusBuilder::default()
    }

    /// Create a bus from a broker profile.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::ConnectionFailed`] if the producer cannot be
    /// created.
    pub fn from_profile(profile: &BrokerProfile) -> Result<Self, BusError> {
        Self::builder()
            .brokers(profile.brokers.clone())
            .group_id(profile.group_id.clone())
            .security(profile.security.clone())
            .receive_wait_timeout(profile.receive_wait_timeout())
            .build()
    }

    /// Get a reference to the brokers string.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }
}

/// Builder for configuring a [`KafkaMessageBus`].
#[derive(Default)]
pub struct KafkaMessageBusBuilder {
    brokers: Option<String>,
    group_id: Option<String>,
    producer_acks: Option<String>,
    compression: Option<String>,
    send_timeout: Option<Duration>,
    receive_wait_timeout: Option<Duration>,
    security: Option<SecurityProtocol>,
    buffer_size: Option<usize>,
    auto_offset_reset: Option<String>,
}

impl KafkaMessageBusBuilder {
    /// Set the broker addresses (comma-separated).
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the consumer group id shared by this bus's subscriptions.
    ///
    /// If not set, a group id is derived from the subscribed topics so that
    /// independent deployments do not steal each other's messages.
    #[must_use]
    pub fn group_id(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    /// Set the producer acknowledgment mode: "0", "1", or "all".
    ///
    /// Default: "1".
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Set the compression codec: "none", "gzip", "snappy", "lz4", "zstd".
    ///
    /// Default: "none".
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Set the producer send timeout.
    ///
    /// Default: 5 seconds.
    #[must_use]
    pub const fn send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = Some(timeout);
        self
    }

    /// Set the bound on the consumer's per-iteration receive cycle
    /// (`fetch.wait.max.ms`). Independent of the caller-facing sync timeout.
    ///
    /// Default: 5 seconds.
    #[must_use]
    pub const fn receive_wait_timeout(mut self, timeout: Duration) -> Self {
        self.receive_wait_timeout = Some(timeout);
        self
    }

    /// Set the security protocol for producers and consumers.
    ///
    /// Default: [`SecurityProtocol::Plaintext`].
    #[must_use]
    pub fn security(mut self, security: SecurityProtocol) -> Self {
        self.security = Some(security);
        self
    }

    /// Set the delivery buffer size for subscriptions.
    ///
    /// # Panics
    ///
    /// Panics if `buffer_size` is 0.
    #[must_use]
    pub fn buffer_size(mut self, buffer_size: usize) -> Self {
        assert!(buffer_size > 0, "buffer_size must be greater than 0");
        self.buffer_size = Some(buffer_size);
        self
    }

    /// Set the auto offset reset policy for new consumer groups:
    /// "earliest", "latest", or "error".
    ///
    /// Default: "latest".
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Build the [`KafkaMessageBus`].
    ///
    /// # Errors
    ///
    /// Returns [`BusError::ConnectionFailed`] if brokers are not set or the
    /// producer cannot be created.
    pub fn build(self) -> Result<KafkaMessageBus, BusError> {
        let brokers = self
            .brokers
            .ok_or_else(|| BusError::ConnectionFailed("Brokers not configured".to_string()))?;
        let security = self.security.unwrap_or_default();

        let mut producer_config = ClientConfig::new();
        producer_config
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", "5000")
            .set("acks", self.producer_acks.as_deref().unwrap_or("1"))
            .set(
                "compression.type",
                self.compression.as_deref().unwrap_or("none"),
            );
        apply_security(&mut producer_config, &security);

        let producer: FutureProducer = producer_config
            .create()
            .map_err(|e| BusError::ConnectionFailed(format!("Failed to create producer: {e}")))?;

        let group_id = self
            .group_id
            .unwrap_or_else(|| "cbq-gateway".to_string());

        tracing::info!(
            brokers = %brokers,
            group_id = %group_id,
            acks = self.producer_acks.as_deref().unwrap_or("1"),
            buffer_size = self.buffer_size.unwrap_or(1000),
            auto_offset_reset = self.auto_offset_reset.as_deref().unwrap_or("latest"),
            "KafkaMessageBus created"
        );

        Ok(KafkaMessageBus {
            producer,
            brokers,
            send_timeout: self.send_timeout.unwrap_or(Duration::from_secs(5)),
            group_id,
            receive_wait_timeout: self
                .receive_wait_timeout
                .unwrap_or(Duration::from_secs(5)),
            security,
            buffer_size: self.buffer_size.unwrap_or(1000),
            auto_offset_reset: self
                .auto_offset_reset
                .unwrap_or_else(|| "latest".to_string()),
        })
    }
}

/// Expand a [`SecurityProtocol`] onto a librdkafka client configuration.
fn apply_security(config: &mut ClientConfig, security: &SecurityProtocol) {
    for (key, value) in security.librdkafka_pairs() {
        config.set(key, value);
    }
}

impl MessageBus for KafkaMessageBus {
    fn publish(
        &self,
        topic: &str,
        payload: &[u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), BusError>> + Send + '_>> {
        // Clone data before moving into the async block
        let topic = topic.to_string();
        let payload = payload.to_vec();
        let send_timeout = self.send_timeout;

        Box::pin(async move {
            // Commands carry no partition key: the gateway guarantees no
            // ordering between concurrently submitted commands.
            let record = FutureRecord::<(), _>::to(&topic).payload(&payload);

            let send_result = self
                .producer
                .send(record, Timeout::After(send_timeout))
                .await;

            match send_result {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        topic = %topic,
                        partition = partition,
                        offset = offset,
                        bytes = payload.len(),
                        "Message published"
                    );
                    Ok(())
                },
                Err((kafka_error, _)) => {
                    tracing::error!(
                        topic = %topic,
                        error = %kafka_error,
                        "Failed to publish message"
                    );
                    Err(BusError::PublishFailed {
                        topic,
                        reason: kafka_error.to_string(),
                    })
                },
            }
        })
    }

    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<MessageStream, BusError>> + Send + '_>> {
        // Clone configuration before moving into the async block
        let topics: Vec<String> = topics.iter().map(|s| (*s).to_string()).collect();
        let brokers = self.brokers.clone();
        let group_id = self.group_id.clone();
        let security = self.security.clone();
        let buffer_size = self.buffer_size;
        let auto_offset_reset = self.auto_offset_reset.clone();
        let receive_wait_ms = self.receive_wait_timeout.as_millis().to_string();

        Box::pin(async move {
            // Manual commit for at-least-once delivery
            let mut consumer_config = ClientConfig::new();
            consumer_config
                .set("bootstrap.servers", &brokers)
                .set("group.id", &group_id)
                .set("enable.auto.commit", "false")
                .set("auto.offset.reset", &auto_offset_reset)
                .set("fetch.wait.max.ms", &receive_wait_ms)
                .set("session.timeout.ms", "6000")
                .set("enable.partition.eof", "false");
            apply_security(&mut consumer_config, &security);

            let consumer: StreamConsumer =
                consumer_config
                    .create()
                    .map_err(|e| BusError::SubscriptionFailed {
                        topics: topics.clone(),
                        reason: format!("Failed to create consumer: {e}"),
                    })?;

            let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
            consumer
                .subscribe(&topic_refs)
                .map_err(|e| BusError::SubscriptionFailed {
                    topics: topics.clone(),
                    reason: format!("Failed to subscribe to topics: {e}"),
                })?;

            tracing::info!(
                topics = ?topics,
                group_id = %group_id,
                buffer_size = buffer_size,
                manual_commit = true,
                "Subscribed to topics"
            );

            // Channel between the consumer task and the subscriber stream.
            let (tx, rx) = tokio::sync::mpsc::channel(buffer_size);

            // Spawn a task that owns the consumer and forwards deliveries.
            tokio::spawn(async move {
                use futures::StreamExt;
                use rdkafka::consumer::CommitMode;

                let mut stream = consumer.stream();

                while let Some(msg_result) = stream.next().await {
                    match msg_result {
                        Ok(message) => {
                            let delivery_result = match message.payload() {
                                Some(payload) => {
                                    tracing::trace!(
                                        topic = message.topic(),
                                        partition = message.partition(),
                                        offset = message.offset(),
                                        bytes = payload.len(),
                                        "Received message"
                                    );
                                    Ok(Delivery::new(message.topic(), payload.to_vec()))
                                },
                                None => Err(BusError::TransportError(
                                    "Message has no payload".to_string(),
                                )),
                            };

                            // Only commit AFTER successful send to the channel:
                            // crash before commit means redelivery, never loss.
                            if tx.send(delivery_result).await.is_err() {
                                tracing::debug!("Subscriber dropped, exiting consumer task");
                                break; // Exit WITHOUT committing
                            }

                            if let Err(e) = consumer.commit_message(&message, CommitMode::Async) {
                                tracing::warn!(
                                    topic = message.topic(),
                                    partition = message.partition(),
                                    offset = message.offset(),
                                    error = %e,
                                    "Failed to commit offset (message may be redelivered)"
                                );
                                // Keep consuming; duplicates are safe upstream.
                            }
                        },
                        Err(e) => {
                            let err =
                                BusError::TransportError(format!("Failed to receive message: {e}"));
                            if tx.send(Err(err)).await.is_err() {
                                break; // Subscriber dropped
                            }
                        },
                    }
                }

                tracing::debug!("Consumer task exiting");
            });

            let stream = async_stream::stream! {
                let mut rx = rx;
                while let Some(result) = rx.recv().await {
                    yield result;
                }
            };

            Ok(Box::pin(stream) as MessageStream)
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;

    #[test]
    fn kafka_message_bus_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<KafkaMessageBus>();
        assert_sync::<KafkaMessageBus>();
    }

    #[test]
    fn builder_requires_brokers() {
        let result = KafkaMessageBus::builder().build();
        assert!(matches!(result, Err(BusError::ConnectionFailed(_))));
    }

    #[test]
    fn apply_security_sets_sasl_keys() {
        let mut config = ClientConfig::new();
        apply_security(
            &mut config,
            &SecurityProtocol::SaslSsl {
                username: "alice".to_string(),
                password: "s3cret".to_string(),
            },
        );

        assert_eq!(config.get("security.protocol"), Some("sasl_ssl"));
        assert_eq!(config.get("sasl.username"), Some("alice"));
        assert_eq!(config.get("sasl.password"), Some("s3cret"));
    }

    #[test]
    fn from_profile_uses_profile_connection_settings() {
        let profile = BrokerProfile {
            brokers: "broker-1:9092,broker-2:9092".to_string(),
            group_id: "orders".to_string(),
            ..BrokerProfile::default()
        };

        let bus = KafkaMessageBus::from_profile(&profile).expect("bus should build");
        assert_eq!(bus.brokers(), "broker-1:9092,broker-2:9092");
        assert_eq!(bus.group_id, "orders");
    }
}
