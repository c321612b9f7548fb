//! # CBQ Testing
//!
//! Testing utilities for the CBQ gateway.
//!
//! The centerpiece is [`InMemoryMessageBus`], an in-process [`MessageBus`]
//! with the same publish/subscribe contract as the Kafka transport but with
//! no broker, no network, and deterministic delivery. It lets the
//! correlation engine and dispatcher be exercised end-to-end at memory
//! speed, including the at-least-once quirks the gateway must tolerate:
//! duplicate deliveries can be simulated by publishing the same payload
//! twice.
//!
//! ## Example
//!
//! ```
//! use cbq_testing::InMemoryMessageBus;
//! use cbq_core::bus::MessageBus;
//! use futures::StreamExt;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let bus = InMemoryMessageBus::new();
//!
//! let mut stream = bus.subscribe(&["cmd"]).await.unwrap();
//! bus.publish("cmd", b"hello").await.unwrap();
//!
//! let delivery = stream.next().await.unwrap().unwrap();
//! assert_eq!(delivery.payload, b"hello");
//! # }
//! ```

use cbq_core::bus::{BusError, Delivery, MessageBus, MessageStream};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

type Subscribers = HashMap<String, Vec<mpsc::Sender<Result<Delivery, BusError>>>>;

/// In-memory [`MessageBus`] for tests.
///
/// Every subscriber of a topic receives every message published to it after
/// the subscription was created (fan-out, like independent consumer groups).
/// Delivery order per topic matches publish order; there is no cross-topic
/// ordering, matching the production transport.
#[derive(Clone)]
pub struct InMemoryMessageBus {
    subscribers: Arc<Mutex<Subscribers>>,
    buffer_size: usize,
}

impl Default for InMemoryMessageBus {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryMessageBus {
    /// Create a new empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(HashMap::new())),
            buffer_size: 64,
        }
    }

    /// Number of live subscriptions on a topic. Useful for asserting that
    /// consumption loops have started before publishing in tests.
    ///
    /// # Panics
    ///
    /// Panics if the subscriber lock is poisoned (a test task panicked while
    /// holding it).
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn subscriber_count(&self, topic: &str) -> usize {
        let map = self
            .subscribers
            .lock()
            .expect("subscriber lock poisoned - a test task panicked while holding it");
        map.get(topic).map_or(0, Vec::len)
    }
}

impl MessageBus for InMemoryMessageBus {
    fn publish(
        &self,
        topic: &str,
        payload: &[u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), BusError>> + Send + '_>> {
        let topic = topic.to_string();
        let payload = payload.to_vec();

        Box::pin(async move {
            // Snapshot senders under the lock, deliver outside it.
            #[allow(clippy::expect_used)]
            let senders: Vec<_> = {
                let mut map = self
                    .subscribers
                    .lock()
                    .expect("subscriber lock poisoned - a test task panicked while holding it");
                if let Some(list) = map.get_mut(&topic) {
                    list.retain(|tx| !tx.is_closed());
                    list.clone()
                } else {
                    Vec::new()
                }
            };

            tracing::trace!(topic = %topic, subscribers = senders.len(), "In-memory publish");

            for tx in senders {
                // A dropped subscriber mid-send is not a publish failure.
                let _ = tx.send(Ok(Delivery::new(topic.clone(), payload.clone()))).await;
            }
            Ok(())
        })
    }

    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<MessageStream, BusError>> + Send + '_>> {
        let topics: Vec<String> = topics.iter().map(|s| (*s).to_string()).collect();
        let buffer_size = self.buffer_size;

        Box::pin(async move {
            let (tx, rx) = mpsc::channel(buffer_size);

            #[allow(clippy::expect_used)]
            {
                let mut map = self
                    .subscribers
                    .lock()
                    .expect("subscriber lock poisoned - a test task panicked while holding it");
                for topic in &topics {
                    map.entry(topic.clone()).or_default().push(tx.clone());
                }
            }

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
