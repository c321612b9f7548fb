//! # CBQ Gateway
//!
//! The synchronous request/response layer over an asynchronous broker.
//!
//! Three components cooperate to give callers a blocking request/response
//! contract on top of fire-and-forget messaging:
//!
//! - [`HandlerRegistry`]: maps logical operation names and HTTP routes to
//!   handler bindings. Built once at startup, immutable afterwards.
//! - [`CorrelationEngine`]: publishes a command envelope per submission and
//!   parks the caller on a per-call rendezvous until the correlated response
//!   arrives or the sync timeout elapses.
//! - [`Dispatcher`]: the consumer side. Subscribes to the command topics,
//!   executes the bound handler for each delivered command, and publishes the
//!   outcome back to the command's reply topic.
//!
//! In a single-process deployment all three run side by side over one
//! [`cbq_core::MessageBus`]; in a distributed one, the dispatcher runs in the
//! consumer service and only the broker connects the two halves.
//!
//! ## Example
//!
//! ```rust,ignore
//! use cbq_gateway::{CorrelationEngine, Dispatcher, RegistryBuilder};
//! use cbq_core::{config::BrokerProfile, handler_fn};
//! use std::sync::Arc;
//!
//! let mut builder = RegistryBuilder::new();
//! builder.register_command(
//!     "cmd.public.products.create.v1",
//!     http::Method::POST,
//!     "/public/products",
//!     handler_fn(create_product),
//! )?;
//! let registry = Arc::new(builder.build());
//!
//! let profile = BrokerProfile::from_env()?;
//! let engine = CorrelationEngine::new(Arc::clone(&bus), &profile);
//! engine.start().await?;
//! Dispatcher::new(bus, registry, &profile).start().await?;
//!
//! let data = engine.submit("cmd.public.products.create.v1", payload).await?;
//! ```

// Re-export commonly used types
pub use correlation::CorrelationEngine;
pub use dispatcher::Dispatcher;
pub use error::GatewayError;
pub use registry::{Binding, HandlerRegistry, RegistryBuilder, RegistryEntry};

pub mod correlation;
pub mod dispatcher;
pub mod error;
pub mod registry;
