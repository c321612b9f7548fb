//! Axum gateway controller for the CBQ gateway.
//!
//! This crate is the externally-facing entry point: it derives an axum
//! router from the handler registry and renders every outcome as a
//! structured JSON body. The controller itself holds no business logic:
//! command routes delegate to the correlation engine, query routes invoke
//! their handler directly in-process.
//!
//! # Request Flow
//!
//! 1. **HTTP request** arrives at a route derived from a registry entry
//! 2. **Parse** the JSON body (an absent body becomes an empty object)
//! 3. **Dispatch**: command entries go through
//!    [`CorrelationEngine::submit`](cbq_gateway::CorrelationEngine::submit),
//!    query entries run in-process
//! 4. **Render**: success becomes `{"success": true, "data": ...}`, every
//!    failure becomes `{"error": message, "code": ...}`. No raw stack
//!    trace ever reaches the caller, and a sync timeout is distinguishable
//!    by its `SYNC_TIMEOUT` code
//!
//! # Example
//!
//! ```rust,ignore
//! use cbq_web::{AppState, build_router};
//!
//! let state = AppState::new(engine, registry);
//! let app = build_router(state);
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//! axum::serve(listener, app).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod state;

// Re-export key types for convenience
pub use error::ApiOutcome;
pub use handlers::gateway::build_router;
pub use middleware::{REQUEST_ID_HEADER, request_id_layer};
pub use state::AppState;
