//! Application state for gateway routes.

use cbq_gateway::{CorrelationEngine, HandlerRegistry};
use std::sync::Arc;

/// State shared across all gateway routes.
///
/// Both members are constructed once at startup and injected here; nothing
/// in the controller mutates them.
#[derive(Clone)]
pub struct AppState {
    /// The correlation engine command routes submit through.
    pub engine: Arc<CorrelationEngine>,
    /// The frozen handler registry the router is derived from.
    pub registry: Arc<HandlerRegistry>,
}

impl AppState {
    /// Create a new application state.
    #[must_use]
    pub const fn new(engine: Arc<CorrelationEngine>, registry: Arc<HandlerRegistry>) -> Self {
        Self { engine, registry }
    }
}
