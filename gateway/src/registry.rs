//! Handler registry: operation names and routes bound to handlers.
//!
//! The registry is assembled once at process startup through
//! [`RegistryBuilder`] and frozen into a [`HandlerRegistry`]. Registration is
//! explicit, no attribute discovery or reflection: duplicate routes fail the
//! process at startup, before it ever serves a request. After `build()` the
//! registry is read-only and shared behind an `Arc`; reads take no lock.
//!
//! Two binding kinds exist, one per side of the command/query split:
//!
//! - [`Binding::Command`]: routed through the broker and correlation engine;
//!   the handler executes on the dispatcher side.
//! - [`Binding::Query`]: invoked directly in-process by the controller, no
//!   broker round trip.

use crate::error::GatewayError;
use cbq_core::handler::{HandlerFn, HandlerResult};
use http::Method;
use std::collections::HashMap;
use std::sync::Arc;

/// How a registered operation is executed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Binding {
    /// Published to the broker and awaited through the correlation engine.
    Command,
    /// Invoked directly in-process.
    Query,
}

/// One registered operation.
pub struct RegistryEntry {
    /// Logical operation name, e.g. `cmd.public.products.create.v1`.
    pub operation: String,
    /// HTTP method the route answers to.
    pub method: Method,
    /// HTTP path the route answers to.
    pub path: String,
    /// Execution binding.
    pub binding: Binding,
    handler: HandlerFn,
}

impl RegistryEntry {
    /// Execute the bound handler with the given payload.
    pub async fn invoke(&self, payload: serde_json::Value) -> HandlerResult {
        (self.handler)(payload).await
    }
}

impl std::fmt::Debug for RegistryEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryEntry")
            .field("operation", &self.operation)
            .field("method", &self.method)
            .field("path", &self.path)
            .field("binding", &self.binding)
            .finish_non_exhaustive()
    }
}

/// Builder collecting registrations before the registry is frozen.
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    entries: Vec<Arc<RegistryEntry>>,
}

impl RegistryBuilder {
    /// Create an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a broker-routed command operation.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::DuplicateRegistration`] if the operation name
    /// or the `(method, path)` pair is already taken.
    pub fn register_command(
        &mut self,
        operation: impl Into<String>,
        method: Method,
        path: impl Into<String>,
        handler: HandlerFn,
    ) -> Result<&mut Self, GatewayError> {
        self.register(Binding::Command, operation.into(), method, path.into(), handler)
    }

    /// Register a direct in-process query operation.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::DuplicateRegistration`] if the operation name
    /// or the `(method, path)` pair is already taken.
    pub fn register_query(
        &mut self,
        operation: impl Into<String>,
        method: Method,
        path: impl Into<String>,
        handler: HandlerFn,
    ) -> Result<&mut Self, GatewayError> {
        self.register(Binding::Query, operation.into(), method, path.into(), handler)
    }

    fn register(
        &mut self,
        binding: Binding,
        operation: String,
        method: Method,
        path: String,
        handler: HandlerFn,
    ) -> Result<&mut Self, GatewayError> {
        if self.entries.iter().any(|e| e.operation == operation) {
            return Err(GatewayError::DuplicateRegistration(format!(
                "operation '{operation}' is already registered"
            )));
        }
        if self
            .entries
            .iter()
            .any(|e| e.method == method && e.path == path)
        {
            return Err(GatewayError::DuplicateRegistration(format!(
                "route {method} {path} is already registered"
            )));
        }

        tracing::debug!(%operation, %method, %path, ?binding, "Registered handler");

        self.entries.push(Arc::new(RegistryEntry {
            operation,
            method,
            path,
            binding,
            handler,
        }));
        Ok(self)
    }

    /// Freeze the collected registrations into an immutable registry.
    #[must_use]
    pub fn build(self) -> HandlerRegistry {
        let mut routes = HashMap::new();
        let mut operations = HashMap::new();
        for entry in &self.entries {
            routes.insert((entry.method.clone(), entry.path.clone()), Arc::clone(entry));
            operations.insert(entry.operation.clone(), Arc::clone(entry));
        }
        HandlerRegistry {
            entries: self.entries,
            routes,
            operations,
        }
    }
}

/// Immutable registry shared across request handling and dispatch.
pub struct HandlerRegistry {
    entries: Vec<Arc<RegistryEntry>>,
    routes: HashMap<(Method, String), Arc<RegistryEntry>>,
    operations: HashMap<String, Arc<RegistryEntry>>,
}

impl HandlerRegistry {
    /// Resolve an entry by HTTP route.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::NotFound`] if no entry matches.
    pub fn resolve(&self, method: &Method, path: &str) -> Result<Arc<RegistryEntry>, GatewayError> {
        self.routes
            .get(&(method.clone(), path.to_string()))
            .cloned()
            .ok_or_else(|| GatewayError::NotFound {
                method: method.clone(),
                path: path.to_string(),
            })
    }

    /// Resolve an entry by operation name.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::UnroutableCommand`] if no entry matches.
    pub fn resolve_operation(&self, operation: &str) -> Result<Arc<RegistryEntry>, GatewayError> {
        self.operations
            .get(operation)
            .cloned()
            .ok_or_else(|| GatewayError::UnroutableCommand {
                operation: operation.to_string(),
            })
    }

    /// Iterate over all registered entries, in registration order.
    pub fn entries(&self) -> impl Iterator<Item = &Arc<RegistryEntry>> {
        self.entries.iter()
    }

    /// Number of registered entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
