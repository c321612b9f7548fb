//! Command and response envelopes carried over the broker.
//!
//! Envelopes are the serialized message units of the CBQ protocol. A
//! [`CommandEnvelope`] is published by the correlation engine when a caller
//! submits an operation; a [`ResponseEnvelope`] is published back by the
//! dispatcher once the bound handler has run. Both are immutable once
//! published and correlate through a shared [`Uuid`].
//!
//! # Wire Format
//!
//! Envelopes cross the broker as JSON documents so that consumers written in
//! other languages can participate. The codec is symmetric:
//! `from_bytes(to_bytes(e)) == e`.
//!
//! # Example
//!
//! ```
//! use cbq_core::envelope::{CommandEnvelope, ResponseEnvelope};
//! use serde_json::json;
//! use uuid::Uuid;
//!
//! let command = CommandEnvelope::new(
//!     Uuid::new_v4(),
//!     "cmd.public.products.create.v1",
//!     json!({ "name": "Widget", "price": 9.99 }),
//!     "cbq.replies",
//! );
//!
//! let bytes = command.to_bytes().unwrap();
//! let decoded = CommandEnvelope::from_bytes(&bytes).unwrap();
//! assert_eq!(decoded.correlation_id, command.correlation_id);
//!
//! let response = ResponseEnvelope::ok(command.correlation_id, json!({ "id": 1 }));
//! assert!(response.success);
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Error types for envelope encoding and decoding.
#[derive(Error, Debug)]
pub enum EnvelopeError {
    /// Failed to serialize an envelope to bytes.
    #[error("Failed to encode envelope: {0}")]
    EncodeError(String),

    /// Failed to deserialize an envelope from bytes.
    #[error("Failed to decode envelope: {0}")]
    DecodeError(String),
}

/// A command published onto the broker on behalf of a synchronous caller.
///
/// The `correlation_id` links the command to the [`ResponseEnvelope`] a
/// downstream consumer will eventually publish to `reply_topic`. Operation
/// names follow the `{group}.{domain}.{entity}.{action}.{version}` convention
/// of the registry, e.g. `cmd.public.products.create.v1`; the leading group
/// segment selects the command topic.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    /// Unique token correlating this command with its eventual response.
    pub correlation_id: Uuid,

    /// The logical operation name resolved against the registry.
    pub operation: String,

    /// Caller-supplied payload, passed to the handler unchanged.
    pub payload: serde_json::Value,

    /// When the command was published.
    pub issued_at: DateTime<Utc>,

    /// Topic the dispatcher must publish the response envelope to.
    pub reply_topic: String,
}

impl CommandEnvelope {
    /// Create a new command envelope stamped with the current time.
    #[must_use]
    pub fn new(
        correlation_id: Uuid,
        operation: impl Into<String>,
        payload: serde_json::Value,
        reply_topic: impl Into<String>,
    ) -> Self {
        Self {
            correlation_id,
            operation: operation.into(),
            payload,
            issued_at: Utc::now(),
            reply_topic: reply_topic.into(),
        }
    }

    /// Encode this envelope to its JSON wire format.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::EncodeError`] if serialization fails. This is
    /// rare with JSON and indicates a non-serializable payload value.
    pub fn to_bytes(&self) -> Result<Vec<u8>, EnvelopeError> {
        serde_json::to_vec(self).map_err(|e| EnvelopeError::EncodeError(e.to_string()))
    }

    /// Decode an envelope from its JSON wire format.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::DecodeError`] if the bytes are not a valid
    /// command envelope. Malformed broker messages are expected in an
    /// at-least-once world and must be handled by dropping, not crashing.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        serde_json::from_slice(bytes).map_err(|e| EnvelopeError::DecodeError(e.to_string()))
    }
}

impl fmt::Display for CommandEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CommandEnvelope {{ operation: {}, correlation_id: {} }}",
            self.operation, self.correlation_id
        )
    }
}

/// The outcome of a dispatched command, published to the command's
/// `reply_topic`.
///
/// Exactly one of `data` (success) or `error` (failure) is populated. The
/// error is a flattened message string: handler failures are always converted
/// to this shape on the dispatcher side, never propagated as transport
/// failures.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    /// Correlation id of the originating command.
    pub correlation_id: Uuid,

    /// Whether the handler completed successfully.
    pub success: bool,

    /// Handler result data, present when `success` is true.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,

    /// Flattened error message, present when `success` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// When the handler finished.
    pub completed_at: DateTime<Utc>,
}

impl ResponseEnvelope {
    /// Create a successful response carrying the handler's result data.
    #[must_use]
    pub fn ok(correlation_id: Uuid, data: serde_json::Value) -> Self {
        Self {
            correlation_id,
            success: true,
            data: Some(data),
            error: None,
            completed_at: Utc::now(),
        }
    }

    /// Create a failed response carrying a flattened error message.
    #[must_use]
    pub fn fail(correlation_id: Uuid, error: impl Into<String>) -> Self {
        Self {
            correlation_id,
            success: false,
            data: None,
            error: Some(error.into()),
            completed_at: Utc::now(),
        }
    }

    /// Encode this envelope to its JSON wire format.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::EncodeError`] if serialization fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, EnvelopeError> {
        serde_json::to_vec(self).map_err(|e| EnvelopeError::EncodeError(e.to_string()))
    }

    /// Decode an envelope from its JSON wire format.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::DecodeError`] if the bytes are not a valid
    /// response envelope.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        serde_json::from_slice(bytes).map_err(|e| EnvelopeError::DecodeError(e.to_string()))
    }
}

impl fmt::Display for ResponseEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ResponseEnvelope {{ correlation_id: {}, success: {} }}",
            self.correlation_id, self.success
        )
    }
}
