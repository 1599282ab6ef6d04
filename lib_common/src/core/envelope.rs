//! # Broadcast Envelope
//!
//! Every server→client message travels inside the same small JSON envelope:
//!
//! ```json
//! {"type": "welcome", "data": "Connected to the live update service", "timestamp": "2026-01-01T00:00:00Z"}
//! ```
//!
//! `user_id` is present only when the producer attributes the message to a
//! caller. The payload is opaque to the hub.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Envelope kind used for the one-time greeting pushed on registration.
pub const KIND_WELCOME: &str = "welcome";
/// Envelope kind carrying a [`StreamUpdate`].
pub const KIND_STREAM_UPDATE: &str = "stream_update";

/// # Envelope
///
/// The unit handed to [`Hub::broadcast`](crate::core::hub::Hub::broadcast).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Message kind, serialized as `type`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Opaque payload, serialized as `data`.
    #[serde(rename = "data", default)]
    pub payload: Value,
    /// Producer timestamp.
    #[serde(default = "chrono::Utc::now")]
    pub timestamp: DateTime<Utc>,
    /// Caller the message is attributed to, serialized as `user_id`.
    #[serde(rename = "user_id", default, skip_serializing_if = "Option::is_none")]
    pub caller_identity: Option<String>,
}

impl Envelope {
    /// Builds an envelope stamped with the current time.
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
            timestamp: Utc::now(),
            caller_identity: None,
        }
    }

    /// Attributes the envelope to a caller.
    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.caller_identity = Some(identity.into());
        self
    }

    /// The greeting a session receives right after it is registered.
    pub fn welcome(text: &str) -> Self {
        Self::new(KIND_WELCOME, Value::String(text.to_string()))
    }

    /// Wraps a streaming query update.
    pub fn stream_update(update: &StreamUpdate) -> Self {
        let payload = serde_json::to_value(update).unwrap_or(Value::Null);
        Self::new(KIND_STREAM_UPDATE, payload)
    }

    /// Serializes the envelope for the wire.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Progress state of a streamed query response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamStatus {
    /// More content follows.
    Streaming,
    /// Final chunk.
    Complete,
    /// The query failed; `content` holds the reason.
    Error,
}

/// Incremental result of a gateway query, relayed to socket clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamUpdate {
    /// Gateway request the update belongs to.
    pub request_id: String,
    /// Content chunk.
    pub content: String,
    /// Progress state.
    pub status: StreamStatus,
}
