//! Wire-level message envelope.
//!
//! Clients send JSON objects of the form
//! `{"channel": string, "intent": string, "payload": object, "correlation_id": string|null}`.
//! Unknown fields are ignored and a missing `channel` falls back to the
//! gateway's configured default channel.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::EnvelopeError;

/// An immutable routed message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    /// Logical destination, e.g. `"guide"` or `"pillar:content"`.
    pub channel: String,
    /// Free-form operation tag.
    pub intent: String,
    /// Opaque application payload.
    pub payload: Value,
    /// Caller-supplied correlation token echoed on replies and nacks.
    pub correlation_id: Option<String>,
}

#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(default)]
    channel: Option<String>,
    intent: Option<String>,
    #[serde(default)]
    payload: Option<Value>,
    #[serde(default)]
    correlation_id: Option<String>,
}

impl MessageEnvelope {
    /// Build an envelope with an empty payload.
    pub fn new(channel: impl Into<String>, intent: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            intent: intent.into(),
            payload: Value::Object(Map::new()),
            correlation_id: None,
        }
    }

    /// Attach a payload.
    #[must_use]
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    /// Attach a correlation ID.
    #[must_use]
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Parse a text frame, substituting `default_channel` when the frame
    /// omits `channel`.
    pub fn parse(text: &str, default_channel: &str) -> Result<Self, EnvelopeError> {
        let raw: RawEnvelope =
            serde_json::from_str(text).map_err(|e| EnvelopeError::Malformed(e.to_string()))?;

        let intent = raw
            .intent
            .filter(|i| !i.is_empty())
            .ok_or(EnvelopeError::MissingField("intent"))?;

        let channel = match raw.channel {
            Some(c) if !c.is_empty() => c,
            _ => default_channel.to_owned(),
        };

        let payload = match raw.payload {
            None | Some(Value::Null) => Value::Object(Map::new()),
            Some(v @ Value::Object(_)) => v,
            Some(_) => return Err(EnvelopeError::PayloadNotObject),
        };

        Ok(Self {
            channel,
            intent,
            payload,
            correlation_id: raw.correlation_id,
        })
    }
}
