//! Error taxonomy for the gateway.
//!
//! - [`GatewayError`]: the cross-cutting failure classes every component
//!   reports in, each with a fixed handling policy
//! - [`EnvelopeError`]: a client frame that is not a valid envelope
//!
//! Component crates define their own `thiserror` enums and convert into
//! [`GatewayError`] at the gateway boundary.

use thiserror::Error;

use crate::lifecycle::{EvictionReason, RejectReason};

// ─────────────────────────────────────────────────────────────────────────────
// GatewayError
// ─────────────────────────────────────────────────────────────────────────────

/// Failure classes observed by the gateway.
///
/// None of these terminate the process. Per-connection classes close one
/// connection; system-wide classes degrade functionality.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// The handshake was refused and the connection never accepted.
    #[error("connection rejected: {}", reason.as_str())]
    ConnectionRejected {
        /// Why the handshake was refused.
        reason: RejectReason,
    },

    /// The shared connection registry could not be reached.
    #[error("connection registry unavailable: {0}")]
    RegistryUnavailable(String),

    /// The channel's circuit breaker is open; nothing was attempted.
    #[error("circuit open for channel {channel}")]
    CircuitOpen {
        /// Affected channel.
        channel: String,
    },

    /// The channel's deferred queue is at capacity.
    #[error("queue full for channel {channel}")]
    QueueFull {
        /// Affected channel.
        channel: String,
    },

    /// The gateway closed a connection proactively.
    #[error("eviction triggered: {}", reason.as_str())]
    EvictionTriggered {
        /// Why the connection was evicted.
        reason: EvictionReason,
    },

    /// Publishing to the fan-out bus failed.
    #[error("bus publish failed: {0}")]
    BusPublishFailure(String),
}

impl GatewayError {
    /// Whether the error affects only a single connection.
    pub fn is_per_connection(&self) -> bool {
        matches!(
            self,
            Self::ConnectionRejected { .. } | Self::EvictionTriggered { .. }
        )
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// EnvelopeError
// ─────────────────────────────────────────────────────────────────────────────

/// A client frame could not be parsed into an envelope.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvelopeError {
    /// Not a JSON object.
    #[error("malformed JSON: {0}")]
    Malformed(String),
    /// A required field is absent or empty.
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    /// `payload` was present but not an object.
    #[error("payload must be a JSON object")]
    PayloadNotObject,
}
