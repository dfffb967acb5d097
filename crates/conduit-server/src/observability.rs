//! Observability collector.
//!
//! Thin, additive layer over the `metrics` facade and `tracing`. Recording
//! never fails and never influences control flow: with no recorder
//! installed every call is a no-op.

use std::time::Duration;

use conduit_core::{DisconnectReason, EvictionReason, RejectReason};
use metrics::{counter, gauge, histogram};
use tracing::{debug, info, warn};

use crate::backpressure::{BreakerState, PublishOutcome};
use crate::metrics as names;

/// Which way a message travelled through the gateway.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Client to bus.
    Inbound,
    /// Bus to client.
    Outbound,
}

impl Direction {
    /// Metric label value.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }
}

/// Records connection and message lifecycle events.
#[derive(Clone, Debug, Default)]
pub struct Observer;

impl Observer {
    /// Create a collector.
    pub fn new() -> Self {
        Self
    }

    /// A connection was accepted.
    pub fn record_connection_opened(&self, channel: &str) {
        counter!(names::CONNECTIONS_OPENED_TOTAL, "channel" => channel.to_owned()).increment(1);
        gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
    }

    /// An accepted connection ended after `lifetime`.
    pub fn record_connection_closed(&self, reason: DisconnectReason, lifetime: Duration) {
        counter!(names::CONNECTIONS_CLOSED_TOTAL, "reason" => reason.as_str()).increment(1);
        gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
        histogram!(names::CONNECTION_DURATION_SECONDS).record(lifetime.as_secs_f64());
    }

    /// A handshake was refused.
    pub fn record_rejected(&self, reason: RejectReason) {
        counter!(names::CONNECTIONS_REJECTED_TOTAL, "reason" => reason.as_str()).increment(1);
        info!(reason = reason.as_str(), "connection rejected");
    }

    /// A message was handled in `latency`.
    pub fn record_message(&self, direction: Direction, latency: Duration) {
        counter!(names::MESSAGES_TOTAL, "direction" => direction.as_str()).increment(1);
        histogram!(names::MESSAGE_LATENCY_MS, "direction" => direction.as_str())
            .record(latency.as_secs_f64() * 1000.0);
    }

    /// Outcome of one backpressure-managed publish.
    pub fn record_publish(&self, channel: &str, outcome: PublishOutcome) {
        counter!(
            names::PUBLISH_OUTCOMES_TOTAL,
            "channel" => channel.to_owned(),
            "outcome" => outcome.as_str()
        )
        .increment(1);
    }

    /// A channel's breaker changed state.
    pub fn record_circuit_transition(&self, channel: &str, from: BreakerState, to: BreakerState) {
        counter!(
            names::CIRCUIT_TRANSITIONS_TOTAL,
            "channel" => channel.to_owned(),
            "from" => from.as_str(),
            "to" => to.as_str()
        )
        .increment(1);
        if to == BreakerState::Open {
            warn!(channel, from = from.as_str(), "circuit breaker opened");
        } else {
            info!(channel, from = from.as_str(), to = to.as_str(), "circuit breaker transition");
        }
    }

    /// A queued or queueable message was dropped.
    pub fn record_queue_drop(&self, channel: &str, reason: &'static str) {
        counter!(
            names::QUEUE_DROPS_TOTAL,
            "channel" => channel.to_owned(),
            "reason" => reason
        )
        .increment(1);
        warn!(channel, reason, "queued message dropped");
    }

    /// A connection was evicted.
    pub fn record_eviction(&self, reason: EvictionReason) {
        counter!(names::EVICTIONS_TOTAL, "reason" => reason.as_str()).increment(1);
    }

    /// A registry call failed and the gateway continued local-only.
    pub fn record_registry_degraded(&self, operation: &'static str) {
        counter!(names::REGISTRY_DEGRADED_TOTAL, "operation" => operation).increment(1);
    }

    /// A connection's reply subscription ended while it was still open.
    /// `resubscribed` says whether a fresh subscription replaced it.
    pub fn record_reply_subscription_lost(&self, resubscribed: bool) {
        let outcome = if resubscribed { "resubscribed" } else { "closed" };
        counter!(names::REPLY_SUBSCRIPTIONS_LOST_TOTAL, "outcome" => outcome).increment(1);
        warn!(outcome, "reply subscription lost");
    }

    /// An outbound frame could not be queued for a connection.
    pub fn record_outbound_drop(&self) {
        counter!(names::OUTBOUND_DROPS_TOTAL).increment(1);
        debug!("outbound frame dropped");
    }
}
