//! Prometheus metrics recorder and `/metrics` rendering.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the handle used to render `/metrics`. Call once at startup,
/// before anything is recorded.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric name constants to avoid typos across modules.

/// Connections accepted (counter, labels: channel).
pub const CONNECTIONS_OPENED_TOTAL: &str = "conduit_connections_opened_total";
/// Connections ended (counter, labels: reason).
pub const CONNECTIONS_CLOSED_TOTAL: &str = "conduit_connections_closed_total";
/// Handshakes refused (counter, labels: reason).
pub const CONNECTIONS_REJECTED_TOTAL: &str = "conduit_connections_rejected_total";
/// Locally held connections (gauge).
pub const CONNECTIONS_ACTIVE: &str = "conduit_connections_active";
/// Connection lifetime (histogram).
pub const CONNECTION_DURATION_SECONDS: &str = "conduit_connection_duration_seconds";
/// Messages handled (counter, labels: direction).
pub const MESSAGES_TOTAL: &str = "conduit_messages_total";
/// Per-message handling latency in milliseconds (histogram, labels: direction).
pub const MESSAGE_LATENCY_MS: &str = "conduit_message_latency_ms";
/// Backpressure outcomes (counter, labels: channel, outcome).
pub const PUBLISH_OUTCOMES_TOTAL: &str = "conduit_publish_outcomes_total";
/// Breaker transitions (counter, labels: channel, from, to).
pub const CIRCUIT_TRANSITIONS_TOTAL: &str = "conduit_circuit_transitions_total";
/// Queued messages dropped (counter, labels: channel, reason).
pub const QUEUE_DROPS_TOTAL: &str = "conduit_queue_drops_total";
/// Evictions (counter, labels: reason).
pub const EVICTIONS_TOTAL: &str = "conduit_evictions_total";
/// Registry calls that fell back to local-only operation (counter, labels: operation).
pub const REGISTRY_DEGRADED_TOTAL: &str = "conduit_registry_degraded_total";
/// Outbound frames dropped on a full connection queue (counter).
pub const OUTBOUND_DROPS_TOTAL: &str = "conduit_outbound_drops_total";
/// Reply subscriptions that ended under an open connection (counter, labels: outcome).
pub const REPLY_SUBSCRIPTIONS_LOST_TOTAL: &str = "conduit_reply_subscriptions_lost_total";
