//! `/health` endpoint.

use serde::Serialize;
use tokio::time::Instant;

/// Reachability of each external dependency.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct DependencyHealth {
    /// Pub/sub bus.
    pub bus: bool,
    /// Connection registry.
    pub registry: bool,
    /// Session validator.
    pub validator: bool,
}

impl DependencyHealth {
    /// Whether the instance can accept and route connections.
    ///
    /// The registry is not required: the gateway degrades to local-only
    /// counts while it is down.
    pub fn is_ready(&self) -> bool {
        self.bus && self.validator
    }
}

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `"ready"` or `"not_ready"`.
    pub status: &'static str,
    /// Per-dependency reachability.
    pub dependencies: DependencyHealth,
    /// This instance.
    pub instance_id: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Connections held by this instance.
    pub connections: usize,
}

impl HealthResponse {
    /// Whether `/health` should answer 200.
    pub fn is_ready(&self) -> bool {
        self.dependencies.is_ready()
    }
}

/// Build a health response from live state.
pub fn health_check(
    start_time: Instant,
    instance_id: impl Into<String>,
    dependencies: DependencyHealth,
    connections: usize,
) -> HealthResponse {
    HealthResponse {
        status: if dependencies.is_ready() { "ready" } else { "not_ready" },
        dependencies,
        instance_id: instance_id.into(),
        uptime_secs: start_time.elapsed().as_secs(),
        connections,
    }
}
