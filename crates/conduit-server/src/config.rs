//! Runtime configuration for one gateway instance.
//!
//! [`GatewayConfig`] is the resolved, typed view of [`ConduitSettings`]: all
//! durations are `Duration`s and the instance ID is fixed.

use std::time::Duration;

use conduit_core::InstanceId;
use conduit_settings::ConduitSettings;

/// Per-channel backpressure tuning.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackpressureConfig {
    /// Capacity of each channel's deferred queue.
    pub queue_max_size: usize,
    /// Consecutive failures that open a channel's breaker.
    pub failure_threshold: u32,
    /// Time an open breaker waits before admitting a trial attempt.
    pub recovery_timeout: Duration,
    /// Re-attempts of one queued message before it is dropped.
    pub max_attempts: u32,
    /// Pause between drain passes after a failed re-attempt.
    pub drain_interval: Duration,
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        Self::from_settings(&ConduitSettings::default())
    }
}

impl BackpressureConfig {
    /// Resolve from loaded settings.
    pub fn from_settings(settings: &ConduitSettings) -> Self {
        Self {
            queue_max_size: settings.queue_max_size,
            failure_threshold: settings.circuit_failure_threshold,
            recovery_timeout: settings.circuit_recovery_timeout(),
            max_attempts: settings.backpressure.queue_max_attempts,
            drain_interval: Duration::from_millis(settings.backpressure.drain_interval_ms),
        }
    }
}

/// Configuration for one gateway instance.
#[derive(Clone, Debug)]
pub struct GatewayConfig {
    /// Host to bind.
    pub host: String,
    /// Port to bind (`0` picks a free port).
    pub port: u16,
    /// This instance's identity on the bus and in the registry.
    pub instance_id: InstanceId,
    /// Interval between server pings.
    pub heartbeat_interval: Duration,
    /// Bounded wait for a pong after each ping.
    pub heartbeat_timeout: Duration,
    /// Heartbeat silence after which the sweep evicts; also the registry TTL.
    pub max_idle_time: Duration,
    /// Interval between eviction sweeps.
    pub sweep_interval: Duration,
    /// Connections this instance will hold.
    pub max_connections: usize,
    /// Connections one user may hold on this instance.
    pub max_connections_per_identity: usize,
    /// Largest inbound frame in bytes.
    pub max_message_size: usize,
    /// Capacity of each connection's outbound frame queue.
    pub outbound_queue_size: usize,
    /// Dropped outbound frames tolerated before a slow consumer is evicted.
    pub max_dropped_messages: u64,
    /// Deadline for draining tasks at shutdown.
    pub shutdown_timeout: Duration,
    /// Channel for envelopes that name none, and for new connections.
    pub default_channel: String,
    /// Channel names and `*`-suffixed prefixes clients may address.
    pub allowed_channels: Vec<String>,
    /// Accepted `Origin` header values; empty accepts any.
    pub allowed_origins: Vec<String>,
    /// Inbound messages per second per connection.
    pub max_messages_per_second: usize,
    /// Inbound messages per minute per connection.
    pub max_messages_per_minute: usize,
    /// Deadline for one session validation call.
    pub validator_timeout: Duration,
    /// Backpressure tuning.
    pub backpressure: BackpressureConfig,
}

impl GatewayConfig {
    /// Resolve from loaded settings. A missing instance ID is generated.
    pub fn from_settings(settings: &ConduitSettings) -> Self {
        let server = &settings.server;
        Self {
            host: server.host.clone(),
            port: server.port,
            instance_id: server
                .instance_id
                .clone()
                .map_or_else(InstanceId::new, InstanceId::from),
            heartbeat_interval: settings.heartbeat_interval(),
            heartbeat_timeout: Duration::from_secs(settings.heartbeat.heartbeat_timeout_seconds),
            max_idle_time: settings.max_idle_time(),
            sweep_interval: settings.eviction_sweep_interval(),
            max_connections: server.max_connections,
            max_connections_per_identity: server.max_connections_per_identity,
            max_message_size: server.max_message_size,
            outbound_queue_size: server.outbound_queue_size,
            max_dropped_messages: server.max_dropped_messages,
            shutdown_timeout: Duration::from_secs(server.shutdown_timeout_seconds),
            default_channel: settings.channels.default_channel.clone(),
            allowed_channels: settings.channels.allowed.clone(),
            allowed_origins: server.allowed_origins.clone(),
            max_messages_per_second: settings.rate_limit.max_messages_per_second,
            max_messages_per_minute: settings.rate_limit.max_messages_per_minute,
            validator_timeout: settings.validator.timeout(),
            backpressure: BackpressureConfig::from_settings(settings),
        }
    }

    /// Whether an upgrade carrying `origin` may proceed.
    ///
    /// With an allow-list configured, a missing or unlisted origin is refused.
    pub fn origin_allowed(&self, origin: Option<&str>) -> bool {
        self.allowed_origins.is_empty()
            || origin.is_some_and(|o| self.allowed_origins.iter().any(|allowed| allowed == o))
    }

    /// `host:port` for binding.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for GatewayConfig {
    /// Settings defaults, bound to `127.0.0.1:0`.
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            ..Self::from_settings(&ConduitSettings::default())
        }
    }
}
