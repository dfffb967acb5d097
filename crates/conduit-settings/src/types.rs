//! Settings types.
//!
//! The six gateway timing and capacity options live at the top level under
//! their documented names; everything else is grouped by concern. All
//! structs use `#[serde(default)]` so a partial file only overrides what it
//! names.

use std::collections::BTreeMap;
use std::time::Duration;

use conduit_core::Identity;
use serde::{Deserialize, Serialize};

/// Root settings object.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ConduitSettings {
    /// Seconds between server pings on each connection.
    pub heartbeat_interval_seconds: u64,
    /// Seconds without a heartbeat before a connection is evicted; also the
    /// registry entry TTL.
    pub max_idle_time_seconds: u64,
    /// Per-channel deferred queue capacity.
    pub queue_max_size: usize,
    /// Consecutive publish failures that open a channel's circuit.
    pub circuit_failure_threshold: u32,
    /// Seconds an open circuit waits before allowing a trial publish.
    pub circuit_recovery_timeout_seconds: u64,
    /// Seconds between stale-connection sweeps.
    pub eviction_sweep_interval_seconds: u64,
    /// Network and capacity settings.
    pub server: ServerSettings,
    /// Heartbeat settings.
    pub heartbeat: HeartbeatSettings,
    /// Queue drain settings.
    pub backpressure: BackpressureSettings,
    /// Channel naming.
    pub channels: ChannelSettings,
    /// Per-connection inbound rate limits.
    pub rate_limit: RateLimitSettings,
    /// Fan-out bus backend.
    pub bus: BusSettings,
    /// Shared connection registry backend.
    pub registry: RegistrySettings,
    /// Session validator.
    pub validator: ValidatorSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl Default for ConduitSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval_seconds: 30,
            max_idle_time_seconds: 300,
            queue_max_size: 1000,
            circuit_failure_threshold: 5,
            circuit_recovery_timeout_seconds: 30,
            eviction_sweep_interval_seconds: 60,
            server: ServerSettings::default(),
            heartbeat: HeartbeatSettings::default(),
            backpressure: BackpressureSettings::default(),
            channels: ChannelSettings::default(),
            rate_limit: RateLimitSettings::default(),
            bus: BusSettings::default(),
            registry: RegistrySettings::default(),
            validator: ValidatorSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl ConduitSettings {
    /// Heartbeat ping interval.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_seconds)
    }

    /// Max idle time and registry TTL.
    pub fn max_idle_time(&self) -> Duration {
        Duration::from_secs(self.max_idle_time_seconds)
    }

    /// Open-circuit cooldown.
    pub fn circuit_recovery_timeout(&self) -> Duration {
        Duration::from_secs(self.circuit_recovery_timeout_seconds)
    }

    /// Sweep period.
    pub fn eviction_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.eviction_sweep_interval_seconds)
    }
}

/// Network and capacity settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port; `0` picks a free port.
    pub port: u16,
    /// Stable instance ID; generated at startup when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    /// Connections this instance accepts before refusing with `server_at_capacity`.
    pub max_connections: usize,
    /// Connections a single user may hold on this instance.
    pub max_connections_per_identity: usize,
    /// Largest accepted WebSocket frame in bytes.
    pub max_message_size: usize,
    /// Frames buffered per connection before outbound messages are dropped.
    pub outbound_queue_size: usize,
    /// Dropped outbound messages tolerated before a slow client is evicted.
    pub max_dropped_messages: u64,
    /// Seconds to wait for tasks to finish during shutdown.
    pub shutdown_timeout_seconds: u64,
    /// `Origin` header values accepted on the WebSocket upgrade. Empty
    /// accepts any origin, including none.
    pub allowed_origins: Vec<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            instance_id: None,
            max_connections: 10_000,
            max_connections_per_identity: 5,
            max_message_size: 1024 * 1024,
            outbound_queue_size: 256,
            max_dropped_messages: 100,
            shutdown_timeout_seconds: 30,
            allowed_origins: Vec::new(),
        }
    }
}

/// Heartbeat settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatSettings {
    /// Seconds to wait for a pong after each ping.
    pub heartbeat_timeout_seconds: u64,
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            heartbeat_timeout_seconds: 10,
        }
    }
}

/// Queue drain settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BackpressureSettings {
    /// Publish attempts per queued entry before it is dropped.
    pub queue_max_attempts: u32,
    /// Milliseconds between drain passes while a queue is non-empty.
    pub drain_interval_ms: u64,
}

impl Default for BackpressureSettings {
    fn default() -> Self {
        Self {
            queue_max_attempts: 3,
            drain_interval_ms: 250,
        }
    }
}

/// Channel naming.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelSettings {
    /// Channel assigned to new connections and to envelopes without one.
    pub default_channel: String,
    /// Accepted channel names; a trailing `*` matches by prefix.
    pub allowed: Vec<String>,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            default_channel: "guide".to_string(),
            allowed: vec![
                "guide".to_string(),
                "pillar:content".to_string(),
                "pillar:insights".to_string(),
                "pillar:operations".to_string(),
                "pillar:business_outcomes".to_string(),
            ],
        }
    }
}

/// Per-connection inbound rate limits.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    /// Messages allowed in any one-second window.
    pub max_messages_per_second: usize,
    /// Messages allowed in any sixty-second window.
    pub max_messages_per_minute: usize,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            max_messages_per_second: 10,
            max_messages_per_minute: 100,
        }
    }
}

/// Storage/transport backend selection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// In-process; single-instance deployments and tests.
    #[default]
    Memory,
    /// Shared Redis server.
    Redis,
}

/// Fan-out bus backend.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BusSettings {
    /// Which backend to use.
    pub backend: Backend,
    /// Redis URL when `backend = "redis"`.
    pub redis_url: String,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            backend: Backend::Memory,
            redis_url: "redis://127.0.0.1:6379".to_string(),
        }
    }
}

/// Shared connection registry backend.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrySettings {
    /// Which backend to use.
    pub backend: Backend,
    /// Redis URL when `backend = "redis"`.
    pub redis_url: String,
    /// Prefix for every registry key.
    pub key_prefix: String,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            backend: Backend::Memory,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            key_prefix: "conduit:".to_string(),
        }
    }
}

/// How session tokens are validated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidatorMode {
    /// POST the token to an external session authority.
    Http,
    /// Look the token up in `static_tokens`.
    #[default]
    Static,
}

/// Session validator settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorSettings {
    /// Which validator to use.
    pub mode: ValidatorMode,
    /// Validation endpoint when `mode = "http"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Milliseconds before a validation call counts as invalid.
    pub timeout_ms: u64,
    /// Token → identity table when `mode = "static"`.
    pub static_tokens: BTreeMap<String, Identity>,
}

impl Default for ValidatorSettings {
    fn default() -> Self {
        Self {
            mode: ValidatorMode::Static,
            url: None,
            timeout_ms: 2000,
            static_tokens: BTreeMap::new(),
        }
    }
}

impl ValidatorSettings {
    /// Validation call deadline.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Log output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
