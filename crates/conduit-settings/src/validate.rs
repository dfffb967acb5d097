//! Startup validation of timing relations and capacities.

use tracing::warn;

use crate::errors::{Result, SettingsError};
use crate::types::{ConduitSettings, ValidatorMode};

/// Largest recommended heartbeat interval as a fraction of the idle time.
pub const RECOMMENDED_HEARTBEAT_FRACTION: u64 = 5;

/// Reject settings the gateway cannot run with.
///
/// A heartbeat interval above `1/5` of the idle time is allowed but logged,
/// since a single lost pong then consumes much of the idle budget.
pub fn validate(settings: &ConduitSettings) -> Result<()> {
    if settings.heartbeat_interval_seconds == 0 {
        return Err(SettingsError::invalid(
            "heartbeat_interval_seconds",
            "must be at least 1",
        ));
    }
    if settings.heartbeat_interval_seconds >= settings.max_idle_time_seconds {
        return Err(SettingsError::invalid(
            "heartbeat_interval_seconds",
            format!(
                "must be smaller than max_idle_time_seconds ({} >= {})",
                settings.heartbeat_interval_seconds, settings.max_idle_time_seconds
            ),
        ));
    }
    let pong_wait = settings.heartbeat.heartbeat_timeout_seconds;
    if pong_wait == 0 || pong_wait >= settings.heartbeat_interval_seconds {
        return Err(SettingsError::invalid(
            "heartbeat.heartbeat_timeout_seconds",
            format!(
                "must be between 1 and heartbeat_interval_seconds - 1 (got {pong_wait})"
            ),
        ));
    }
    if settings.queue_max_size == 0 {
        return Err(SettingsError::invalid("queue_max_size", "must be at least 1"));
    }
    if settings.circuit_failure_threshold == 0 {
        return Err(SettingsError::invalid(
            "circuit_failure_threshold",
            "must be at least 1",
        ));
    }
    if settings.circuit_recovery_timeout_seconds == 0 {
        return Err(SettingsError::invalid(
            "circuit_recovery_timeout_seconds",
            "must be at least 1",
        ));
    }
    if settings.eviction_sweep_interval_seconds == 0 {
        return Err(SettingsError::invalid(
            "eviction_sweep_interval_seconds",
            "must be at least 1",
        ));
    }
    if settings.backpressure.queue_max_attempts == 0 {
        return Err(SettingsError::invalid(
            "backpressure.queue_max_attempts",
            "must be at least 1",
        ));
    }
    if settings.server.max_connections == 0 || settings.server.max_connections_per_identity == 0 {
        return Err(SettingsError::invalid(
            "server.max_connections",
            "connection limits must be at least 1",
        ));
    }
    if settings.server.outbound_queue_size == 0 {
        return Err(SettingsError::invalid(
            "server.outbound_queue_size",
            "must be at least 1",
        ));
    }
    if settings.channels.default_channel.is_empty() {
        return Err(SettingsError::invalid(
            "channels.default_channel",
            "must not be empty",
        ));
    }
    if settings.validator.mode == ValidatorMode::Http && settings.validator.url.is_none() {
        return Err(SettingsError::invalid(
            "validator.url",
            "required when validator.mode is \"http\"",
        ));
    }

    if let Some(message) = heartbeat_ratio_warning(settings) {
        warn!("{message}");
    }
    Ok(())
}

/// Advisory message when the heartbeat interval exceeds the recommended share
/// of the idle time.
pub fn heartbeat_ratio_warning(settings: &ConduitSettings) -> Option<String> {
    let limit = settings.max_idle_time_seconds / RECOMMENDED_HEARTBEAT_FRACTION;
    (settings.heartbeat_interval_seconds > limit).then(|| {
        format!(
            "heartbeat_interval_seconds ({}) exceeds 1/{RECOMMENDED_HEARTBEAT_FRACTION} of max_idle_time_seconds ({})",
            settings.heartbeat_interval_seconds, settings.max_idle_time_seconds
        )
    })
}
