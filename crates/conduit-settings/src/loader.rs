//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`ConduitSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over defaults
//! 3. Apply `CONDUIT_*` environment variable overrides (highest priority)
//! 4. Validate; a violation is a fatal startup error
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::{Backend, ConduitSettings, ValidatorMode};
use crate::validate::validate;

/// Environment variable naming an explicit settings file.
pub const CONFIG_ENV: &str = "CONDUIT_CONFIG";

/// Resolve the settings file path.
///
/// `explicit` (from `--config`) wins, then `CONDUIT_CONFIG`, then
/// `~/.conduit/settings.json`.
pub fn settings_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    if let Some(path) = read_env_string(CONFIG_ENV) {
        return PathBuf::from(path);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".conduit").join("settings.json")
}

/// Load, override, and validate settings.
pub fn load_settings(explicit: Option<&Path>) -> Result<ConduitSettings> {
    load_settings_from_path(&settings_path(explicit))
}

/// Load settings from a specific path with env var overrides, then validate.
///
/// A missing file yields defaults. Invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<ConduitSettings> {
    let mut settings = read_layers(path)?;
    apply_env_overrides(&mut settings);
    validate(&settings)?;
    Ok(settings)
}

/// Defaults merged with the file at `path`, without env overrides or validation.
pub fn read_layers(path: &Path) -> Result<ConduitSettings> {
    let defaults = serde_json::to_value(ConduitSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `CONDUIT_*` process environment overrides.
pub fn apply_env_overrides(settings: &mut ConduitSettings) {
    apply_overrides(settings, &|name: &str| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`.
///
/// Invalid values are ignored with a warning and the file/default value is
/// kept.
pub fn apply_overrides(settings: &mut ConduitSettings, lookup: &dyn Fn(&str) -> Option<String>) {
    let env = EnvReader { lookup };

    // ── Gateway timing and capacity ─────────────────────────────────
    if let Some(v) = env.u64("CONDUIT_HEARTBEAT_INTERVAL_SECONDS", 1, 86_400) {
        settings.heartbeat_interval_seconds = v;
    }
    if let Some(v) = env.u64("CONDUIT_MAX_IDLE_TIME_SECONDS", 1, 604_800) {
        settings.max_idle_time_seconds = v;
    }
    if let Some(v) = env.usize("CONDUIT_QUEUE_MAX_SIZE", 1, 10_000_000) {
        settings.queue_max_size = v;
    }
    if let Some(v) = env.u64("CONDUIT_CIRCUIT_FAILURE_THRESHOLD", 1, 1_000_000) {
        settings.circuit_failure_threshold = v as u32;
    }
    if let Some(v) = env.u64("CONDUIT_CIRCUIT_RECOVERY_TIMEOUT_SECONDS", 1, 86_400) {
        settings.circuit_recovery_timeout_seconds = v;
    }
    if let Some(v) = env.u64("CONDUIT_EVICTION_SWEEP_INTERVAL_SECONDS", 1, 86_400) {
        settings.eviction_sweep_interval_seconds = v;
    }
    if let Some(v) = env.u64("CONDUIT_HEARTBEAT_TIMEOUT_SECONDS", 1, 86_400) {
        settings.heartbeat.heartbeat_timeout_seconds = v;
    }

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.string("CONDUIT_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.u64("CONDUIT_PORT", 0, 65_535) {
        settings.server.port = v as u16;
    }
    if let Some(v) = env.string("CONDUIT_INSTANCE_ID") {
        settings.server.instance_id = Some(v);
    }
    if let Some(v) = env.usize("CONDUIT_MAX_CONNECTIONS", 1, 10_000_000) {
        settings.server.max_connections = v;
    }
    if let Some(v) = env.list("CONDUIT_ALLOWED_ORIGINS") {
        settings.server.allowed_origins = v;
    }

    // ── Backends ────────────────────────────────────────────────────
    if let Some(v) = env.string("CONDUIT_REDIS_URL") {
        settings.bus.redis_url.clone_from(&v);
        settings.registry.redis_url = v;
    }
    if let Some(v) = env.parse_enum::<Backend>("CONDUIT_BUS_BACKEND") {
        settings.bus.backend = v;
    }
    if let Some(v) = env.parse_enum::<Backend>("CONDUIT_REGISTRY_BACKEND") {
        settings.registry.backend = v;
    }
    if let Some(v) = env.parse_enum::<ValidatorMode>("CONDUIT_VALIDATOR_MODE") {
        settings.validator.mode = v;
    }
    if let Some(v) = env.string("CONDUIT_VALIDATOR_URL") {
        settings.validator.url = Some(v);
    }
    if let Some(v) = env.u64("CONDUIT_VALIDATOR_TIMEOUT_MS", 1, 600_000) {
        settings.validator.timeout_ms = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("CONDUIT_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.bool("CONDUIT_LOG_JSON") {
        settings.logging.json = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u64` within an inclusive range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within an inclusive range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

struct EnvReader<'a> {
    lookup: &'a dyn Fn(&str) -> Option<String>,
}

impl EnvReader<'_> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    /// Comma-separated values, trimmed, empty items skipped.
    fn list(&self, name: &str) -> Option<Vec<String>> {
        let val = self.string(name)?;
        Some(
            val.split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(str::to_owned)
                .collect(),
        )
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = self.string(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = self.string(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
        }
        result
    }

    fn usize(&self, name: &str, min: usize, max: usize) -> Option<usize> {
        let val = self.string(name)?;
        let result = parse_usize_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid usize env var, ignoring");
        }
        result
    }

    fn parse_enum<T: serde::de::DeserializeOwned>(&self, name: &str) -> Option<T> {
        let val = self.string(name)?;
        let result = serde_json::from_value(Value::String(val.to_lowercase())).ok();
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "unrecognized env var value, ignoring");
        }
        result
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SettingsError;
    use assert_matches::assert_matches;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"server": {"port": 8000, "host": "0.0.0.0"}});
        let source = serde_json::json!({"server": {"port": 9090}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["server"]["port"], 9090);
        assert_eq!(merged["server"]["host"], "0.0.0.0");
    }

    #[test]
    fn merge_array_replace() {
        let target = serde_json::json!({"allowed": ["a", "b"]});
        let source = serde_json::json!({"allowed": ["c"]});
        assert_eq!(deep_merge(target, source)["allowed"], serde_json::json!(["c"]));
    }

    #[test]
    fn merge_null_preserves_target() {
        let target = serde_json::json!({"a": 1});
        let source = serde_json::json!({"a": null});
        assert_eq!(deep_merge(target, source)["a"], 1);
    }

    // ── files ───────────────────────────────────────────────────────

    #[test]
    fn missing_file_returns_defaults() {
        let settings = read_layers(Path::new("/nonexistent/settings.json")).unwrap();
        assert_eq!(settings.max_idle_time_seconds, 300);
    }

    #[test]
    fn file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"max_idle_time_seconds": 600, "channels": {"allowed": ["guide", "ops:*"]}}"#,
        )
        .unwrap();

        let settings = read_layers(&path).unwrap();
        assert_eq!(settings.max_idle_time_seconds, 600);
        assert_eq!(settings.channels.allowed, vec!["guide", "ops:*"]);
        assert_eq!(settings.channels.default_channel, "guide");
        assert_eq!(settings.heartbeat_interval_seconds, 30);
    }

    #[test]
    fn invalid_json_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not json").unwrap();
        assert_matches!(read_layers(&path), Err(SettingsError::Json(_)));
    }

    #[test]
    fn invalid_timing_fails_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"heartbeat_interval_seconds": 300, "max_idle_time_seconds": 300}"#,
        )
        .unwrap();
        assert_matches!(
            load_settings_from_path(&path),
            Err(SettingsError::Invalid {
                field: "heartbeat_interval_seconds",
                ..
            })
        );
    }

    #[test]
    fn explicit_path_wins() {
        let path = settings_path(Some(Path::new("/etc/conduit.json")));
        assert_eq!(path, PathBuf::from("/etc/conduit.json"));
    }

    // ── overrides ───────────────────────────────────────────────────

    #[test]
    fn env_overrides_file_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"queue_max_size": 50}"#).unwrap();

        let mut settings = read_layers(&path).unwrap();
        let lookup = lookup_from(&[
            ("CONDUIT_QUEUE_MAX_SIZE", "75"),
            ("CONDUIT_MAX_IDLE_TIME_SECONDS", "900"),
            ("CONDUIT_BUS_BACKEND", "Redis"),
            ("CONDUIT_REDIS_URL", "redis://cache:6379"),
            ("CONDUIT_LOG_JSON", "yes"),
        ]);
        apply_overrides(&mut settings, &lookup);

        assert_eq!(settings.queue_max_size, 75);
        assert_eq!(settings.max_idle_time_seconds, 900);
        assert_eq!(settings.bus.backend, Backend::Redis);
        assert_eq!(settings.bus.redis_url, "redis://cache:6379");
        assert_eq!(settings.registry.redis_url, "redis://cache:6379");
        assert!(settings.logging.json);
    }

    #[test]
    fn invalid_env_values_ignored() {
        let mut settings = ConduitSettings::default();
        let lookup = lookup_from(&[
            ("CONDUIT_QUEUE_MAX_SIZE", "zero"),
            ("CONDUIT_HEARTBEAT_INTERVAL_SECONDS", "0"),
            ("CONDUIT_BUS_BACKEND", "kafka"),
            ("CONDUIT_LOG_JSON", "maybe"),
        ]);
        apply_overrides(&mut settings, &lookup);

        assert_eq!(settings.queue_max_size, 1000);
        assert_eq!(settings.heartbeat_interval_seconds, 30);
        assert_eq!(settings.bus.backend, Backend::Memory);
        assert!(!settings.logging.json);
    }

    #[test]
    fn allowed_origins_from_comma_list() {
        let mut settings = ConduitSettings::default();
        let lookup = lookup_from(&[(
            "CONDUIT_ALLOWED_ORIGINS",
            "https://app.example.com, https://admin.example.com,,",
        )]);
        apply_overrides(&mut settings, &lookup);
        assert_eq!(
            settings.server.allowed_origins,
            vec!["https://app.example.com", "https://admin.example.com"]
        );
    }

    #[test]
    fn empty_env_value_ignored() {
        let mut settings = ConduitSettings::default();
        apply_overrides(&mut settings, &lookup_from(&[("CONDUIT_HOST", "")]));
        assert_eq!(settings.server.host, "0.0.0.0");
    }

    // ── parsing ─────────────────────────────────────────────────────

    #[test]
    fn parse_bool_variants() {
        assert_eq!(parse_bool("ON"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("nah"), None);
    }

    #[test]
    fn parse_ranges() {
        assert_eq!(parse_u64_range("5", 1, 10), Some(5));
        assert_eq!(parse_u64_range("11", 1, 10), None);
        assert_eq!(parse_usize_range("-1", 0, 10), None);
    }
}
