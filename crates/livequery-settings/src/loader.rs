//! Settings loading with deep merge and environment overrides.
//!
//! 1. compiled [`LiveQuerySettings::default()`]
//! 2. `~/.livequery/settings.json`, deep-merged over the defaults
//! 3. `LIVEQUERY_*` environment variables
//!
//! Merge rules: objects merge per key, arrays and primitives are replaced,
//! `null` in the file keeps the default.

use std::path::{Path, PathBuf};

use livequery_engine::ScalarPolicy;
use livequery_logging::{LogFormat, parse_level};
use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::LiveQuerySettings;

/// Bind address override.
pub const ENV_HOST: &str = "LIVEQUERY_HOST";
/// Bind port override.
pub const ENV_PORT: &str = "LIVEQUERY_PORT";
/// Batch size override.
pub const ENV_MAX_BATCH_SIZE: &str = "LIVEQUERY_MAX_BATCH_SIZE";
/// Scalar policy override (`immediate` or `batched`).
pub const ENV_SCALAR_POLICY: &str = "LIVEQUERY_SCALAR_POLICY";
/// Log level override.
pub const ENV_LOG_LEVEL: &str = "LIVEQUERY_LOG_LEVEL";
/// Log format override (`pretty` or `json`).
pub const ENV_LOG_FORMAT: &str = "LIVEQUERY_LOG_FORMAT";

/// `~/.livequery/settings.json`.
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".livequery").join("settings.json")
}

/// Load from the default path with environment overrides.
pub fn load_settings() -> Result<LiveQuerySettings> {
    load_settings_from_path(&settings_path())
}

/// Load from `path` with environment overrides. A missing file yields the
/// defaults; malformed JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<LiveQuerySettings> {
    load_with(path, |name| std::env::var(name).ok())
}

/// Load from `path`, reading overrides through `lookup`.
pub fn load_with<F>(path: &Path, lookup: F) -> Result<LiveQuerySettings>
where
    F: Fn(&str) -> Option<String>,
{
    let defaults = serde_json::to_value(LiveQuerySettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: LiveQuerySettings = serde_json::from_value(merged)?;
    apply_overrides(&mut settings, lookup);
    settings.validate()?;
    Ok(settings)
}

/// Merge `source` into `target`.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply overrides read through `lookup`. Empty or invalid values are
/// ignored with a warning.
pub fn apply_overrides<F>(settings: &mut LiveQuerySettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let read = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    if let Some(v) = read(ENV_HOST) {
        settings.server.host = v;
    }
    if let Some(v) = read(ENV_PORT) {
        match parse_port(&v) {
            Some(port) => settings.server.port = port,
            None => invalid(ENV_PORT, &v),
        }
    }
    if let Some(v) = read(ENV_MAX_BATCH_SIZE) {
        match parse_usize_range(&v, 1, 10_000) {
            Some(n) => settings.engine.max_batch_size = n,
            None => invalid(ENV_MAX_BATCH_SIZE, &v),
        }
    }
    if let Some(v) = read(ENV_SCALAR_POLICY) {
        match v.parse::<ScalarPolicy>() {
            Ok(policy) => settings.engine.scalar_policy = policy,
            Err(_) => invalid(ENV_SCALAR_POLICY, &v),
        }
    }
    if let Some(v) = read(ENV_LOG_LEVEL) {
        match parse_level(&v) {
            Ok(_) => settings.logging.level = v.trim().to_lowercase(),
            Err(_) => invalid(ENV_LOG_LEVEL, &v),
        }
    }
    if let Some(v) = read(ENV_LOG_FORMAT) {
        match v.parse::<LogFormat>() {
            Ok(format) => settings.logging.format = format,
            Err(_) => invalid(ENV_LOG_FORMAT, &v),
        }
    }
}

fn invalid(key: &str, value: &str) {
    warn!(key, value, "invalid env override, ignoring");
}

// ── Pure parsers ────────────────────────────────────────────────────

/// Parse a port. 0 is allowed (ephemeral).
pub fn parse_port(val: &str) -> Option<u16> {
    val.trim().parse().ok()
}

/// Parse a `usize` within `[min, max]`.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.trim().parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}
