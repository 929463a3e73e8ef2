//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`BusSettings::default()`]
//! 2. Deep-merge a settings file, or the documents of a configuration
//!    message, over the defaults
//! 3. Apply `VOXBUS_*` environment variable overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::BusSettings;

/// Resolve the default settings path (`~/.voxbus/settings.json`).
pub fn settings_path() -> PathBuf {
    voxbus_home().join("settings.json")
}

pub(crate) fn voxbus_home() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".voxbus")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<BusSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<BusSettings> {
    let defaults = serde_json::to_value(BusSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: BusSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Shape of a configuration message sent by a component.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ConfigMessage {
    config_filepaths: Vec<PathBuf>,
    config_strings: Vec<String>,
}

/// Build settings from a configuration message.
///
/// The message lists file paths and inline JSON documents. Files are merged
/// first, then strings, each in order, all over `base` (the settings the
/// host started with). A message that is a bare settings object is merged
/// directly.
pub fn settings_from_config_message(base: &BusSettings, raw: &str) -> Result<BusSettings> {
    let value: Value = serde_json::from_str(raw)?;
    let mut merged = serde_json::to_value(base)?;

    let is_envelope = value
        .as_object()
        .is_some_and(|o| o.contains_key("configFilepaths") || o.contains_key("configStrings"));

    if is_envelope {
        let message: ConfigMessage = serde_json::from_value(value)?;
        for path in &message.config_filepaths {
            let content = std::fs::read_to_string(path)?;
            let doc: Value = serde_json::from_str(&content)?;
            merged = deep_merge(merged, doc);
        }
        for doc in &message.config_strings {
            let doc: Value = serde_json::from_str(doc)?;
            merged = deep_merge(merged, doc);
        }
    } else {
        merged = deep_merge(merged, value);
    }

    let mut settings: BusSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Merge an extra configuration document over existing settings.
pub fn merge_extra(settings: &BusSettings, extra: &str) -> Result<BusSettings> {
    let extra: Value = serde_json::from_str(extra)?;
    if !extra.is_object() {
        return Err(SettingsError::InvalidValue(
            "extra configuration must be a JSON object".into(),
        ));
    }
    let merged = deep_merge(serde_json::to_value(settings)?, extra);
    let settings: BusSettings = serde_json::from_value(merged)?;
    settings.validate()?;
    Ok(settings)
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

/// Apply environment variable overrides to loaded settings.
///
/// Invalid values are logged and ignored (fall back to file/default).
pub fn apply_env_overrides(settings: &mut BusSettings) {
    // ── Streams ─────────────────────────────────────────────────────
    if let Some(v) = read_env_usize("VOXBUS_FETCH_WORKERS", 1, 64) {
        settings.streams.fetch_workers = v;
    }
    if let Some(v) = read_env_usize("VOXBUS_PUSH_WORKERS", 1, 64) {
        settings.streams.push_workers = v;
    }

    // ── IPC ─────────────────────────────────────────────────────────
    if let Some(v) = read_env_string("VOXBUS_INTENT_PREFIX") {
        settings.ipc.intent_prefix = v;
    }
    if let Some(v) = read_env_string("VOXBUS_PERMISSION") {
        settings.ipc.permission = v;
    }
    if let Some(v) = read_env_usize("VOXBUS_CACHE_CAPACITY", 1, 10_000) {
        settings.general.ipc.cache_capacity = v;
    }
    if let Some(v) = read_env_usize("VOXBUS_MAX_EMBEDDED_BYTES", 1024, 64 * 1024 * 1024) {
        settings.ipc.max_embedded_bytes = v;
    }

    // ── Lifecycle ───────────────────────────────────────────────────
    if let Some(v) = read_env_u64("VOXBUS_SHUTDOWN_DEADLINE_MS", 100, 600_000) {
        settings.lifecycle.shutdown_deadline_ms = v;
    }
    if let Some(v) = read_env_u64("VOXBUS_ENGINE_JOIN_TIMEOUT_MS", 10, 600_000) {
        settings.lifecycle.engine_join_timeout_ms = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = read_env_string("VOXBUS_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read_env_bool("VOXBUS_LOG_JSON") {
        settings.logging.json = v;
    }
    if let Some(v) = read_env_bool("VOXBUS_TRAFFIC_LOG") {
        settings.logging.traffic_log = v;
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

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_bool(name: &str) -> Option<bool> {
    let val = std::env::var(name).ok()?;
    let result = parse_bool(&val);
    if result.is_none() {
        warn!(key = name, value = %val, "invalid boolean env var, ignoring");
    }
    result
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        warn!(key = name, value = %val, "invalid u64 env var, ignoring");
    }
    result
}

fn read_env_usize(name: &str, min: usize, max: usize) -> Option<usize> {
    let val = std::env::var(name).ok()?;
    let result = parse_usize_range(&val, min, max);
    if result.is_none() {
        warn!(key = name, value = %val, "invalid usize env var, ignoring");
    }
    result
}
