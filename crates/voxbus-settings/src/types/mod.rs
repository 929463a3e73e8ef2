//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` and implement
//! [`Default`] with production values. Every section is `#[serde(default)]`
//! so partial JSON fills the gaps from defaults.

mod general;
mod handlers;
mod runtime;

pub use general::*;
pub use handlers::*;
pub use runtime::*;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{Result, SettingsError};

/// Lowest configuration version the bus accepts.
pub const MIN_SUPPORTED_VERSION: f64 = 1.0;
/// Configuration version this build writes.
pub const CURRENT_VERSION: f64 = 2.0;

/// Root settings type for the bus.
///
/// ```json
/// {
///   "general": { "version": "2.0", "intentTargets": { "AudioOutput": { "package": ["com.example.player"] } } },
///   "defaultPlatformHandlers": { "audioOutput": { "audioType": { "TTS": { "useDefault": true } } } },
///   "engine": [ { "aace.alexa": {} } ]
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BusSettings {
    /// Protocol version, routing table, and property flags.
    pub general: GeneralSettings,
    /// Which built-in handlers the bus runs instead of forwarding.
    pub default_platform_handlers: DefaultHandlerSettings,
    /// Stream worker pools and chunk sizes.
    pub streams: StreamSettings,
    /// Lifecycle timeouts.
    pub lifecycle: LifecycleSettings,
    /// IPC naming and delivery limits.
    pub ipc: IpcSettings,
    /// Logging and traffic instrumentation.
    pub logging: LoggingSettings,
    /// Opaque engine configuration, passed through in order.
    pub engine: Vec<Value>,
}

impl BusSettings {
    /// Parse `general.version` and check it against the supported window.
    pub fn checked_version(&self) -> Result<f64> {
        let found = self.general.version.trim();
        let version: f64 = found.parse().map_err(|_| SettingsError::UnsupportedVersion {
            found: found.to_string(),
            min: MIN_SUPPORTED_VERSION,
            max: CURRENT_VERSION,
        })?;
        if !(MIN_SUPPORTED_VERSION..=CURRENT_VERSION).contains(&version) {
            return Err(SettingsError::UnsupportedVersion {
                found: found.to_string(),
                min: MIN_SUPPORTED_VERSION,
                max: CURRENT_VERSION,
            });
        }
        Ok(version)
    }

    /// Structural checks that do not depend on the runtime environment.
    pub fn validate(&self) -> Result<()> {
        let s = &self.streams;
        if s.fetch_workers == 0 || s.push_workers == 0 {
            return Err(SettingsError::InvalidValue(
                "stream worker pools need at least one worker".into(),
            ));
        }
        if s.fetch_chunk_bytes == 0 {
            return Err(SettingsError::InvalidValue("fetchChunkBytes must be > 0".into()));
        }
        if s.push_min_chunk_bytes == 0 || s.push_min_chunk_bytes > s.push_max_chunk_bytes {
            return Err(SettingsError::InvalidValue(format!(
                "push chunk bounds invalid: min {} max {}",
                s.push_min_chunk_bytes, s.push_max_chunk_bytes
            )));
        }
        if self.general.ipc.cache_capacity == 0 {
            return Err(SettingsError::InvalidValue("ipc cacheCapacity must be > 0".into()));
        }
        if self.ipc.intent_prefix.is_empty() {
            return Err(SettingsError::InvalidValue("intentPrefix must not be empty".into()));
        }
        Ok(())
    }
}
