use serde::{Deserialize, Serialize};

/// Stream transport tuning. Pool sizes are fixed once the manager starts.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StreamSettings {
    pub fetch_workers: usize,
    pub push_workers: usize,
    /// Upper bound of a single engine read in the fetch flow.
    pub fetch_chunk_bytes: usize,
    pub push_min_chunk_bytes: usize,
    pub push_max_chunk_bytes: usize,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            fetch_workers: 2,
            push_workers: 2,
            fetch_chunk_bytes: 4096,
            push_min_chunk_bytes: 20,
            push_max_chunk_bytes: 300,
        }
    }
}

/// Lifecycle timeouts in milliseconds.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LifecycleSettings {
    /// Bounded wait when joining the engine worker thread.
    pub engine_join_timeout_ms: u64,
    /// Teardown watchdog: the process is terminated past this deadline.
    pub shutdown_deadline_ms: u64,
    /// How long stream pools may drain during shutdown.
    pub stream_drain_timeout_ms: u64,
    /// Default confirmation wait for property writes.
    pub property_wait_ms: u64,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            engine_join_timeout_ms: 2_000,
            shutdown_deadline_ms: 10_000,
            stream_drain_timeout_ms: 1_000,
            property_wait_ms: 1_000,
        }
    }
}

/// IPC naming and delivery limits.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IpcSettings {
    /// Local namespace stripped from outbound topics and actions.
    pub namespace: String,
    /// Prefix for IPC actions (`prefix + action`) and categories (`prefix + topic`).
    pub intent_prefix: String,
    /// Capability a component must hold to receive bus traffic.
    pub permission: String,
    /// Messages above this size are streamed instead of embedded.
    pub max_embedded_bytes: usize,
}

impl Default for IpcSettings {
    fn default() -> Self {
        Self {
            namespace: "voxbus".to_string(),
            intent_prefix: "voxbus.bus.".to_string(),
            permission: "voxbus.permission.SEND_RECEIVE".to_string(),
            max_embedded_bytes: 400_000,
        }
    }
}

/// Logging configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
    /// Record envelopes in the in-memory traffic log.
    pub traffic_log: bool,
    pub traffic_log_capacity: usize,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: true,
            traffic_log: false,
            traffic_log_capacity: 512,
        }
    }
}
