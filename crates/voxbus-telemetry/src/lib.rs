mod traffic;

pub use traffic::{Direction, TrafficLog, TrafficQuery, TrafficRecord};

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by RUST_LOG env var.
    pub log_level: Level,
    /// Per-module level overrides (e.g. "voxbus_router" => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// JSON lines on stdout when true, human-readable otherwise.
    pub json: bool,
    /// Keep an in-memory log of recent envelopes.
    pub traffic_log: bool,
    pub traffic_log_capacity: usize,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            json: true,
            traffic_log: false,
            traffic_log_capacity: 512,
        }
    }
}

impl TelemetryConfig {
    /// Parse a level name, falling back to INFO for anything unknown.
    pub fn parse_level(name: &str) -> Level {
        name.parse().unwrap_or(Level::INFO)
    }
}

/// Handle returned by [`init_telemetry`]. Keep it alive for the process.
pub struct TelemetryGuard {
    traffic: Option<Arc<TrafficLog>>,
    level_filter: Arc<RwLock<Vec<(String, Level)>>>,
}

impl TelemetryGuard {
    /// Record a module level override. Takes effect on the next init.
    pub fn set_module_level(&self, module: &str, level: Level) {
        let mut levels = self.level_filter.write();
        if let Some(entry) = levels.iter_mut().find(|(m, _)| m == module) {
            entry.1 = level;
        } else {
            levels.push((module.to_string(), level));
        }
    }

    pub fn module_levels(&self) -> Vec<(String, Level)> {
        self.level_filter.read().clone()
    }

    /// The traffic log, when enabled.
    pub fn traffic(&self) -> Option<Arc<TrafficLog>> {
        self.traffic.clone()
    }
}

fn filter_string(config: &TelemetryConfig) -> String {
    let mut filter_str = config.log_level.to_string().to_lowercase();
    for (module, level) in &config.module_levels {
        filter_str.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
    }
    filter_str
}

/// Initialize the telemetry subsystem. Call once at startup; later calls
/// keep the first subscriber.
pub fn init_telemetry(config: TelemetryConfig) -> TelemetryGuard {
    let level_filter = Arc::new(RwLock::new(config.module_levels.clone()));

    let filter_str = filter_string(&config);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter_str));

    let fmt_layer: Box<dyn Layer<Registry> + Send + Sync> = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .with_filter(env_filter)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_filter(env_filter)
            .boxed()
    };

    if tracing_subscriber::registry().with(fmt_layer).try_init().is_err() {
        eprintln!("voxbus-telemetry: subscriber already installed");
    }

    let traffic = config
        .traffic_log
        .then(|| Arc::new(TrafficLog::new(config.traffic_log_capacity)));

    TelemetryGuard {
        traffic,
        level_filter,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_string_includes_module_levels() {
        let config = TelemetryConfig {
            log_level: Level::WARN,
            module_levels: vec![("voxbus_router".into(), Level::DEBUG)],
            ..TelemetryConfig::default()
        };
        assert_eq!(filter_string(&config), "warn,voxbus_router=debug");
    }

    #[test]
    fn parse_level_falls_back_to_info() {
        assert_eq!(TelemetryConfig::parse_level("debug"), Level::DEBUG);
        assert_eq!(TelemetryConfig::parse_level("loud"), Level::INFO);
    }

    #[test]
    fn guard_tracks_module_levels() {
        let guard = TelemetryGuard {
            traffic: None,
            level_filter: Arc::new(RwLock::new(Vec::new())),
        };
        guard.set_module_level("voxbus_ipc", Level::TRACE);
        guard.set_module_level("voxbus_ipc", Level::WARN);
        assert_eq!(guard.module_levels(), vec![("voxbus_ipc".to_string(), Level::WARN)]);
    }

    #[test]
    fn init_twice_does_not_panic() {
        let config = TelemetryConfig {
            traffic_log: true,
            traffic_log_capacity: 4,
            ..TelemetryConfig::default()
        };
        let first = init_telemetry(config.clone());
        let second = init_telemetry(config);
        assert!(first.traffic().is_some());
        assert!(second.traffic().is_some());
    }
}
