//! # voxbus
//!
//! Local bus runner: loads settings, installs telemetry, and runs the bus
//! service against the loopback engine and the in-process component bus.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_stream::StreamExt;
use tracing::{info, warn};
use voxbus_core::engine::{Engine, EngineFactory};
use voxbus_core::envelope::EnvelopeCodec;
use voxbus_core::errors::EngineError;
use voxbus_ipc::{Inbound, LocalComponentBus};
use voxbus_service::{BusService, LoopbackEngine, ServiceDeps};
use voxbus_settings::{load_settings_from_path, settings_path, ConfigStore};
use voxbus_telemetry::{init_telemetry, TelemetryConfig};

/// voxbus message bus.
#[derive(Parser, Debug)]
#[command(name = "voxbus", about = "On-device message bus")]
struct Cli {
    /// Settings file (defaults to `~/.voxbus/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Where an accepted configuration is persisted.
    #[arg(long)]
    config_store: Option<PathBuf>,

    /// Configuration message to apply at startup. Without it the saved
    /// configuration is reused.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Human-readable logs instead of JSON lines.
    #[arg(long)]
    pretty: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings_file = cli.settings.unwrap_or_else(settings_path);
    let settings = load_settings_from_path(&settings_file)
        .with_context(|| format!("Failed to load settings: {}", settings_file.display()))?;

    let telemetry = init_telemetry(TelemetryConfig {
        log_level: TelemetryConfig::parse_level(&settings.logging.level),
        module_levels: Vec::new(),
        json: settings.logging.json && !cli.pretty,
        traffic_log: settings.logging.traffic_log,
        traffic_log_capacity: settings.logging.traffic_log_capacity,
    });
    info!(path = %settings_file.display(), "settings loaded");

    let store = cli
        .config_store
        .map(ConfigStore::new)
        .unwrap_or_else(ConfigStore::default_location);

    let engine = Arc::new(LoopbackEngine::new(EnvelopeCodec::new(
        settings.ipc.namespace.clone(),
    )));
    let factory: Arc<dyn EngineFactory> =
        Arc::new(move || Ok::<Arc<dyn Engine>, EngineError>(engine.clone()));
    let bus = Arc::new(LocalComponentBus::new());

    let mut deps = ServiceDeps::new(factory, bus.clone(), bus, store);
    deps.settings = settings;
    deps.traffic = telemetry.traffic();
    let service = BusService::start(deps).await.context("Failed to start bus service")?;

    let mut events = service.events();
    let observer = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            match event {
                Ok(event) => info!(state = %event.state, at = %event.at, "lifecycle"),
                Err(e) => warn!(error = %e, "lifecycle observer lagged"),
            }
        }
    });

    let receiver = service.receiver();
    match cli.config {
        Some(path) => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read configuration: {}", path.display()))?;
            receiver.deliver(Inbound::Configuration(raw))?;
        }
        None => receiver.deliver(Inbound::Launch { new_config: false })?,
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl+c")?;
    info!("shutting down");

    let clean = service.shutdown().await;
    observer.abort();
    if let Some(traffic) = telemetry.traffic() {
        info!(records = traffic.len(), "traffic log at shutdown");
    }
    if !clean {
        anyhow::bail!("shutdown did not complete cleanly");
    }
    Ok(())
}
