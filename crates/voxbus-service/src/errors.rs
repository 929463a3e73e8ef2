use voxbus_core::errors::EngineError;
use voxbus_router::PropertyError;
use voxbus_settings::SettingsError;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Property(#[from] PropertyError),
    #[error("engine worker unavailable: {0}")]
    Worker(String),
    #[error("no tokio runtime to host the service")]
    NoRuntime,
    #[error("engine is not running")]
    EngineNotRunning,
}

impl ServiceError {
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Settings(_) => "settings",
            Self::Engine(_) => "engine",
            Self::Property(e) => e.error_kind(),
            Self::Worker(_) => "worker",
            Self::NoRuntime => "no_runtime",
            Self::EngineNotRunning => "engine_not_running",
        }
    }
}
