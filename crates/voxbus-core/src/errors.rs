/// Failures while decoding or encoding a bus envelope.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("malformed envelope: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("envelope missing field: {0}")]
    MissingField(&'static str),
    #[error("payload is not valid JSON: {0}")]
    InvalidPayload(#[source] serde_json::Error),
    #[error("failed to serialize envelope: {0}")]
    Serialize(#[source] serde_json::Error),
}

impl EnvelopeError {
    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Malformed(_) => "malformed",
            Self::MissingField(_) => "missing_field",
            Self::InvalidPayload(_) => "invalid_payload",
            Self::Serialize(_) => "serialize",
        }
    }
}

/// Errors reported by the engine boundary.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("engine configuration rejected: {0}")]
    Configuration(String),
    #[error("engine failed to start: {0}")]
    Start(String),
    #[error("engine failed to stop: {0}")]
    Stop(String),
    #[error("module registration failed for {module}: {reason}")]
    Registration { module: String, reason: String },
    #[error("publish failed: {0}")]
    Publish(String),
    #[error("engine not available")]
    Unavailable,
}

impl EngineError {
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::Start(_) => "start",
            Self::Stop(_) => "stop",
            Self::Registration { .. } => "registration",
            Self::Publish(_) => "publish",
            Self::Unavailable => "unavailable",
        }
    }
}
