use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("stream {0} is already open")]
    DuplicateStream(String),
    #[error("engine has no stream {0}")]
    NoEngineStream(String),
    #[error("{0} pool is shut down")]
    PoolClosed(&'static str),
}

impl StreamError {
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::DuplicateStream(_) => "duplicate_stream",
            Self::NoEngineStream(_) => "no_engine_stream",
            Self::PoolClosed(_) => "pool_closed",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PropertyError {
    #[error("no reply for property {name} within {timeout:?}")]
    Timeout { name: String, timeout: Duration },
    #[error("engine rejected property {name}")]
    Rejected { name: String },
    #[error("failed to publish property request: {0}")]
    Publish(String),
    #[error("malformed property reply: {0}")]
    MalformedReply(String),
    #[error("property request abandoned")]
    Abandoned,
}

impl PropertyError {
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::Rejected { .. } => "rejected",
            Self::Publish(_) => "publish",
            Self::MalformedReply(_) => "malformed_reply",
            Self::Abandoned => "abandoned",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error(transparent)]
    Envelope(#[from] voxbus_core::errors::EnvelopeError),
    #[error(transparent)]
    Engine(#[from] voxbus_core::errors::EngineError),
}
