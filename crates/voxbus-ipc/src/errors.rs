use voxbus_core::ids::ResourceId;

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("delivery to {target} failed: {reason}")]
    Delivery { target: String, reason: String },
    #[error("unknown component: {0}")]
    UnknownComponent(String),
    #[error("no cached message for resource {0}")]
    UnknownResource(ResourceId),
    #[error("receiver is closed")]
    Closed,
    #[error("pipe I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

impl ChannelError {
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Delivery { .. } => "delivery",
            Self::UnknownComponent(_) => "unknown_component",
            Self::UnknownResource(_) => "unknown_resource",
            Self::Closed => "closed",
            Self::Io(_) => "io",
        }
    }
}
