use std::sync::Arc;

use voxbus_core::envelope::Envelope;

use crate::publisher::EnginePublisher;

/// Built-in audio output used for audio types configured for local handling.
pub trait AudioOutputHandler: Send + Sync {
    fn handle(&self, envelope: &Envelope, publisher: &EnginePublisher);
}

/// Built-in audio input used for audio types configured for local handling.
pub trait AudioInputHandler: Send + Sync {
    fn handle(&self, envelope: &Envelope, publisher: &EnginePublisher);
}

/// Local custom-domain dispatcher. Receives the raw envelope as well, since
/// it re-targets it without re-encoding.
pub trait CustomDomainHandler: Send + Sync {
    fn handle(&self, raw: &str, envelope: &Envelope);
}

#[derive(Clone, Default)]
pub struct LocalHandlers {
    pub audio_output: Option<Arc<dyn AudioOutputHandler>>,
    pub audio_input: Option<Arc<dyn AudioInputHandler>>,
    pub custom_domain: Option<Arc<dyn CustomDomainHandler>>,
}
