//! Boundary to the voice-assistant engine.
//!
//! The bus never looks inside the engine. It publishes envelopes into the
//! engine's message broker, receives envelopes the engine emits through a
//! subscribed handler, and opens named byte streams for audio.

use std::io;
use std::sync::Arc;

use serde_json::Value;

use crate::errors::EngineError;

/// Direction of an engine-side stream, from the bus's point of view.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamMode {
    /// The bus reads bytes the engine produces.
    Read,
    /// The bus writes bytes the engine consumes.
    Write,
}

/// An open engine-side byte stream.
pub trait EngineStream: Send {
    /// Read up to `buf.len()` bytes. `Ok(0)` means end of stream.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    fn write(&mut self, data: &[u8]) -> io::Result<()>;
    fn is_closed(&self) -> bool;
    fn close(&mut self);
}

/// Callback receiving raw envelopes emitted by the engine.
pub type MessageHandler = Arc<dyn Fn(String) + Send + Sync>;

pub trait MessageBroker: Send + Sync {
    fn publish(&self, raw: &str) -> Result<(), EngineError>;
    fn subscribe(&self, handler: MessageHandler);
    /// `None` when the engine has no stream with this id.
    fn open_stream(&self, stream_id: &str, mode: StreamMode) -> Option<Box<dyn EngineStream>>;
}

/// A platform module handed to the engine during startup.
pub trait PlatformModule: Send + Sync {
    fn name(&self) -> &str;
}

pub trait Engine: Send + Sync {
    /// Apply the ordered engine configuration blobs.
    fn configure(&self, config: &[Value]) -> Result<(), EngineError>;
    fn register_module(&self, module: Arc<dyn PlatformModule>) -> Result<(), EngineError>;
    fn start(&self) -> Result<(), EngineError>;
    fn stop(&self) -> Result<(), EngineError>;
    fn dispose(&self);
    fn broker(&self) -> Arc<dyn MessageBroker>;
}

pub trait EngineFactory: Send + Sync {
    fn create(&self) -> Result<Arc<dyn Engine>, EngineError>;
}

impl<F> EngineFactory for F
where
    F: Fn() -> Result<Arc<dyn Engine>, EngineError> + Send + Sync,
{
    fn create(&self) -> Result<Arc<dyn Engine>, EngineError> {
        self()
    }
}
