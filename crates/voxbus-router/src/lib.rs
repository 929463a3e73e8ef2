//! Routing core of the bus: target resolution, the dispatcher, audio
//! streams, and engine property access.

pub mod client_state;
pub mod dispatcher;
pub mod errors;
pub mod focus;
pub mod handlers;
pub mod properties;
pub mod publisher;
pub mod resolver;
pub mod streams;
pub mod system;

#[cfg(test)]
mod testing;

pub use dispatcher::{Disposition, Dispatcher, DispatcherParts};
pub use errors::{PropertyError, PublishError, StreamError};
pub use handlers::{AudioInputHandler, AudioOutputHandler, CustomDomainHandler, LocalHandlers};
pub use publisher::EnginePublisher;
pub use resolver::{TargetCache, TargetResolver};
pub use streams::StreamManager;
