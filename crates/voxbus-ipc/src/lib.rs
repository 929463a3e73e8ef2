//! Component IPC for the bus: intents, the channel and directory seams,
//! size-agnostic sending, and the inbound receiver.

pub mod channel;
pub mod errors;
pub mod intent;
pub mod memory;
pub mod pipe;
pub mod receiver;
pub mod sender;

pub use channel::{ComponentChannel, ComponentDirectory};
pub use errors::ChannelError;
pub use intent::{Intent, IntentBody, IntentNames};
pub use memory::{ComponentRegistration, LocalComponentBus};
pub use pipe::{CaptureHandle, CapturePipe, PipeCloser, PipeSink, PipeSource, PipeWriter};
pub use receiver::{Inbound, Receiver, ReceiverHandle};
pub use sender::{SendOutcome, Sender};
