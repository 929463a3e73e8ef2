//! Inbound side: everything components send to the bus lands here and is
//! queued, in order, for the service control loop.

use std::fmt;
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};
use voxbus_core::ids::{ResourceId, TransferId};
use voxbus_core::target::Target;

use crate::errors::ChannelError;
use crate::pipe::{PipeSink, PipeSource};

/// A request from a component.
pub enum Inbound {
    /// Envelope destined for the engine.
    Message(String),
    /// Configuration document (file paths and/or inline strings).
    Configuration(String),
    /// Secondary configuration that completes a pending configuration.
    ExtraConfiguration(String),
    /// Host start request. `new_config` is false when the host has nothing
    /// newer than the saved configuration.
    Launch { new_config: bool },
    /// Fill `sink` with bytes from the engine stream `stream_id`.
    FetchStream { stream_id: String, sink: PipeSink },
    CancelFetch { stream_id: String },
    /// Drain `source` into the engine stream `stream_id`.
    PushStream {
        stream_id: String,
        source: Box<dyn PipeSource>,
    },
    /// `{"bufferedBytes": n}` report from the external audio output.
    BufferedBytesReport(String),
    /// Toggle mirroring of one OS-level property.
    SyncPropertyEnablement { name: String, enabled: bool },
    /// Ask for the current lifecycle state to be sent to `reply_to`.
    Ping { reply_to: Target },
    /// A component pulls an oversized envelope the bus cached for it.
    FetchCachedMessage {
        resource_id: ResourceId,
        sink: PipeSink,
    },
    /// A component confirms (or rejects) receipt of a cached envelope.
    AcknowledgeCachedMessage {
        resource_id: ResourceId,
        success: bool,
    },
    Shutdown,
}

impl Inbound {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Message(_) => "message",
            Self::Configuration(_) => "configuration",
            Self::ExtraConfiguration(_) => "extra_configuration",
            Self::Launch { .. } => "launch",
            Self::FetchStream { .. } => "fetch_stream",
            Self::CancelFetch { .. } => "cancel_fetch",
            Self::PushStream { .. } => "push_stream",
            Self::BufferedBytesReport(_) => "buffered_bytes_report",
            Self::SyncPropertyEnablement { .. } => "sync_property_enablement",
            Self::Ping { .. } => "ping",
            Self::FetchCachedMessage { .. } => "fetch_cached_message",
            Self::AcknowledgeCachedMessage { .. } => "acknowledge_cached_message",
            Self::Shutdown => "shutdown",
        }
    }
}

impl fmt::Debug for Inbound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FetchStream { stream_id, .. }
            | Self::CancelFetch { stream_id }
            | Self::PushStream { stream_id, .. } => {
                write!(f, "Inbound::{}({stream_id})", self.kind())
            }
            _ => write!(f, "Inbound::{}", self.kind()),
        }
    }
}

/// Factory for the inbound queue.
pub struct Receiver;

impl Receiver {
    /// Create a handle for transports and the queue the control loop drains.
    /// The handle rejects input until [`ReceiverHandle::open`] is called.
    pub fn channel() -> (ReceiverHandle, mpsc::UnboundedReceiver<Inbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            ReceiverHandle {
                tx,
                accepting: Arc::new(AtomicBool::new(false)),
            },
            rx,
        )
    }
}

/// Cloneable entry point used by transports.
#[derive(Clone)]
pub struct ReceiverHandle {
    tx: mpsc::UnboundedSender<Inbound>,
    accepting: Arc<AtomicBool>,
}

impl ReceiverHandle {
    pub fn deliver(&self, inbound: Inbound) -> Result<(), ChannelError> {
        if !self.is_accepting() {
            debug!(kind = inbound.kind(), "receiver closed, rejecting");
            return Err(ChannelError::Closed);
        }
        self.tx.send(inbound).map_err(|_| ChannelError::Closed)
    }

    /// Read a streamed envelope from `source` to EOF and queue it as a
    /// regular message.
    pub fn deliver_streamed(
        &self,
        transfer_id: &TransferId,
        mut source: impl Read,
    ) -> Result<(), ChannelError> {
        if !self.is_accepting() {
            return Err(ChannelError::Closed);
        }
        let mut message = String::new();
        if let Err(e) = source.read_to_string(&mut message) {
            warn!(%transfer_id, error = %e, "failed to read streamed message");
            return Err(e.into());
        }
        debug!(%transfer_id, bytes = message.len(), "streamed message received");
        self.deliver(Inbound::Message(message))
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    pub fn open(&self) {
        self.accepting.store(true, Ordering::Release);
    }

    /// Stop accepting input. Already queued items stay queued.
    pub fn close(&self) {
        self.accepting.store(false, Ordering::Release);
    }
}
