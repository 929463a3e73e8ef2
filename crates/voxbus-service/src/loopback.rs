//! In-process engine for local runs and tests.
//!
//! Keeps engine properties in memory and answers the property protocol the
//! way a real engine does. Read streams serve bytes queued with
//! [`LoopbackBroker::queue_stream`]; write streams are captured.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use voxbus_core::engine::{
    Engine, EngineStream, MessageBroker, MessageHandler, PlatformModule, StreamMode,
};
use voxbus_core::envelope::EnvelopeCodec;
use voxbus_core::errors::EngineError;
use voxbus_core::topics::{action::property_manager as prop, key, topic};

pub struct LoopbackBroker {
    codec: EnvelopeCodec,
    handlers: RwLock<Vec<MessageHandler>>,
    published: Mutex<Vec<String>>,
    properties: Mutex<HashMap<String, String>>,
    read_streams: Mutex<HashMap<String, Vec<u8>>>,
    written: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl LoopbackBroker {
    pub fn new(codec: EnvelopeCodec) -> Self {
        Self {
            codec,
            handlers: RwLock::new(Vec::new()),
            published: Mutex::new(Vec::new()),
            properties: Mutex::new(HashMap::new()),
            read_streams: Mutex::new(HashMap::new()),
            written: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Deliver `raw` to subscribers as if the engine emitted it.
    pub fn emit(&self, raw: &str) {
        for handler in self.handlers.read().iter() {
            handler(raw.to_owned());
        }
    }

    /// Build an envelope and emit it.
    pub fn emit_message(&self, reply_to_id: &str, topic: &str, action: &str, payload: Value) {
        match self.codec.build_value(reply_to_id, topic, action, payload) {
            Ok((_, raw)) => self.emit(&raw),
            Err(e) => warn!(error = %e, "loopback failed to build envelope"),
        }
    }

    pub fn published(&self) -> Vec<String> {
        self.published.lock().clone()
    }

    pub fn property(&self, name: &str) -> Option<String> {
        self.properties.lock().get(name).cloned()
    }

    pub fn set_property(&self, name: &str, value: &str) {
        let _ = self
            .properties
            .lock()
            .insert(name.to_owned(), value.to_owned());
    }

    /// Bytes the next read stream `stream_id` will produce.
    pub fn queue_stream(&self, stream_id: &str, data: Vec<u8>) {
        let _ = self.read_streams.lock().insert(stream_id.to_owned(), data);
    }

    /// Bytes written so far into stream `stream_id`.
    pub fn written(&self, stream_id: &str) -> Vec<u8> {
        self.written
            .lock()
            .get(stream_id)
            .cloned()
            .unwrap_or_default()
    }

    fn answer_property(&self, raw: &str) {
        let Ok(envelope) = self.codec.parse(raw) else {
            return;
        };
        if envelope.topic != topic::PROPERTY_MANAGER {
            return;
        }
        let Some(name) = envelope.payload_str(key::NAME).map(str::to_owned) else {
            return;
        };
        match envelope.action.as_str() {
            prop::GET_PROPERTY => {
                let value = self.property(&name).unwrap_or_default();
                self.emit_message(
                    envelope.id.as_str(),
                    topic::PROPERTY_MANAGER,
                    prop::GET_PROPERTY,
                    json!({ "name": name, "value": value }),
                );
            }
            prop::SET_PROPERTY => {
                let value = envelope.payload_str(key::VALUE).unwrap_or_default().to_owned();
                self.set_property(&name, &value);
                self.emit_message(
                    "",
                    topic::PROPERTY_MANAGER,
                    prop::PROPERTY_STATE_CHANGED,
                    json!({ "name": name, "value": value, "state": "SUCCEEDED" }),
                );
                self.emit_message(
                    "",
                    topic::PROPERTY_MANAGER,
                    prop::PROPERTY_CHANGED,
                    json!({ "name": name, "newValue": value }),
                );
            }
            _ => {}
        }
    }
}

impl MessageBroker for LoopbackBroker {
    fn publish(&self, raw: &str) -> Result<(), EngineError> {
        self.published.lock().push(raw.to_owned());
        self.answer_property(raw);
        Ok(())
    }

    fn subscribe(&self, handler: MessageHandler) {
        self.handlers.write().push(handler);
    }

    fn open_stream(&self, stream_id: &str, mode: StreamMode) -> Option<Box<dyn EngineStream>> {
        match mode {
            StreamMode::Read => {
                let data = self.read_streams.lock().remove(stream_id)?;
                Some(Box::new(MemoryStream {
                    data,
                    pos: 0,
                    closed: false,
                    sink: None,
                }))
            }
            StreamMode::Write => Some(Box::new(MemoryStream {
                data: Vec::new(),
                pos: 0,
                closed: false,
                sink: Some((stream_id.to_owned(), self.written.clone())),
            })),
        }
    }
}

type WrittenStreams = Arc<Mutex<HashMap<String, Vec<u8>>>>;

struct MemoryStream {
    data: Vec<u8>,
    pos: usize,
    closed: bool,
    sink: Option<(String, WrittenStreams)>,
}

impl EngineStream for MemoryStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = &self.data[self.pos..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.pos += n;
        Ok(n)
    }

    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        let Some((id, written)) = &self.sink else {
            return Err(io::Error::new(io::ErrorKind::Unsupported, "read-only stream"));
        };
        written
            .lock()
            .entry(id.clone())
            .or_default()
            .extend_from_slice(data);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

/// Engine whose broker is a [`LoopbackBroker`].
pub struct LoopbackEngine {
    broker: Arc<LoopbackBroker>,
    config: Mutex<Vec<Value>>,
    modules: Mutex<Vec<String>>,
    started: AtomicBool,
    disposed: AtomicBool,
    fail_start: AtomicBool,
}

impl LoopbackEngine {
    pub fn new(codec: EnvelopeCodec) -> Self {
        Self {
            broker: Arc::new(LoopbackBroker::new(codec)),
            config: Mutex::new(Vec::new()),
            modules: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            fail_start: AtomicBool::new(false),
        }
    }

    /// Make the next `start` fail.
    pub fn fail_next_start(&self) {
        self.fail_start.store(true, Ordering::SeqCst);
    }

    pub fn loopback(&self) -> &Arc<LoopbackBroker> {
        &self.broker
    }

    pub fn configuration(&self) -> Vec<Value> {
        self.config.lock().clone()
    }

    pub fn module_names(&self) -> Vec<String> {
        self.modules.lock().clone()
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

impl Engine for LoopbackEngine {
    fn configure(&self, config: &[Value]) -> Result<(), EngineError> {
        if config.iter().any(|c| !c.is_object()) {
            return Err(EngineError::Configuration(
                "every engine configuration entry must be an object".into(),
            ));
        }
        *self.config.lock() = config.to_vec();
        debug!(entries = config.len(), "loopback engine configured");
        Ok(())
    }

    fn register_module(&self, module: Arc<dyn PlatformModule>) -> Result<(), EngineError> {
        self.modules.lock().push(module.name().to_string());
        Ok(())
    }

    fn start(&self) -> Result<(), EngineError> {
        if self.fail_start.swap(false, Ordering::SeqCst) {
            return Err(EngineError::Start("loopback start failure requested".into()));
        }
        self.started.store(true, Ordering::SeqCst);
        info!("loopback engine started");
        Ok(())
    }

    fn stop(&self) -> Result<(), EngineError> {
        self.started.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
        self.broker.handlers.write().clear();
    }

    fn broker(&self) -> Arc<dyn MessageBroker> {
        self.broker.clone()
    }
}
