//! Central routing between the engine and components.
//!
//! Engine messages are either consumed by a local handler or forwarded to
//! resolved targets. Component messages get their side-channel updates
//! applied and are then published into the engine.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{json, Value};
use tracing::{debug, error, info, trace, warn};
use voxbus_core::envelope::{Envelope, EnvelopeCodec};
use voxbus_core::ids::MessageId;
use voxbus_core::topics::{action, audio_type_for_channel, key, topic};
use voxbus_ipc::Sender;
use voxbus_settings::DefaultHandlerSettings;
use voxbus_telemetry::{Direction, TrafficLog};

use crate::client_state::ClientStateTracker;
use crate::errors::PublishError;
use crate::focus::MediaStateTracker;
use crate::handlers::LocalHandlers;
use crate::properties::PropertyManager;
use crate::publisher::EnginePublisher;
use crate::resolver::TargetResolver;
use crate::system::SystemPropertySync;

/// What happened to an engine message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Disposition {
    /// Consumed by the named local handler.
    Local(&'static str),
    /// Answered directly from bus state.
    Replied,
    /// Sent to this many targets.
    Forwarded { targets: usize },
    Dropped(&'static str),
}

pub struct DispatcherParts {
    pub publisher: Arc<EnginePublisher>,
    pub resolver: Arc<TargetResolver>,
    pub sender: Arc<Sender>,
    pub handlers: LocalHandlers,
    pub defaults: DefaultHandlerSettings,
    pub properties: Arc<PropertyManager>,
    pub system: Arc<SystemPropertySync>,
    pub client_state: Arc<ClientStateTracker>,
    pub media: Arc<MediaStateTracker>,
    pub traffic: Option<Arc<TrafficLog>>,
}

pub struct Dispatcher {
    publisher: Arc<EnginePublisher>,
    resolver: Arc<TargetResolver>,
    sender: Arc<Sender>,
    handlers: LocalHandlers,
    defaults: DefaultHandlerSettings,
    properties: Arc<PropertyManager>,
    system: Arc<SystemPropertySync>,
    client_state: Arc<ClientStateTracker>,
    media: Arc<MediaStateTracker>,
    traffic: Option<Arc<TrafficLog>>,
    // Written only from the dispatch path.
    buffered_bytes: AtomicI64,
    audio_input_types: Mutex<HashMap<String, String>>,
}

impl Dispatcher {
    pub fn new(parts: DispatcherParts) -> Self {
        Self {
            publisher: parts.publisher,
            resolver: parts.resolver,
            sender: parts.sender,
            handlers: parts.handlers,
            defaults: parts.defaults,
            properties: parts.properties,
            system: parts.system,
            client_state: parts.client_state,
            media: parts.media,
            traffic: parts.traffic,
            buffered_bytes: AtomicI64::new(0),
            audio_input_types: Mutex::new(HashMap::new()),
        }
    }

    fn codec(&self) -> &EnvelopeCodec {
        self.publisher.codec()
    }

    pub fn sender(&self) -> &Arc<Sender> {
        &self.sender
    }

    pub fn resolver(&self) -> &Arc<TargetResolver> {
        &self.resolver
    }

    pub fn properties(&self) -> &Arc<PropertyManager> {
        &self.properties
    }

    pub fn system(&self) -> &Arc<SystemPropertySync> {
        &self.system
    }

    pub fn client_state(&self) -> &Arc<ClientStateTracker> {
        &self.client_state
    }

    pub fn media(&self) -> &Arc<MediaStateTracker> {
        &self.media
    }

    pub fn buffered_bytes(&self) -> i64 {
        self.buffered_bytes.load(Ordering::Relaxed)
    }

    /// Route a message the engine emitted.
    pub fn on_engine_message(&self, raw: &str) -> Disposition {
        let envelope = match self.codec().parse(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                error!(error = %e, kind = e.error_kind(), "dropping unparseable engine message");
                return Disposition::Dropped("parse_error");
            }
        };
        if envelope.action != action::audio_output::GET_NUM_BYTES_BUFFERED {
            trace!(topic = %envelope.topic, action = %envelope.action, "engine message");
        }
        if let Some(traffic) = &self.traffic {
            traffic.record(
                Direction::FromEngine,
                &envelope.topic,
                &envelope.action,
                envelope.id.as_str(),
                envelope.reply_to_id.as_ref().map(MessageId::as_str),
                raw.len(),
            );
        }

        match envelope.topic.as_str() {
            topic::AUDIO_OUTPUT => {
                if let Some(disposition) = self.audio_output(&envelope) {
                    return disposition;
                }
            }
            topic::AUDIO_INPUT => {
                if let Some(disposition) = self.audio_input(&envelope) {
                    return disposition;
                }
            }
            topic::ALEXA_CLIENT => {
                let _ = self.client_state.handle(&envelope);
                return Disposition::Local("alexa_client");
            }
            topic::CUSTOM_DOMAIN => {
                if self.defaults.use_default_custom_domain_message_dispatcher {
                    if let Some(handler) = &self.handlers.custom_domain {
                        handler.handle(raw, &envelope);
                        return Disposition::Local("custom_domain");
                    }
                    warn!("local custom domain dispatch enabled but no handler installed, forwarding");
                }
            }
            topic::PROPERTY_MANAGER => self.property_message(&envelope),
            _ => {}
        }

        self.forward(&envelope, raw)
    }

    fn audio_output(&self, envelope: &Envelope) -> Option<Disposition> {
        let audio_type = envelope
            .payload_str(key::CHANNEL)
            .and_then(audio_type_for_channel);
        if let Some(audio_type) = audio_type {
            if self.defaults.audio_output_enabled(audio_type) {
                if let Some(handler) = &self.handlers.audio_output {
                    info!(audio_type, "routing audio output to local handler");
                    handler.handle(envelope, &self.publisher);
                    return Some(Disposition::Local("audio_output"));
                }
                warn!(audio_type, "local audio output enabled but no handler installed");
            }
        }
        if envelope.action == action::audio_output::GET_NUM_BYTES_BUFFERED {
            self.reply_buffered_bytes(envelope.id.as_str());
            return Some(Disposition::Replied);
        }
        None
    }

    fn audio_input(&self, envelope: &Envelope) -> Option<Disposition> {
        let Some(stream_id) = envelope.payload_str(key::STREAM_ID) else {
            warn!(action = %envelope.action, "audio input message without streamId");
            return None;
        };
        let audio_type = match envelope.payload_str(key::TYPE) {
            Some(t) => {
                let _ = self
                    .audio_input_types
                    .lock()
                    .insert(stream_id.to_owned(), t.to_owned());
                Some(t.to_owned())
            }
            None => self.audio_input_types.lock().remove(stream_id),
        };
        let audio_type = audio_type?;
        if !self.defaults.audio_input_enabled(&audio_type) {
            return None;
        }
        match &self.handlers.audio_input {
            Some(handler) => {
                info!(%audio_type, stream_id, "routing audio input to local handler");
                handler.handle(envelope, &self.publisher);
                Some(Disposition::Local("audio_input"))
            }
            None => {
                warn!(%audio_type, "local audio input enabled but no handler installed");
                None
            }
        }
    }

    fn property_message(&self, envelope: &Envelope) {
        let _ = self.properties.on_engine_message(envelope);
        if envelope.action != action::property_manager::PROPERTY_CHANGED {
            return;
        }
        match (
            envelope.payload_str(key::NAME),
            envelope.payload_str(key::NEW_VALUE),
        ) {
            (Some(name), Some(value)) => {
                let _ = self.system.apply_engine_change(name, value);
            }
            _ => warn!("PropertyChanged payload missing name or newValue"),
        }
    }

    fn forward(&self, envelope: &Envelope, raw: &str) -> Disposition {
        let targets = self.resolver.resolve(&envelope.topic, &envelope.action);
        if targets.is_empty() {
            warn!(topic = %envelope.topic, action = %envelope.action, "no target, dropping message");
            return Disposition::Dropped("no_targets");
        }
        let outcome = self
            .sender
            .send_any_size(raw, &envelope.topic, &envelope.action, &targets);
        let delivered = match outcome {
            voxbus_ipc::SendOutcome::Embedded { delivered } => delivered,
            voxbus_ipc::SendOutcome::Streamed { delivered, .. } => delivered,
        };
        Disposition::Forwarded { targets: delivered }
    }

    fn reply_buffered_bytes(&self, reply_to_id: &str) {
        let payload = json!({ "bufferedBytes": self.buffered_bytes() });
        if let Err(e) = self.publisher.publish_value(
            reply_to_id,
            topic::AUDIO_OUTPUT,
            action::audio_output::GET_NUM_BYTES_BUFFERED,
            payload,
        ) {
            warn!(error = %e, "failed to answer GetNumBytesBuffered");
        }
    }

    /// A component sent a message for the engine.
    pub fn on_external_message(&self, raw: &str) -> Result<(), PublishError> {
        let envelope = self.codec().parse(raw).map_err(|e| {
            warn!(error = %e, kind = e.error_kind(), "dropping unparseable component message");
            PublishError::from(e)
        })?;
        if envelope.topic == topic::AUDIO_OUTPUT
            && envelope.action == action::audio_output::MEDIA_STATE_CHANGED
        {
            match (envelope.payload_str(key::CHANNEL), envelope.payload_str(key::STATE)) {
                (Some(channel), Some(state)) => self.media.set_media_state(channel, state),
                _ => warn!("MediaStateChanged without channel or state"),
            }
        }
        self.publisher.forward(&envelope, raw)
    }

    /// Build and publish a new envelope into the engine.
    pub fn publish(
        &self,
        reply_to_id: &str,
        topic: &str,
        action: &str,
        payload: &str,
    ) -> Result<MessageId, PublishError> {
        self.publisher.publish(reply_to_id, topic, action, payload)
    }

    /// Store a `{"bufferedBytes": n}` report. Returns whether it parsed.
    pub fn update_buffered_bytes(&self, report: &str) -> bool {
        let parsed = serde_json::from_str::<Value>(report)
            .ok()
            .and_then(|v| match v.get(key::BUFFERED_BYTES)? {
                Value::Number(n) => n.as_i64(),
                Value::String(s) => s.trim().parse().ok(),
                _ => None,
            });
        match parsed {
            Some(n) => {
                self.buffered_bytes.store(n, Ordering::Relaxed);
                debug!(buffered_bytes = n, "buffered bytes updated");
                true
            }
            None => {
                warn!(report, "invalid buffered bytes report");
                false
            }
        }
    }

    /// Forget per-stream state held for audio input.
    pub fn clear_audio_input_bindings(&self) {
        self.audio_input_types.lock().clear();
    }

    pub fn audio_input_binding(&self, stream_id: &str) -> Option<String> {
        self.audio_input_types.lock().get(stream_id).cloned()
    }
}
