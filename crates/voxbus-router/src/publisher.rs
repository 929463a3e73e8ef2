use std::sync::Arc;

use serde_json::Value;
use tracing::{trace, warn};
use voxbus_core::engine::MessageBroker;
use voxbus_core::envelope::{Envelope, EnvelopeCodec};
use voxbus_core::ids::MessageId;
use voxbus_telemetry::{Direction, TrafficLog};

use crate::errors::PublishError;

/// Builds envelopes and hands them to the engine. Safe to call from any
/// thread; never resolves targets.
pub struct EnginePublisher {
    codec: EnvelopeCodec,
    broker: Arc<dyn MessageBroker>,
    traffic: Option<Arc<TrafficLog>>,
}

impl EnginePublisher {
    pub fn new(
        codec: EnvelopeCodec,
        broker: Arc<dyn MessageBroker>,
        traffic: Option<Arc<TrafficLog>>,
    ) -> Self {
        Self {
            codec,
            broker,
            traffic,
        }
    }

    pub fn codec(&self) -> &EnvelopeCodec {
        &self.codec
    }

    /// Build an envelope from payload text. Empty text means no payload.
    pub fn publish(
        &self,
        reply_to_id: &str,
        topic: &str,
        action: &str,
        payload: &str,
    ) -> Result<MessageId, PublishError> {
        let (id, raw) = self.codec.build(reply_to_id, topic, action, payload)?;
        self.send(&id, reply_to_id, topic, action, &raw)?;
        Ok(id)
    }

    pub fn publish_value(
        &self,
        reply_to_id: &str,
        topic: &str,
        action: &str,
        payload: Value,
    ) -> Result<MessageId, PublishError> {
        let (id, raw) = self.codec.build_value(reply_to_id, topic, action, payload)?;
        self.send(&id, reply_to_id, topic, action, &raw)?;
        Ok(id)
    }

    /// Build without sending, so callers can register for the reply first.
    pub fn prepare(
        &self,
        topic: &str,
        action: &str,
        payload: Value,
    ) -> Result<(MessageId, String), PublishError> {
        Ok(self.codec.build_value("", topic, action, payload)?)
    }

    pub fn send_prepared(&self, id: &MessageId, topic: &str, action: &str, raw: &str) -> Result<(), PublishError> {
        self.send(id, "", topic, action, raw)
    }

    /// Forward an already-encoded envelope received from a component.
    pub fn forward(&self, envelope: &Envelope, raw: &str) -> Result<(), PublishError> {
        let reply_to = envelope.reply_to_id.as_ref().map(MessageId::as_str).unwrap_or("");
        self.send(&envelope.id, reply_to, &envelope.topic, &envelope.action, raw)
    }

    fn send(
        &self,
        id: &MessageId,
        reply_to_id: &str,
        topic: &str,
        action: &str,
        raw: &str,
    ) -> Result<(), PublishError> {
        if let Some(traffic) = &self.traffic {
            traffic.record(
                Direction::ToEngine,
                topic,
                action,
                id.as_str(),
                (!reply_to_id.is_empty()).then_some(reply_to_id),
                raw.len(),
            );
        }
        trace!(topic, action, message_id = %id, "publishing to engine");
        self.broker.publish(raw).map_err(|e| {
            warn!(topic, action, error = %e, "engine rejected publish");
            PublishError::from(e)
        })
    }
}
