use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::EnvelopeError;
use crate::ids::MessageId;

/// A decoded bus message.
///
/// `payload` is `Value::Null` when the envelope carried no payload; callers
/// treat that as the empty payload.
#[derive(Clone, Debug, PartialEq)]
pub struct Envelope {
    pub id: MessageId,
    pub topic: String,
    pub action: String,
    pub reply_to_id: Option<MessageId>,
    pub payload: Value,
}

impl Envelope {
    pub fn has_payload(&self) -> bool {
        !self.payload.is_null()
    }

    /// Payload re-serialized as text, or an empty string when absent.
    pub fn payload_text(&self) -> String {
        if self.payload.is_null() {
            String::new()
        } else {
            self.payload.to_string()
        }
    }

    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }

    pub fn is_reply(&self) -> bool {
        self.reply_to_id.is_some()
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEnvelope {
    header: WireHeader,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    payload: Value,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireHeader {
    id: String,
    message_description: WireDescription,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireDescription {
    topic: String,
    action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reply_to_id: Option<String>,
}

/// Parses and builds the nested JSON envelope used on the bus.
#[derive(Clone, Debug)]
pub struct EnvelopeCodec {
    namespace_prefix: String,
}

impl EnvelopeCodec {
    /// `namespace` is the implementation-local prefix (e.g. `voxbus`) that
    /// internal callers may put in front of topics and actions. It is
    /// stripped before anything reaches the wire.
    pub fn new(namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        let namespace_prefix = if namespace.is_empty() {
            String::new()
        } else {
            format!("{namespace}.")
        };
        Self { namespace_prefix }
    }

    pub fn parse(&self, raw: &str) -> Result<Envelope, EnvelopeError> {
        let wire: WireEnvelope = serde_json::from_str(raw).map_err(EnvelopeError::Malformed)?;
        let desc = wire.header.message_description;
        if wire.header.id.is_empty() {
            return Err(EnvelopeError::MissingField("id"));
        }
        if desc.topic.is_empty() {
            return Err(EnvelopeError::MissingField("topic"));
        }
        if desc.action.is_empty() {
            return Err(EnvelopeError::MissingField("action"));
        }
        Ok(Envelope {
            id: MessageId::from_raw(wire.header.id),
            topic: desc.topic,
            action: desc.action,
            reply_to_id: desc
                .reply_to_id
                .filter(|r| !r.is_empty())
                .map(MessageId::from_raw),
            payload: wire.payload,
        })
    }

    /// Build a fresh envelope. An empty `reply_to_id` or `payload` is omitted
    /// from the output. Returns the generated id with the serialized text.
    pub fn build(
        &self,
        reply_to_id: &str,
        topic: &str,
        action: &str,
        payload: &str,
    ) -> Result<(MessageId, String), EnvelopeError> {
        let payload = if payload.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(payload).map_err(EnvelopeError::InvalidPayload)?
        };
        self.build_value(reply_to_id, topic, action, payload)
    }

    pub fn build_value(
        &self,
        reply_to_id: &str,
        topic: &str,
        action: &str,
        payload: Value,
    ) -> Result<(MessageId, String), EnvelopeError> {
        let id = MessageId::new();
        let wire = WireEnvelope {
            header: WireHeader {
                id: id.as_str().to_owned(),
                message_description: WireDescription {
                    topic: self.strip_namespace(topic).to_owned(),
                    action: self.strip_namespace(action).to_owned(),
                    reply_to_id: (!reply_to_id.is_empty()).then(|| reply_to_id.to_owned()),
                },
            },
            payload,
        };
        let raw = serde_json::to_string(&wire).map_err(EnvelopeError::Serialize)?;
        Ok((id, raw))
    }

    fn strip_namespace<'a>(&self, name: &'a str) -> &'a str {
        if self.namespace_prefix.is_empty() {
            return name;
        }
        name.strip_prefix(self.namespace_prefix.as_str()).unwrap_or(name)
    }
}

impl Default for EnvelopeCodec {
    fn default() -> Self {
        Self::new("voxbus")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn codec() -> EnvelopeCodec {
        EnvelopeCodec::new("voxbus")
    }

    #[test]
    fn parse_without_payload_is_empty() {
        let raw = r#"{"header":{"id":"m1","messageDescription":{"topic":"AudioOutput","action":"Play"}}}"#;
        let env = codec().parse(raw).unwrap();
        assert_eq!(env.topic, "AudioOutput");
        assert_eq!(env.action, "Play");
        assert!(!env.has_payload());
        assert_eq!(env.payload_text(), "");
        assert!(env.reply_to_id.is_none());
    }

    #[test]
    fn parse_null_payload_is_empty() {
        let raw = r#"{"header":{"id":"m1","messageDescription":{"topic":"T","action":"A"}},"payload":null}"#;
        let env = codec().parse(raw).unwrap();
        assert!(!env.has_payload());
    }

    #[test]
    fn parse_reads_reply_to_id() {
        let raw = r#"{"header":{"id":"m2","messageDescription":{"topic":"T","action":"A","replyToId":"m1"}},"payload":{"x":1}}"#;
        let env = codec().parse(raw).unwrap();
        assert_eq!(env.reply_to_id.as_ref().map(MessageId::as_str), Some("m1"));
        assert_eq!(env.payload, json!({"x": 1}));
    }

    #[test]
    fn parse_empty_reply_to_id_is_none() {
        let raw = r#"{"header":{"id":"m2","messageDescription":{"topic":"T","action":"A","replyToId":""}}}"#;
        assert!(codec().parse(raw).unwrap().reply_to_id.is_none());
    }

    #[test]
    fn parse_rejects_garbage() {
        let err = codec().parse("not json").unwrap_err();
        assert!(matches!(err, EnvelopeError::Malformed(_)));
    }

    #[test]
    fn parse_rejects_missing_header() {
        let err = codec().parse(r#"{"payload":{}}"#).unwrap_err();
        assert!(matches!(err, EnvelopeError::Malformed(_)));
    }

    #[test]
    fn parse_rejects_empty_topic() {
        let raw = r#"{"header":{"id":"m1","messageDescription":{"topic":"","action":"A"}}}"#;
        let err = codec().parse(raw).unwrap_err();
        assert!(matches!(err, EnvelopeError::MissingField("topic")));
    }

    #[test]
    fn build_then_parse_preserves_fields() {
        let c = codec();
        let (id, raw) = c
            .build("", "AudioOutput", "MediaStateChanged", r#"{"channel":"AudioPlayer","state":"PLAYING"}"#)
            .unwrap();
        let env = c.parse(&raw).unwrap();
        assert_eq!(env.id, id);
        assert_eq!(env.topic, "AudioOutput");
        assert_eq!(env.action, "MediaStateChanged");
        assert_eq!(env.payload, json!({"channel":"AudioPlayer","state":"PLAYING"}));
        assert!(env.reply_to_id.is_none());
    }

    #[test]
    fn build_strips_namespace_prefix() {
        let c = codec();
        let (_, raw) = c.build("", "voxbus.AudioOutput", "voxbus.Play", "").unwrap();
        let env = c.parse(&raw).unwrap();
        assert_eq!(env.topic, "AudioOutput");
        assert_eq!(env.action, "Play");
    }

    #[test]
    fn build_omits_empty_payload_and_reply() {
        let (_, raw) = codec().build("", "T", "A", "").unwrap();
        let v: Value = serde_json::from_str(&raw).unwrap();
        assert!(v.get("payload").is_none());
        assert!(v["header"]["messageDescription"].get("replyToId").is_none());
    }

    #[test]
    fn build_with_reply_sets_reply_to_id() {
        let c = codec();
        let (_, raw) = c.build("abc", "AudioOutput", "GetNumBytesBuffered", r#"{"bufferedBytes":5}"#).unwrap();
        let env = c.parse(&raw).unwrap();
        assert_eq!(env.reply_to_id.unwrap().as_str(), "abc");
    }

    #[test]
    fn build_rejects_invalid_payload() {
        let err = codec().build("", "T", "A", "{not json").unwrap_err();
        assert!(matches!(err, EnvelopeError::InvalidPayload(_)));
    }

    #[test]
    fn build_generates_fresh_ids() {
        let c = codec();
        let (a, _) = c.build("", "T", "A", "").unwrap();
        let (b, _) = c.build("", "T", "A", "").unwrap();
        assert_ne!(a, b);
    }
}
