use voxbus_core::ids::{ResourceId, TransferId};
use voxbus_core::target::Target;

/// An IPC delivery to one component, or a broadcast when `target` is `None`.
#[derive(Clone, Debug, PartialEq)]
pub struct Intent {
    pub action: String,
    pub category: String,
    pub target: Option<Target>,
    pub body: IntentBody,
}

#[derive(Clone, Debug, PartialEq)]
pub enum IntentBody {
    /// The envelope travels inside the intent.
    Embedded { message: String },
    /// The envelope is cached by the sender; the receiver pulls it by
    /// `resource_id` and acknowledges.
    Streamed {
        transfer_id: TransferId,
        resource_id: ResourceId,
        size: usize,
    },
    /// Lifecycle state broadcast.
    State { state: String },
    Empty,
}

/// Builds IPC action and category names from topic/action pairs.
#[derive(Clone, Debug)]
pub struct IntentNames {
    prefix: String,
}

impl IntentNames {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// `prefix + action`
    pub fn action(&self, action: &str) -> String {
        format!("{}{}", self.prefix, action)
    }

    /// `prefix + topic`
    pub fn category(&self, topic: &str) -> String {
        format!("{}{}", self.prefix, topic)
    }

    pub fn message(&self, topic: &str, action: &str, target: Option<Target>, body: IntentBody) -> Intent {
        Intent {
            action: self.action(action),
            category: self.category(topic),
            target,
            body,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voxbus_core::target::TargetKind;

    #[test]
    fn names_are_prefixed() {
        let names = IntentNames::new("voxbus.bus.");
        assert_eq!(names.action("Play"), "voxbus.bus.Play");
        assert_eq!(names.category("AudioOutput"), "voxbus.bus.AudioOutput");
    }

    #[test]
    fn message_intent_carries_target() {
        let names = IntentNames::new("p.");
        let target = Target::new("com.example", None, TargetKind::Receiver);
        let intent = names.message(
            "T",
            "A",
            Some(target.clone()),
            IntentBody::Embedded {
                message: "{}".into(),
            },
        );
        assert_eq!(intent.action, "p.A");
        assert_eq!(intent.category, "p.T");
        assert_eq!(intent.target, Some(target));
    }
}
