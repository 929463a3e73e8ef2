//! Size-agnostic sending.
//!
//! Envelopes up to the embedded limit travel inside the intent. Larger ones
//! are parked in a bounded cache; every target gets a streamed-delivery
//! intent naming the cached resource, pulls the content through a pipe, and
//! acknowledges. The entry leaves the cache once all targets acknowledged,
//! or when newer entries evict it.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use voxbus_core::ids::{ResourceId, TransferId};
use voxbus_core::target::Target;

use crate::channel::ComponentChannel;
use crate::errors::ChannelError;
use crate::intent::{IntentBody, IntentNames};

/// Result of handing an envelope to the sender.
#[derive(Debug)]
pub enum SendOutcome {
    /// Delivered inline to this many targets.
    Embedded { delivered: usize },
    /// Cached under `resource_id`. `completion` resolves to `true` once every
    /// target acknowledged, and errors if the entry was evicted first.
    Streamed {
        resource_id: ResourceId,
        delivered: usize,
        completion: oneshot::Receiver<bool>,
    },
}

struct CachedMessage {
    content: Bytes,
    remaining: usize,
    completion: Option<oneshot::Sender<bool>>,
}

struct SenderCache {
    capacity: usize,
    order: VecDeque<ResourceId>,
    entries: HashMap<ResourceId, CachedMessage>,
}

impl SenderCache {
    fn insert(&mut self, id: ResourceId, entry: CachedMessage) {
        while self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                if self.entries.remove(&oldest).is_some() {
                    warn!(resource_id = %oldest, "evicting unacknowledged streamed message");
                }
            } else {
                break;
            }
        }
        self.order.push_back(id.clone());
        let _ = self.entries.insert(id, entry);
    }

    fn remove(&mut self, id: &ResourceId) -> Option<CachedMessage> {
        self.order.retain(|r| r != id);
        self.entries.remove(id)
    }
}

pub struct Sender {
    channel: Arc<dyn ComponentChannel>,
    names: IntentNames,
    max_embedded_bytes: usize,
    cache: Mutex<SenderCache>,
}

impl Sender {
    pub fn new(
        channel: Arc<dyn ComponentChannel>,
        names: IntentNames,
        max_embedded_bytes: usize,
        cache_capacity: usize,
    ) -> Self {
        Self {
            channel,
            names,
            max_embedded_bytes,
            cache: Mutex::new(SenderCache {
                capacity: cache_capacity.max(1),
                order: VecDeque::new(),
                entries: HashMap::new(),
            }),
        }
    }

    pub fn fits_embedded(&self, message: &str) -> bool {
        message.len() <= self.max_embedded_bytes
    }

    /// Deliver `message` to every target, embedded or streamed by size.
    ///
    /// A failed delivery to one target is logged and does not stop the rest.
    pub fn send_any_size(
        &self,
        message: &str,
        topic: &str,
        action: &str,
        targets: &[Target],
    ) -> SendOutcome {
        if self.fits_embedded(message) {
            let delivered = self.deliver_all(topic, action, targets, || IntentBody::Embedded {
                message: message.to_owned(),
            });
            return SendOutcome::Embedded { delivered };
        }

        let resource_id = ResourceId::new();
        let (tx, rx) = oneshot::channel();
        let size = message.len();
        self.cache.lock().insert(
            resource_id.clone(),
            CachedMessage {
                content: Bytes::copy_from_slice(message.as_bytes()),
                remaining: targets.len(),
                completion: Some(tx),
            },
        );
        info!(%resource_id, size, targets = targets.len(), "streaming oversized message");

        let delivered = self.deliver_all(topic, action, targets, || IntentBody::Streamed {
            transfer_id: TransferId::new(),
            resource_id: resource_id.clone(),
            size,
        });
        SendOutcome::Streamed {
            resource_id,
            delivered,
            completion: rx,
        }
    }

    fn deliver_all(
        &self,
        topic: &str,
        action: &str,
        targets: &[Target],
        body: impl Fn() -> IntentBody,
    ) -> usize {
        let mut delivered = 0;
        for target in targets {
            let intent = self.names.message(topic, action, Some(target.clone()), body());
            match self.channel.send(intent) {
                Ok(()) => delivered += 1,
                Err(e) => warn!(
                    target = %target,
                    topic,
                    action,
                    error = %e,
                    kind = e.error_kind(),
                    "delivery failed"
                ),
            }
        }
        delivered
    }

    /// The cached content for `resource_id`. Cheap to clone; the caller
    /// writes it to the target's pipe off the dispatch path.
    pub fn cached_content(&self, resource_id: &ResourceId) -> Result<Bytes, ChannelError> {
        let cache = self.cache.lock();
        let content = cache
            .entries
            .get(resource_id)
            .map(|e| e.content.clone())
            .ok_or_else(|| ChannelError::UnknownResource(resource_id.clone()))?;
        debug!(%resource_id, bytes = content.len(), "streamed message requested");
        Ok(content)
    }

    /// Record a target's acknowledgement. Failed acknowledgements keep the
    /// entry so the target may fetch again.
    pub fn acknowledge(&self, resource_id: &ResourceId, success: bool) {
        if !success {
            warn!(%resource_id, "target reported streamed delivery failure");
            return;
        }
        let mut cache = self.cache.lock();
        let done = match cache.entries.get_mut(resource_id) {
            Some(entry) => {
                entry.remaining = entry.remaining.saturating_sub(1);
                entry.remaining == 0
            }
            None => {
                debug!(%resource_id, "acknowledgement for unknown resource");
                false
            }
        };
        if done {
            if let Some(mut entry) = cache.remove(resource_id) {
                if let Some(tx) = entry.completion.take() {
                    let _ = tx.send(true);
                }
            }
        }
    }

    pub fn cached_len(&self) -> usize {
        self.cache.lock().entries.len()
    }

    /// Drop every cached message.
    pub fn clear(&self) {
        let mut cache = self.cache.lock();
        cache.order.clear();
        cache.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{ComponentRegistration, LocalComponentBus};
    use voxbus_core::target::TargetKind;

    fn bus_with(packages: &[&str]) -> Arc<LocalComponentBus> {
        let bus = Arc::new(LocalComponentBus::new());
        for p in packages {
            bus.register(ComponentRegistration::new(*p, TargetKind::Receiver));
        }
        bus
    }

    fn target(p: &str) -> Target {
        Target::new(p, None, TargetKind::Receiver)
    }

    #[test]
    fn small_message_is_embedded() {
        let bus = bus_with(&["a", "b"]);
        let sender = Sender::new(bus.clone(), IntentNames::new("p."), 100, 4);
        let outcome = sender.send_any_size("{}", "T", "A", &[target("a"), target("b")]);
        assert!(matches!(outcome, SendOutcome::Embedded { delivered: 2 }));
        let delivered = bus.deliveries_for("a");
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].body, IntentBody::Embedded { message: "{}".into() });
        assert_eq!(delivered[0].action, "p.A");
    }

    #[test]
    fn large_message_is_streamed_until_all_acked() {
        let bus = bus_with(&["a", "b"]);
        let sender = Sender::new(bus.clone(), IntentNames::new("p."), 8, 4);
        let message = "x".repeat(32);
        let outcome = sender.send_any_size(&message, "T", "A", &[target("a"), target("b")]);
        let SendOutcome::Streamed {
            resource_id,
            delivered,
            mut completion,
        } = outcome
        else {
            panic!("expected streamed outcome");
        };
        assert_eq!(delivered, 2);
        assert!(matches!(bus.deliveries_for("a")[0].body, IntentBody::Streamed { size: 32, .. }));

        let content = sender.cached_content(&resource_id).unwrap();
        assert_eq!(&content[..], message.as_bytes());

        sender.acknowledge(&resource_id, true);
        assert_eq!(sender.cached_len(), 1);
        assert!(completion.try_recv().is_err());

        sender.acknowledge(&resource_id, false);
        assert_eq!(sender.cached_len(), 1);

        sender.acknowledge(&resource_id, true);
        assert_eq!(sender.cached_len(), 0);
        assert_eq!(completion.try_recv(), Ok(true));
    }

    #[test]
    fn cache_evicts_oldest() {
        let bus = bus_with(&["a"]);
        let sender = Sender::new(bus, IntentNames::new("p."), 1, 2);
        let ids: Vec<ResourceId> = (0..3)
            .map(|_| match sender.send_any_size("large", "T", "A", &[target("a")]) {
                SendOutcome::Streamed { resource_id, .. } => resource_id,
                SendOutcome::Embedded { .. } => panic!("expected streamed"),
            })
            .collect();
        assert_eq!(sender.cached_len(), 2);
        assert!(matches!(
            sender.cached_content(&ids[0]),
            Err(ChannelError::UnknownResource(_))
        ));
        assert!(sender.cached_content(&ids[2]).is_ok());
    }

    #[test]
    fn failed_target_does_not_block_others() {
        let bus = bus_with(&["a"]);
        let sender = Sender::new(bus.clone(), IntentNames::new("p."), 100, 4);
        let outcome = sender.send_any_size("{}", "T", "A", &[target("missing"), target("a")]);
        assert!(matches!(outcome, SendOutcome::Embedded { delivered: 1 }));
        assert_eq!(bus.deliveries_for("a").len(), 1);
    }
}
