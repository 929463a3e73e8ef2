//! In-process component bus.
//!
//! Components register with their permissions and intent filters; intents
//! are recorded per component and optionally pushed to a subscriber
//! channel. Backs the local CLI mode and tests.

use std::collections::HashSet;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;
use voxbus_core::target::{Target, TargetKind};

use crate::channel::{ComponentChannel, ComponentDirectory};
use crate::errors::ChannelError;
use crate::intent::Intent;

/// Declared filter: matches when action and category are both equal.
#[derive(Clone, Debug)]
struct Filter {
    action: String,
    category: String,
}

#[derive(Clone, Debug)]
pub struct ComponentRegistration {
    pub package: String,
    pub class: Option<String>,
    pub kind: TargetKind,
    pub permissions: HashSet<String>,
    filters: Vec<Filter>,
}

impl ComponentRegistration {
    pub fn new(package: impl Into<String>, kind: TargetKind) -> Self {
        Self {
            package: package.into(),
            class: None,
            kind,
            permissions: HashSet::new(),
            filters: Vec::new(),
        }
    }

    pub fn with_class(mut self, class: impl Into<String>) -> Self {
        self.class = Some(class.into());
        self
    }

    pub fn with_permission(mut self, permission: impl Into<String>) -> Self {
        let _ = self.permissions.insert(permission.into());
        self
    }

    pub fn with_filter(mut self, action: impl Into<String>, category: impl Into<String>) -> Self {
        self.filters.push(Filter {
            action: action.into(),
            category: category.into(),
        });
        self
    }

    fn target(&self) -> Target {
        Target::new(self.package.clone(), self.class.as_deref(), self.kind)
    }
}

struct LocalComponent {
    registration: ComponentRegistration,
    inbox: Mutex<Vec<Intent>>,
    subscriber: Mutex<Option<mpsc::UnboundedSender<Intent>>>,
}

impl LocalComponent {
    fn deliver(&self, intent: Intent) {
        if let Some(tx) = self.subscriber.lock().as_ref() {
            let _ = tx.send(intent.clone());
        }
        self.inbox.lock().push(intent);
    }
}

#[derive(Default)]
pub struct LocalComponentBus {
    components: DashMap<String, LocalComponent>,
    queries: Mutex<Vec<TargetKind>>,
}

impl LocalComponentBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, registration: ComponentRegistration) {
        debug!(package = %registration.package, kind = %registration.kind, "component registered");
        let _ = self.components.insert(
            registration.package.clone(),
            LocalComponent {
                registration,
                inbox: Mutex::new(Vec::new()),
                subscriber: Mutex::new(None),
            },
        );
    }

    pub fn unregister(&self, package: &str) {
        let _ = self.components.remove(package);
    }

    /// Stream every future delivery to `package`.
    pub fn subscribe(&self, package: &str) -> Option<mpsc::UnboundedReceiver<Intent>> {
        let component = self.components.get(package)?;
        let (tx, rx) = mpsc::unbounded_channel();
        *component.subscriber.lock() = Some(tx);
        Some(rx)
    }

    pub fn deliveries_for(&self, package: &str) -> Vec<Intent> {
        self.components
            .get(package)
            .map(|c| c.inbox.lock().clone())
            .unwrap_or_default()
    }

    pub fn total_deliveries(&self) -> usize {
        self.components.iter().map(|c| c.inbox.lock().len()).sum()
    }

    /// Kinds passed to [`ComponentDirectory::query`], in call order.
    pub fn query_log(&self) -> Vec<TargetKind> {
        self.queries.lock().clone()
    }
}

impl ComponentChannel for LocalComponentBus {
    fn send(&self, intent: Intent) -> Result<(), ChannelError> {
        let package = intent
            .target
            .as_ref()
            .map(|t| t.package.clone())
            .ok_or_else(|| ChannelError::Delivery {
                target: "<none>".into(),
                reason: "intent has no target".into(),
            })?;
        let component = self
            .components
            .get(&package)
            .ok_or_else(|| ChannelError::UnknownComponent(package.clone()))?;
        component.deliver(intent);
        Ok(())
    }

    fn broadcast(&self, intent: Intent, permission: &str) -> Result<usize, ChannelError> {
        let mut reached = 0;
        for component in self.components.iter() {
            if component.registration.permissions.contains(permission) {
                component.deliver(intent.clone());
                reached += 1;
            }
        }
        Ok(reached)
    }
}

impl ComponentDirectory for LocalComponentBus {
    fn has_permission(&self, package: &str, permission: &str) -> bool {
        self.components
            .get(package)
            .is_some_and(|c| c.registration.permissions.contains(permission))
    }

    fn query(&self, action: &str, category: &str, kind: TargetKind) -> Vec<Target> {
        self.queries.lock().push(kind);
        let mut found: Vec<Target> = self
            .components
            .iter()
            .filter(|c| c.registration.kind == kind)
            .filter(|c| {
                c.registration
                    .filters
                    .iter()
                    .any(|f| f.action == action && f.category == category)
            })
            .map(|c| c.registration.target())
            .collect();
        found.sort_by(|a, b| a.package.cmp(&b.package));
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::IntentBody;

    fn intent_to(package: &str) -> Intent {
        Intent {
            action: "p.A".into(),
            category: "p.T".into(),
            target: Some(Target::new(package, None, TargetKind::Receiver)),
            body: IntentBody::Empty,
        }
    }

    #[test]
    fn send_to_unknown_component_fails() {
        let bus = LocalComponentBus::new();
        assert!(matches!(
            bus.send(intent_to("ghost")),
            Err(ChannelError::UnknownComponent(_))
        ));
    }

    #[test]
    fn broadcast_respects_permission() {
        let bus = LocalComponentBus::new();
        bus.register(ComponentRegistration::new("a", TargetKind::Receiver).with_permission("perm"));
        bus.register(ComponentRegistration::new("b", TargetKind::Receiver));
        let reached = bus
            .broadcast(
                Intent {
                    action: "state".into(),
                    category: String::new(),
                    target: None,
                    body: IntentBody::State { state: "STARTED".into() },
                },
                "perm",
            )
            .unwrap();
        assert_eq!(reached, 1);
        assert_eq!(bus.deliveries_for("a").len(), 1);
        assert!(bus.deliveries_for("b").is_empty());
    }

    #[test]
    fn query_matches_filters_and_kind() {
        let bus = LocalComponentBus::new();
        bus.register(
            ComponentRegistration::new("svc", TargetKind::Service)
                .with_class(".Main")
                .with_filter("p.Play", "p.AudioOutput"),
        );
        bus.register(
            ComponentRegistration::new("rcv", TargetKind::Receiver).with_filter("p.Play", "p.AudioOutput"),
        );
        let services = bus.query("p.Play", "p.AudioOutput", TargetKind::Service);
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].class.as_deref(), Some("svc.Main"));
        assert!(bus.query("p.Stop", "p.AudioOutput", TargetKind::Receiver).is_empty());
        assert_eq!(bus.query_log(), vec![TargetKind::Service, TargetKind::Receiver]);
    }

    #[tokio::test]
    async fn subscriber_sees_deliveries() {
        let bus = LocalComponentBus::new();
        bus.register(ComponentRegistration::new("a", TargetKind::Receiver));
        let mut rx = bus.subscribe("a").unwrap();
        bus.send(intent_to("a")).unwrap();
        let got = rx.recv().await.unwrap();
        assert_eq!(got.action, "p.A");
    }
}
