use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, error, info, warn};
use voxbus_core::target::{Target, TargetKind};
use voxbus_ipc::{ComponentDirectory, IntentNames};
use voxbus_settings::IntentTargetSpec;

/// Discovery results keyed by `topic + "+" + action`. Shared between the
/// resolver and whoever owns shutdown.
#[derive(Default)]
pub struct TargetCache {
    entries: DashMap<String, Vec<Target>>,
}

impl TargetCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key(topic: &str, action: &str) -> String {
        format!("{topic}+{action}")
    }

    pub fn get(&self, topic: &str, action: &str) -> Option<Vec<Target>> {
        self.entries
            .get(&Self::key(topic, action))
            .map(|e| e.value().clone())
    }

    pub fn insert(&self, topic: &str, action: &str, targets: Vec<Target>) {
        let _ = self.entries.insert(Self::key(topic, action), targets);
    }

    pub fn remove(&self, topic: &str, action: &str) -> Option<Vec<Target>> {
        self.entries
            .remove(&Self::key(topic, action))
            .map(|(_, v)| v)
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Maps topic/action pairs to destination components.
///
/// Lookup order: static table, cache, live discovery. Static entries are
/// never cached; discovery results are.
pub struct TargetResolver {
    static_table: BTreeMap<String, IntentTargetSpec>,
    directory: Arc<dyn ComponentDirectory>,
    cache: Arc<TargetCache>,
    names: IntentNames,
    permission: String,
}

impl TargetResolver {
    pub fn new(
        static_table: BTreeMap<String, IntentTargetSpec>,
        directory: Arc<dyn ComponentDirectory>,
        cache: Arc<TargetCache>,
        names: IntentNames,
        permission: impl Into<String>,
    ) -> Self {
        Self {
            static_table,
            directory,
            cache,
            names,
            permission: permission.into(),
        }
    }

    pub fn cache(&self) -> &Arc<TargetCache> {
        &self.cache
    }

    /// Resolve destinations. Empty means nobody is eligible.
    pub fn resolve(&self, topic: &str, action: &str) -> Vec<Target> {
        if let Some(targets) = self.from_static_table(topic) {
            return targets;
        }

        if let Some(targets) = self.cache.get(topic, action) {
            debug!(topic, action, count = targets.len(), "targets served from cache");
            return targets;
        }

        let targets = self.discover(topic, action);
        if targets.is_empty() {
            warn!(topic, action, "no targets found");
            return targets;
        }
        info!(topic, action, count = targets.len(), "caching discovered targets");
        self.cache.insert(topic, action, targets.clone());
        targets
    }

    /// Drop every cached discovery result.
    pub fn clear(&self) {
        self.cache.clear();
    }

    /// `None` means fall through to the cache and discovery.
    fn from_static_table(&self, topic: &str) -> Option<Vec<Target>> {
        let spec = self.static_table.get(topic)?;

        let (Some(packages), Some(classes), Some(kinds)) =
            (spec.package.as_ref(), spec.class.as_ref(), spec.kind.as_ref())
        else {
            error!(topic, "static target entry is missing package, class, or type");
            return None;
        };

        if packages.len() != classes.len() || packages.len() != kinds.len() {
            error!(
                topic,
                packages = packages.len(),
                classes = classes.len(),
                types = kinds.len(),
                "static target arrays differ in length"
            );
            return None;
        }

        let targets: Vec<Target> = packages
            .iter()
            .zip(classes)
            .zip(kinds)
            .map(|((package, class), kind)| {
                Target::new(package.clone(), Some(class.as_str()), TargetKind::parse(kind))
            })
            .filter(|t| {
                let allowed = self.directory.has_permission(&t.package, &self.permission);
                if !allowed {
                    debug!(topic, target = %t, "static target lacks permission");
                }
                allowed
            })
            .collect();

        if targets.is_empty() {
            warn!(topic, "no static target for topic holds the bus permission");
            return None;
        }
        Some(targets)
    }

    fn discover(&self, topic: &str, action: &str) -> Vec<Target> {
        let intent_action = self.names.action(action);
        let category = self.names.category(topic);
        [TargetKind::Receiver, TargetKind::Activity, TargetKind::Service]
            .into_iter()
            .flat_map(|kind| self.directory.query(&intent_action, &category, kind))
            .filter(|t| self.directory.has_permission(&t.package, &self.permission))
            .collect()
    }
}
