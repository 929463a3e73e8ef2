//! Platform modules registered with the engine at startup.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use voxbus_core::engine::PlatformModule;
use voxbus_router::EnginePublisher;
use voxbus_settings::DefaultHandlerSettings;

/// Where a registered module came from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ModuleSource {
    BuiltIn,
    Extension(String),
}

/// Contributes engine configuration and platform modules during startup.
pub trait ModuleFactory: Send + Sync {
    fn name(&self) -> &str;

    /// Appended after the configured engine blobs.
    fn engine_config(&self) -> Vec<Value> {
        Vec::new()
    }

    fn modules(&self, publisher: &Arc<EnginePublisher>) -> Vec<Arc<dyn PlatformModule>>;
}

/// Told when the engine starts and stops.
#[async_trait]
pub trait EngineStatusListener: Send + Sync {
    async fn on_engine_start(&self);
    async fn on_engine_stop(&self);
}

/// A module the bus itself provides.
pub struct BuiltinModule {
    name: String,
}

impl BuiltinModule {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl PlatformModule for BuiltinModule {
    fn name(&self) -> &str {
        &self.name
    }
}

/// Built-in modules enabled by `defaultPlatformHandlers`.
pub fn builtin_modules(handlers: &DefaultHandlerSettings) -> Vec<Arc<dyn PlatformModule>> {
    let mut names = Vec::new();
    if handlers.use_default_location_provider {
        names.push("LocationProvider".to_string());
    }
    if handlers.use_default_network_info_provider {
        names.push("NetworkInfoProvider".to_string());
    }
    if handlers.use_default_property_manager {
        names.push("PropertyManager".to_string());
    }
    if handlers.use_default_custom_domain_message_dispatcher {
        names.push("CustomDomain".to_string());
    }
    names.extend(handlers.audio_output.enabled_types().map(|t| format!("AudioOutput:{t}")));
    names.extend(handlers.audio_input.enabled_types().map(|t| format!("AudioInput:{t}")));
    names
        .into_iter()
        .map(|n| Arc::new(BuiltinModule::new(n)) as Arc<dyn PlatformModule>)
        .collect()
}

struct ModuleEntry {
    module: Arc<dyn PlatformModule>,
    source: ModuleSource,
}

/// Registered modules by name.
#[derive(Default)]
pub struct ModuleRegistry {
    modules: BTreeMap<String, ModuleEntry>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module. Returns `false` if the name is already taken; the
    /// first registration wins.
    pub fn register(&mut self, module: Arc<dyn PlatformModule>, source: ModuleSource) -> bool {
        let name = module.name().to_string();
        if self.modules.contains_key(&name) {
            return false;
        }
        let _ = self.modules.insert(name, ModuleEntry { module, source });
        true
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn PlatformModule>> {
        self.modules.get(name).map(|e| Arc::clone(&e.module))
    }

    pub fn source(&self, name: &str) -> Option<&ModuleSource> {
        self.modules.get(name).map(|e| &e.source)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    /// Sorted.
    pub fn names(&self) -> Vec<String> {
        self.modules.keys().cloned().collect()
    }

    pub fn modules(&self) -> Vec<Arc<dyn PlatformModule>> {
        self.modules.values().map(|e| Arc::clone(&e.module)).collect()
    }

    pub fn count(&self) -> usize {
        self.modules.len()
    }
}
