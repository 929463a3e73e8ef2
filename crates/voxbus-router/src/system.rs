//! Mirroring between engine properties and OS-level settings.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::errors::PropertyError;
use crate::properties::PropertyManager;

pub const LOCALE: &str = "aace.alexa.locale";
pub const TIMEZONE: &str = "aace.alexa.timezone";

/// Properties kept in step with the OS.
pub const MIRRORED: [&str; 2] = [LOCALE, TIMEZONE];

/// OS-level settings store.
pub trait SystemSettings: Send + Sync {
    fn get(&self, property: &str) -> Option<String>;
    /// Returns whether the OS accepted the value.
    fn set(&self, property: &str, value: &str) -> bool;
}

/// Settings held in memory; used when the host has no OS integration.
#[derive(Default)]
pub struct InMemorySystemSettings {
    values: DashMap<String, String>,
}

impl InMemorySystemSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, property: &str, value: &str) -> Self {
        let _ = self.values.insert(property.to_owned(), value.to_owned());
        self
    }
}

impl SystemSettings for InMemorySystemSettings {
    fn get(&self, property: &str) -> Option<String> {
        self.values.get(property).map(|v| v.clone())
    }

    fn set(&self, property: &str, value: &str) -> bool {
        let _ = self.values.insert(property.to_owned(), value.to_owned());
        true
    }
}

pub struct SystemPropertySync {
    settings: Arc<dyn SystemSettings>,
    enabled: DashMap<String, bool>,
    update_allowed: bool,
    sync_changes: bool,
}

impl SystemPropertySync {
    /// `update_allowed`: engine changes may be written to the OS.
    /// `sync_changes`: OS changes are pushed to the engine.
    pub fn new(settings: Arc<dyn SystemSettings>, update_allowed: bool, sync_changes: bool) -> Self {
        let enabled = DashMap::new();
        for name in MIRRORED {
            let _ = enabled.insert(name.to_owned(), true);
        }
        Self {
            settings,
            enabled,
            update_allowed,
            sync_changes,
        }
    }

    pub fn change_enablement(&self, name: &str, enabled: bool) {
        if !MIRRORED.contains(&name) {
            warn!(name, "enablement change for a property that is not mirrored");
            return;
        }
        info!(name, enabled, "system property sync enablement changed");
        let _ = self.enabled.insert(name.to_owned(), enabled);
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.enabled.get(name).is_some_and(|e| *e)
    }

    /// Apply an engine `PropertyChanged` to the OS. Returns whether a value
    /// was written.
    pub fn apply_engine_change(&self, name: &str, value: &str) -> bool {
        if !self.update_allowed {
            return false;
        }
        let applied = self.settings.set(name, value);
        if applied {
            debug!(name, value, "system property updated from engine");
        } else {
            warn!(name, value, "system refused property update");
        }
        applied
    }

    /// Push current OS values of every enabled mirrored property.
    pub async fn initial_sync(&self, properties: &PropertyManager) -> usize {
        if !self.sync_changes {
            return 0;
        }
        let mut synced = 0;
        for name in MIRRORED {
            if !self.is_enabled(name) {
                continue;
            }
            let Some(value) = self.settings.get(name) else {
                continue;
            };
            match properties.set(name, &value, None).await {
                Ok(()) => synced += 1,
                Err(e) => warn!(name, error = %e, "initial property sync failed"),
            }
        }
        info!(synced, "initial system property sync done");
        synced
    }

    /// The OS changed `name`; forward it to the engine when enabled.
    pub async fn on_system_change(
        &self,
        name: &str,
        value: &str,
        properties: &PropertyManager,
    ) -> Result<bool, PropertyError> {
        if !self.sync_changes || !self.is_enabled(name) {
            return Ok(false);
        }
        properties.set(name, value, None).await?;
        Ok(true)
    }
}
