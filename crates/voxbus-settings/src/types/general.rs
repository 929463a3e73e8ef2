use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Protocol version, static routing table, and system property flags.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GeneralSettings {
    /// Configuration version string, e.g. `"2.0"`.
    pub version: String,
    /// Static routing: topic name to parallel package/class/type arrays.
    pub intent_targets: BTreeMap<String, IntentTargetSpec>,
    pub ipc: GeneralIpcSettings,
    /// Apply engine `PropertyChanged` values to OS-level settings.
    pub update_system_property_allowed: bool,
    /// Push OS-level setting changes into the engine.
    pub sync_system_property_change: bool,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            version: "2.0".to_string(),
            intent_targets: BTreeMap::new(),
            ipc: GeneralIpcSettings::default(),
            update_system_property_allowed: false,
            sync_system_property_change: false,
        }
    }
}

/// Static routing entry. The three arrays are parallel and must have the
/// same length; a missing array is a configuration error.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentTargetSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<Vec<String>>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<Vec<String>>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GeneralIpcSettings {
    /// Capacity of the sender cache holding oversized messages.
    pub cache_capacity: usize,
}

impl Default for GeneralIpcSettings {
    fn default() -> Self {
        Self { cache_capacity: 20 }
    }
}
