use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Built-in handler toggles. A handler that is enabled consumes its
/// messages inside the bus; otherwise messages are forwarded to components.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DefaultHandlerSettings {
    pub use_default_location_provider: bool,
    pub use_default_network_info_provider: bool,
    pub use_default_property_manager: bool,
    pub use_default_custom_domain_message_dispatcher: bool,
    pub audio_input: AudioTypeToggles,
    pub audio_output: AudioTypeToggles,
}

impl DefaultHandlerSettings {
    pub fn audio_output_enabled(&self, audio_type: &str) -> bool {
        self.audio_output.is_enabled(audio_type)
    }

    pub fn audio_input_enabled(&self, audio_type: &str) -> bool {
        self.audio_input.is_enabled(audio_type)
    }
}

/// `audioType.<TYPE>.useDefault` switches.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AudioTypeToggles {
    pub audio_type: BTreeMap<String, UseDefault>,
}

impl AudioTypeToggles {
    pub fn is_enabled(&self, audio_type: &str) -> bool {
        self.audio_type
            .get(audio_type)
            .is_some_and(|t| t.use_default)
    }

    pub fn enabled_types(&self) -> impl Iterator<Item = &str> {
        self.audio_type
            .iter()
            .filter(|(_, t)| t.use_default)
            .map(|(k, _)| k.as_str())
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UseDefault {
    pub use_default: bool,
}
