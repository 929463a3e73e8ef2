use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::debug;

/// Last media state reported by each external audio channel. Audio input
/// focus decisions consult it.
#[derive(Default)]
pub struct MediaStateTracker {
    states: RwLock<HashMap<String, String>>,
}

impl MediaStateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_media_state(&self, channel: &str, state: &str) {
        debug!(channel, state, "media state changed");
        let _ = self
            .states
            .write()
            .insert(channel.to_owned(), state.to_owned());
    }

    pub fn state(&self, channel: &str) -> Option<String> {
        self.states.read().get(channel).cloned()
    }

    pub fn playing_channels(&self) -> Vec<String> {
        let mut playing: Vec<String> = self
            .states
            .read()
            .iter()
            .filter(|(_, s)| s.as_str() == "PLAYING")
            .map(|(c, _)| c.clone())
            .collect();
        playing.sort();
        playing
    }

    pub fn is_any_playing(&self) -> bool {
        self.states.read().values().any(|s| s == "PLAYING")
    }
}
