//! Persisted configuration store.
//!
//! The configuration a component sends is saved so that a later launch
//! without a new configuration can go straight to the configured state.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::errors::Result;
use crate::loader::voxbus_home;
use crate::types::BusSettings;

#[derive(Clone, Debug)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at `~/.voxbus/config.json`.
    pub fn default_location() -> Self {
        Self::new(voxbus_home().join("config.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_saved(&self) -> bool {
        self.path.is_file()
    }

    /// Write the settings through a temporary file and rename it into place.
    pub fn save(&self, settings: &BusSettings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(settings)?;
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &self.path)?;
        info!(path = %self.path.display(), "configuration saved");
        Ok(())
    }

    /// `Ok(None)` when nothing has been saved yet.
    pub fn load(&self) -> Result<Option<BusSettings>> {
        if !self.is_saved() {
            debug!(path = %self.path.display(), "no saved configuration");
            return Ok(None);
        }
        let content = std::fs::read_to_string(&self.path)?;
        let settings: BusSettings = serde_json::from_str(&content)?;
        settings.validate()?;
        Ok(Some(settings))
    }

    pub fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join("nested/config.json"));
        assert!(!store.is_saved());
        assert!(store.load().unwrap().is_none());

        let mut settings = BusSettings::default();
        settings.general.version = "1.0".into();
        store.save(&settings).unwrap();

        assert!(store.is_saved());
        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.general.version, "1.0");
    }

    #[test]
    fn clear_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join("config.json"));
        store.save(&BusSettings::default()).unwrap();
        store.clear().unwrap();
        assert!(!store.is_saved());
        store.clear().unwrap();
    }

    #[test]
    fn corrupt_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "garbage").unwrap();
        assert!(ConfigStore::new(path).load().is_err());
    }
}
