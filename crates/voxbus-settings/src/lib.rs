//! # voxbus-settings
//!
//! Configuration for the voxbus message bus.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`BusSettings::default()`]
//! 2. **File or configuration message**: deep-merged over defaults
//! 3. **Environment variables**: `VOXBUS_*` overrides (highest priority)
//!
//! A configuration accepted at runtime is persisted with [`ConfigStore`].

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod store;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    deep_merge, load_settings, load_settings_from_path, merge_extra, settings_from_config_message,
    settings_path,
};
pub use store::ConfigStore;
pub use types::*;
