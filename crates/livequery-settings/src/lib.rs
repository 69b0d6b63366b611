//! # livequery-settings
//!
//! Layered configuration for livequery hosts.
//!
//! 1. **Compiled defaults**: [`LiveQuerySettings::default()`]
//! 2. **User file**: `~/.livequery/settings.json`, deep-merged over defaults
//! 3. **Environment**: `LIVEQUERY_*` overrides (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_overrides, deep_merge, load_settings, load_settings_from_path, load_with, settings_path,
};
pub use types::{EngineSettings, LiveQuerySettings, LoggingSettings, ServerSettings};
