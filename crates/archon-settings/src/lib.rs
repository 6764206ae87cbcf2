//! # archon-settings
//!
//! Layered configuration for the Archon gateway.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`ArchonSettings::default()`]
//! 2. **Settings file**: `~/.archon/settings.json` or an explicit path,
//!    deep-merged over defaults
//! 3. **Environment variables**: `SOCKET_PORT`, `CLIENT_URL`, `API_URL`
//!    and the `ARCHON_*` overrides (highest priority)
//!
//! Libraries never read settings themselves; the binary turns them into
//! plain configuration values.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, apply_overrides, deep_merge, load_settings, load_settings_from_path,
    load_settings_with, settings_path,
};
pub use types::{ArchonSettings, LoggingSettings, ServerSettings, UpstreamSettings};
