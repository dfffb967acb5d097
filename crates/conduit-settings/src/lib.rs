//! # conduit-settings
//!
//! Layered configuration for the Conduit gateway.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`ConduitSettings::default()`]
//! 2. **Settings file**: `--config`, `CONDUIT_CONFIG`, or `~/.conduit/settings.json`
//!    (deep-merged over defaults)
//! 3. **Environment variables**: `CONDUIT_*` overrides (highest priority)
//!
//! The merged result is validated before it is returned; a timing relation
//! the gateway cannot honor is a fatal startup error.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;
pub mod validate;

pub use errors::{Result, SettingsError};
pub use loader::{apply_env_overrides, deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
pub use validate::validate;
