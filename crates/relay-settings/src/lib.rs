//! # relay-settings
//!
//! Configuration for the relay bridge.
//!
//! Settings are resolved in three layers, lowest priority first:
//!
//! 1. Compiled defaults ([`RelaySettings::default`])
//! 2. `~/.relay/settings.json`, deep-merged over the defaults
//! 3. `RELAY_*` environment variables (highest priority)
//!
//! The binary's CLI flags override all of these at the call site.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use types::{LogLevel, RelaySettings, ServerSettings, UpstreamSettings};
