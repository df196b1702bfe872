//! Storage infrastructure: configuration file persistence.
//!
//! The `config` sub-module handles:
//!
//! - Reading the TOML configuration file from the platform-appropriate directory
//!   or an explicit `--config` path.
//! - Writing the configuration back to disk.
//! - Providing defaults for a missing file or missing keys (first run).
//! - Turning the configured screens into the dispatcher's `ScreenRegistry`.

pub mod config;
