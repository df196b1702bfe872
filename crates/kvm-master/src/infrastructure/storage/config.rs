//! TOML-based configuration persistence for the master application.
//!
//! Reads and writes `AppConfig` to the platform-appropriate config file:
//! - Windows:  `%APPDATA%\KVMOverIP\config.toml`
//! - Linux:    `~/.config/kvmoverip/config.toml`
//! - macOS:    `~/Library/Application Support/KVMOverIP/config.toml`
//!
//! A `--config <path>` flag on the binary bypasses the platform lookup and
//! uses [`load_config_from`] directly.
//!
//! Example:
//!
//! ```toml
//! [master]
//! log_level = "info"
//! screen_name = "desk"
//!
//! [plugin]
//! enabled = true
//! input_pipe = "/tmp/KvmPipeControl"
//! poll_interval_ms = 50
//!
//! [[screens]]
//! name = "laptop"
//! width = 1440
//! height = 900
//! ```
//!
//! # Serde default values
//!
//! Fields annotated with `#[serde(default = "some_fn")]` use the return value
//! of `some_fn()` when the field is absent from the TOML file, so a missing
//! file, an empty file and an older file all load cleanly.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::application::manage_screens::{ScreenRegistry, ScreenState};
use crate::infrastructure::plugin_bridge::{BridgeConfig, DEFAULT_INPUT_PIPE};

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level application configuration stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub master: MasterConfig,
    #[serde(default)]
    pub plugin: PluginConfig,
    #[serde(default)]
    pub screens: Vec<ScreenEntry>,
}

/// General master behaviour settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MasterConfig {
    /// Schema version string – bump when breaking changes are introduced.
    #[serde(default = "default_version")]
    pub version: String,
    /// `tracing` log level: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Name plugins use for the master's own screen.
    #[serde(default = "default_screen_name")]
    pub screen_name: String,
    #[serde(default = "default_screen_width")]
    pub screen_width: u32,
    #[serde(default = "default_screen_height")]
    pub screen_height: u32,
}

/// Named-pipe plugin bridge settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PluginConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// FIFO the bridge reads commands from.
    #[serde(default = "default_input_pipe")]
    pub input_pipe: PathBuf,
    /// Longest single wait of the bridge worker, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

/// A remote screen plugins may switch to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScreenEntry {
    pub name: String,
    #[serde(default = "default_screen_width")]
    pub width: u32,
    #[serde(default = "default_screen_height")]
    pub height: u32,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_version() -> String {
    "1.0".to_string()
}
fn default_true() -> bool {
    true
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_screen_name() -> String {
    "master".to_string()
}
fn default_screen_width() -> u32 {
    1920
}
fn default_screen_height() -> u32 {
    1080
}
fn default_input_pipe() -> PathBuf {
    PathBuf::from(DEFAULT_INPUT_PIPE)
}
fn default_poll_interval_ms() -> u64 {
    50
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            log_level: default_log_level(),
            screen_name: default_screen_name(),
            screen_width: default_screen_width(),
            screen_height: default_screen_height(),
        }
    }
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            input_pipe: default_input_pipe(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

// ── Conversions into runtime types ────────────────────────────────────────────

impl PluginConfig {
    /// Bridge settings; a zero poll interval is raised to 1 ms.
    pub fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig {
            input_pipe: self.input_pipe.clone(),
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
        }
    }
}

impl AppConfig {
    /// Builds the screen registry: the master's own screen plus every
    /// `[[screens]]` entry.  Entries reusing the master's name are skipped.
    pub fn screen_registry(&self) -> ScreenRegistry {
        let mut registry = ScreenRegistry::new(ScreenState::local(
            self.master.screen_name.clone(),
            self.master.screen_width,
            self.master.screen_height,
        ));
        for entry in &self.screens {
            if entry.name == self.master.screen_name {
                warn!("ignoring [[screens]] entry that reuses the master name '{}'", entry.name);
                continue;
            }
            registry.upsert(ScreenState::remote(entry.name.clone(), entry.width, entry.height));
        }
        registry
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Determines the platform-appropriate directory for the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the platform config base
/// directory cannot be determined from the environment.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

/// Resolves the full path to the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// Loads `AppConfig` from the platform config file.
///
/// # Errors
///
/// See [`load_config_from`].
pub fn load_config() -> Result<AppConfig, ConfigError> {
    load_config_from(&config_file_path()?)
}

/// Loads `AppConfig` from `path`, returning `AppConfig::default()` if the
/// file does not yet exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config_from(path: &Path) -> Result<AppConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            let cfg: AppConfig = toml::from_str(&content)?;
            Ok(cfg)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(e) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Persists `config` to the platform config file.
///
/// # Errors
///
/// See [`save_config_to`].
pub fn save_config(config: &AppConfig) -> Result<(), ConfigError> {
    save_config_to(config, &config_file_path()?)
}

/// Persists `config` to `path`, creating the parent directory if needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config_to(config: &AppConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}

/// Resolves the platform config base directory including the app subdirectory.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("KVMOverIP"))
    }

    #[cfg(target_os = "linux")]
    {
        // XDG_CONFIG_HOME or ~/.config
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("kvmoverip"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("KVMOverIP")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
