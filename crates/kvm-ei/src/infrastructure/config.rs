//! TOML configuration for the input bridge.
//!
//! The file lives at `$XDG_CONFIG_HOME/kvm-ei/config.toml` (falling back to
//! `~/.config/kvm-ei/config.toml`) unless a path is given on the command line.
//! A missing file is not an error: every field has a default, so the bridge
//! runs out of the box.
//!
//! ```toml
//! [bridge]
//! log_level = "debug"
//! wait_timeout_ms = 250.0
//!
//! [ei]
//! client_name = "kvm-ei"
//! socket_path = "/run/user/1000/eis-0"
//! use_portal = false
//!
//! [screen]
//! width = 2560
//! height = 1440
//! ```
//!
//! # Serde default values
//!
//! Fields annotated with `#[serde(default = "some_fn")]` take `some_fn()` when
//! absent, and whole sections are `#[serde(default)]`, so a partial file only
//! overrides what it names.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::geometry::ScreenShape;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Neither `XDG_CONFIG_HOME` nor `HOME` is set.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BridgeConfig {
    #[serde(default)]
    pub bridge: BridgeSection,
    #[serde(default)]
    pub ei: EiConfig,
    #[serde(default)]
    pub screen: ScreenShape,
}

/// Event loop settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BridgeSection {
    /// `tracing` filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Upper bound on one blocking wait, in milliseconds.  Negative waits
    /// forever.
    #[serde(default = "default_wait_timeout_ms")]
    pub wait_timeout_ms: f64,
}

/// libei connection settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EiConfig {
    /// Name announced to the compositor.
    #[serde(default = "default_client_name")]
    pub client_name: String,
    /// Name of the virtual input device.
    #[serde(default = "default_device_name")]
    pub device_name: String,
    /// EIS socket; `None` uses `$LIBEI_SOCKET`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socket_path: Option<PathBuf>,
    /// Try the remote-desktop portal before the socket.
    #[serde(default = "default_true")]
    pub use_portal: bool,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_wait_timeout_ms() -> f64 {
    100.0
}
fn default_client_name() -> String {
    "kvm-ei".to_string()
}
fn default_device_name() -> String {
    "kvm-ei virtual input".to_string()
}
fn default_true() -> bool {
    true
}

impl Default for BridgeSection {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            wait_timeout_ms: default_wait_timeout_ms(),
        }
    }
}

impl Default for EiConfig {
    fn default() -> Self {
        Self {
            client_name: default_client_name(),
            device_name: default_device_name(),
            socket_path: None,
            use_portal: default_true(),
        }
    }
}

// ── Loading ───────────────────────────────────────────────────────────────────

/// Determines the directory holding `config.toml`.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when neither
/// `XDG_CONFIG_HOME` nor `HOME` is set.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    let base = std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))
        .ok_or(ConfigError::NoPlatformConfigDir)?;
    Ok(base.join("kvm-ei"))
}

/// Resolves the default config file path.
///
/// # Errors
///
/// See [`config_dir`].
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// Loads the configuration from `path`, or from [`config_file_path`] when
/// `path` is `None`.  A missing file yields [`BridgeConfig::default`].
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: Option<&Path>) -> Result<BridgeConfig, ConfigError> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => config_file_path()?,
    };

    match std::fs::read_to_string(&path) {
        Ok(content) => parse_config(&content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "no config file; using defaults");
            Ok(BridgeConfig::default())
        }
        Err(source) => Err(ConfigError::Io { path, source }),
    }
}

/// Parses configuration text.
///
/// # Errors
///
/// Returns [`ConfigError::Parse`] if the TOML is malformed.
pub fn parse_config(content: &str) -> Result<BridgeConfig, ConfigError> {
    Ok(toml::from_str(content)?)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
