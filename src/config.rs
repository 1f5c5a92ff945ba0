//! Configuration loading.
//!
//! Resolution order, later sources winning:
//!
//! 1. Built-in defaults
//! 2. JSON file: `$PATTY_CONFIG`, else `<config dir>/patty/config.json`
//! 3. `PATTY_SOCKET` environment variable
//! 4. Command-line flags (applied by the `ax25` binary)

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants::{CONFIG_PATH_ENV, DEFAULT_SOCKET_PATH, SOCKET_PATH_ENV};
use crate::error::{Error, Result};

/// Configuration for the patty client.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Path of the pattyd control socket.
    pub socket_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
        }
    }
}

impl Config {
    /// Location of the configuration file, if one can be determined.
    ///
    /// `$PATTY_CONFIG` wins; otherwise the platform config directory
    /// (`~/.config/patty/config.json` on Linux).
    pub fn config_path() -> Option<PathBuf> {
        if let Some(path) = std::env::var_os(CONFIG_PATH_ENV) {
            return Some(PathBuf::from(path));
        }
        dirs::config_dir().map(|dir| dir.join("patty").join("config.json"))
    }

    /// Loads configuration from the default file, with environment
    /// variable overrides.
    ///
    /// A missing file is not an error; a malformed one is.
    pub fn load() -> Result<Self> {
        let mut config = match Self::config_path() {
            Some(path) if path.exists() => Self::load_from(&path)?,
            _ => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads configuration from `path` without environment overrides.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("read {}: {e}", path.display())))?;
        serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("parse {}: {e}", path.display())))
    }

    /// Applies `PATTY_SOCKET` from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(socket) = lookup(SOCKET_PATH_ENV).filter(|s| !s.is_empty()) {
            self.socket_path = PathBuf::from(socket);
        }
    }
}
