//! Server configuration loading and persistence.
//!
//! Values are resolved in this order, later sources winning:
//! 1. Built-in defaults
//! 2. `config.json` in the config directory
//! 3. `SEALPOST_*` environment variables
//! 4. Command-line flags (applied by the binary)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Config file name inside the config directory.
pub const CONFIG_FILE: &str = "config.json";

/// Default listen address.
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:5000";

/// Default cap on a single inbound frame.
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 1024 * 1024;

/// Configuration for the relay server.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the WebSocket listener binds to.
    pub bind_addr: String,
    /// Location of the credential store.
    pub credentials_path: PathBuf,
    /// Inbound frames larger than this are dropped; four times this ends
    /// the connection.
    pub max_message_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let credentials_path = Self::config_dir()
            .map(|dir| dir.join("credentials.json"))
            .unwrap_or_else(|_| PathBuf::from("credentials.json"));

        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            credentials_path,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
        }
    }
}

impl ServerConfig {
    /// Returns the configuration directory path.
    ///
    /// `SEALPOST_CONFIG_DIR` overrides the platform config directory
    /// (`~/.config/sealpost` on Linux). The directory is not created here.
    pub fn config_dir() -> Result<PathBuf> {
        if let Ok(dir) = std::env::var("SEALPOST_CONFIG_DIR") {
            return Ok(PathBuf::from(dir));
        }
        Ok(dirs::config_dir()
            .context("Could not determine config directory")?
            .join("sealpost"))
    }

    /// Loads configuration from the config directory, with environment
    /// variable overrides.
    pub fn load() -> Result<Self> {
        let path = Self::config_dir()?.join(CONFIG_FILE);
        let mut config = Self::load_from(&path)?;
        config.apply_env_overrides(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Load from an explicit file. A missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid config JSON in {}", path.display()))
    }

    /// Apply `SEALPOST_*` overrides. Unparseable numbers are ignored.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(bind) = lookup("SEALPOST_BIND") {
            self.bind_addr = bind;
        }

        if let Some(path) = lookup("SEALPOST_CREDENTIALS") {
            self.credentials_path = PathBuf::from(path);
        }

        if let Some(max) = lookup("SEALPOST_MAX_MESSAGE_BYTES") {
            match max.parse::<usize>() {
                Ok(max) => self.max_message_bytes = max,
                Err(e) => log::warn!("[Config] Ignoring SEALPOST_MAX_MESSAGE_BYTES={max}: {e}"),
            }
        }
    }

    /// Persists the current configuration to the config directory.
    pub fn save(&self) -> Result<PathBuf> {
        let path = Self::config_dir()?.join(CONFIG_FILE);
        self.save_to(&path)?;
        Ok(path)
    }

    /// Persist to an explicit file, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("Failed to write {}", path.display()))?;

        // Set restrictive permissions (owner read/write only)
        #[cfg(unix)]
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;

        Ok(())
    }
}
