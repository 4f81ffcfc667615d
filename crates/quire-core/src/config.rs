//! Application configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. Config file (~/.config/quire/config.toml)
//! 3. Environment variables (QUIRE_* prefix)
//!
//! Environment variables take precedence over config file values.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

use crate::sync::ConflictPolicy;

/// Environment variable prefix
const ENV_PREFIX: &str = "QUIRE";

/// Keys accepted by `Config::set_value`
pub const CONFIG_KEYS: &[&str] = &[
    "data_dir",
    "sync_enabled",
    "sync_path",
    "conflict_policy",
    "mount_command",
    "unmount_command",
    "mount_timeout_secs",
    "log_file",
];

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory for notes and sync state
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Whether sync is enabled
    #[serde(default)]
    pub sync_enabled: bool,

    /// Sync directory (local folder or mount point)
    #[serde(default)]
    pub sync_path: Option<PathBuf>,

    /// How conflicts are resolved when no policy is given on the command line
    #[serde(default)]
    pub conflict_policy: ConflictPolicy,

    /// Shell command that mounts `sync_path` before a session
    #[serde(default)]
    pub mount_command: Option<String>,

    /// Shell command that unmounts `sync_path` after a session
    #[serde(default)]
    pub unmount_command: Option<String>,

    /// Give up on mounting after this many seconds
    #[serde(default = "default_mount_timeout_secs")]
    pub mount_timeout_secs: u64,

    /// Log file (logging goes to stderr when unset)
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            sync_enabled: false,
            sync_path: None,
            conflict_policy: ConflictPolicy::default(),
            mount_command: None,
            unmount_command: None,
            mount_timeout_secs: default_mount_timeout_secs(),
            log_file: None,
        }
    }
}

impl Config {
    /// Load configuration from default location and environment
    ///
    /// Order of precedence (highest to lowest):
    /// 1. Environment variables (QUIRE_DATA_DIR, QUIRE_SYNC_PATH, ...)
    /// 2. Config file (~/.config/quire/config.toml or QUIRE_CONFIG)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load configuration, preferring a path given on the command line
    pub fn load_with_cli_override(path: Option<&PathBuf>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from_path(path),
            None => Self::load(),
        }
    }

    /// Load configuration from a specific path
    ///
    /// Environment variables are still applied as overrides.
    /// If the file doesn't exist, defaults are used.
    pub fn load_from_path(path: &PathBuf) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config.ensure_data_dir()?;
        Ok(config)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn load_from_str(toml_content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(toml_content).context("Failed to parse config TOML")?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        // QUIRE_DATA_DIR
        if let Ok(val) = std::env::var(format!("{}_DATA_DIR", ENV_PREFIX)) {
            self.data_dir = PathBuf::from(val);
        }

        // QUIRE_SYNC_PATH
        if let Ok(val) = std::env::var(format!("{}_SYNC_PATH", ENV_PREFIX)) {
            self.sync_path = if val.is_empty() {
                None
            } else {
                Some(PathBuf::from(val))
            };
        }

        // QUIRE_SYNC_ENABLED
        if let Ok(val) = std::env::var(format!("{}_SYNC_ENABLED", ENV_PREFIX)) {
            self.sync_enabled = val.eq_ignore_ascii_case("true") || val == "1";
        }

        // QUIRE_CONFLICT_POLICY
        if let Ok(val) = std::env::var(format!("{}_CONFLICT_POLICY", ENV_PREFIX)) {
            match val.parse() {
                Ok(policy) => self.conflict_policy = policy,
                Err(e) => warn!("Ignoring {}_CONFLICT_POLICY: {}", ENV_PREFIX, e),
            }
        }
    }

    /// Ensure data directory exists
    fn ensure_data_dir(&self) -> Result<()> {
        if !self.data_dir.exists() {
            std::fs::create_dir_all(&self.data_dir)
                .with_context(|| format!("Failed to create data directory: {:?}", self.data_dir))?;
        }
        Ok(())
    }

    /// Set a value by key, as given on the command line
    ///
    /// An empty value or `none` clears optional keys.
    pub fn set_value(&mut self, key: &str, value: &str) -> Result<()> {
        let optional = |v: &str| {
            if v.is_empty() || v == "none" {
                None
            } else {
                Some(v.to_string())
            }
        };

        match key {
            "data_dir" => self.data_dir = PathBuf::from(value),
            "sync_enabled" => {
                self.sync_enabled = value
                    .parse()
                    .context("Invalid value for sync_enabled. Use 'true' or 'false'.")?;
            }
            "sync_path" => self.sync_path = optional(value).map(PathBuf::from),
            "conflict_policy" => {
                self.conflict_policy = value.parse().map_err(|e: String| anyhow::anyhow!(e))?;
            }
            "mount_command" => self.mount_command = optional(value),
            "unmount_command" => self.unmount_command = optional(value),
            "mount_timeout_secs" => {
                self.mount_timeout_secs = value
                    .parse()
                    .context("Invalid value for mount_timeout_secs. Use a number of seconds.")?;
            }
            "log_file" => self.log_file = optional(value).map(PathBuf::from),
            _ => bail!(
                "Unknown configuration key: '{}'\nValid keys: {}",
                key,
                CONFIG_KEYS.join(", ")
            ),
        }
        Ok(())
    }

    /// Save configuration to the default file
    pub fn save(&self) -> Result<()> {
        self.save_to_path(&Self::config_file_path())
    }

    /// Save configuration to a specific file
    pub fn save_to_path(&self, config_path: &PathBuf) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(config_path, content)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;
        Ok(())
    }

    /// Get the config file path
    ///
    /// Can be overridden with QUIRE_CONFIG environment variable
    pub fn config_file_path() -> PathBuf {
        if let Ok(path) = std::env::var(format!("{}_CONFIG", ENV_PREFIX)) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("quire")
            .join("config.toml")
    }

    /// Directory holding the local `.note` files
    pub fn notes_dir(&self) -> PathBuf {
        self.data_dir.join("notes")
    }

    /// Path of the persisted sync state
    pub fn sync_state_path(&self) -> PathBuf {
        self.data_dir.join("sync_state.json")
    }

    /// Path of the session lock file
    pub fn sync_lock_path(&self) -> PathBuf {
        self.data_dir.join("sync.lock")
    }

    /// Mount timeout as a duration
    pub fn mount_timeout(&self) -> Duration {
        Duration::from_secs(self.mount_timeout_secs)
    }

    /// Whether a sync location has been set up
    pub fn is_sync_configured(&self) -> bool {
        self.sync_path.is_some()
    }
}

/// Get the default data directory
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("quire")
}

fn default_mount_timeout_secs() -> u64 {
    30
}
