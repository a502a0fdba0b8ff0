//! Application configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. Config file (~/.config/agora/config.toml)
//! 3. Environment variables (AGORA_* prefix)
//!
//! Environment variables take precedence over config file values.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Environment variable prefix
const ENV_PREFIX: &str = "AGORA";

/// How denormalized engagement counters are maintained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CounterMode {
    /// Apply increments inside the store as single-document writes
    #[default]
    Atomic,
    /// Re-count the underlying records and overwrite the counter
    ///
    /// Concurrent writers can lose updates in this mode.
    Recompute,
}

impl fmt::Display for CounterMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CounterMode::Atomic => write!(f, "atomic"),
            CounterMode::Recompute => write!(f, "recompute"),
        }
    }
}

impl FromStr for CounterMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "atomic" => Ok(CounterMode::Atomic),
            "recompute" => Ok(CounterMode::Recompute),
            other => Err(format!(
                "Unknown counter mode '{}'. Use 'atomic' or 'recompute'.",
                other
            )),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory for data storage
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// SQLite file name inside `data_dir`
    #[serde(default = "default_database_file")]
    pub database_file: String,

    /// Page size for content listings
    #[serde(default = "default_items_per_page")]
    pub items_per_page: usize,

    /// How many comments a threaded listing fetches per parent
    #[serde(default = "default_comments_per_parent")]
    pub comments_per_parent: usize,

    /// Counter maintenance strategy
    #[serde(default)]
    pub counter_mode: CounterMode,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            database_file: default_database_file(),
            items_per_page: default_items_per_page(),
            comments_per_parent: default_comments_per_parent(),
            counter_mode: CounterMode::default(),
        }
    }
}

impl Config {
    /// Load configuration from default location and environment
    ///
    /// Order of precedence (highest to lowest):
    /// 1. Environment variables (AGORA_DATA_DIR, AGORA_ITEMS_PER_PAGE,
    ///    AGORA_COMMENTS_PER_PARENT, AGORA_COUNTER_MODE)
    /// 2. Config file (~/.config/agora/config.toml or AGORA_CONFIG)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
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
    ///
    /// Unparseable numeric or mode values are ignored with a warning.
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var(format!("{}_DATA_DIR", ENV_PREFIX)) {
            self.data_dir = PathBuf::from(val);
        }

        if let Some(n) = env_number("ITEMS_PER_PAGE") {
            self.items_per_page = n;
        }

        if let Some(n) = env_number("COMMENTS_PER_PARENT") {
            self.comments_per_parent = n;
        }

        if let Ok(val) = std::env::var(format!("{}_COUNTER_MODE", ENV_PREFIX)) {
            match val.parse() {
                Ok(mode) => self.counter_mode = mode,
                Err(e) => warn!("Ignoring {}_COUNTER_MODE: {}", ENV_PREFIX, e),
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

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_file_path();

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;
        Ok(())
    }

    /// Get the config file path
    ///
    /// Can be overridden with AGORA_CONFIG environment variable
    pub fn config_file_path() -> PathBuf {
        if let Ok(path) = std::env::var(format!("{}_CONFIG", ENV_PREFIX)) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("agora")
            .join("config.toml")
    }

    /// Get the path to the SQLite database
    pub fn sqlite_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_file)
    }
}

fn env_number(suffix: &str) -> Option<usize> {
    let name = format!("{}_{}", ENV_PREFIX, suffix);
    let val = std::env::var(&name).ok()?;
    match val.trim().parse() {
        Ok(n) => Some(n),
        Err(_) => {
            warn!("Ignoring {}: '{}' is not a number", name, val);
            None
        }
    }
}

/// Get the default data directory
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("agora")
}

fn default_database_file() -> String {
    "agora.db".to_string()
}

fn default_items_per_page() -> usize {
    20
}

fn default_comments_per_parent() -> usize {
    50
}
