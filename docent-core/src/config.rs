//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/docent/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/docent/` (~/.config/docent/)
//! - Data: `$XDG_DATA_HOME/docent/` (~/.local/share/docent/)
//! - State/Logs: `$XDG_STATE_HOME/docent/` (~/.local/state/docent/)

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::PathBuf;

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Analytics backend and delivery configuration
    #[serde(default)]
    pub sync: SyncConfig,

    /// Asset cache configuration
    #[serde(default)]
    pub cache: CacheConfig,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

/// Analytics backend configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    /// Backend base URL (e.g., `http://localhost:5000`)
    #[serde(default = "default_server_url")]
    pub server_url: String,

    /// Path of the single-event submission endpoint
    #[serde(default = "default_single_path")]
    pub single_path: String,

    /// Path of the batch submission endpoint
    #[serde(default = "default_batch_path")]
    pub batch_path: String,

    /// HTTP request timeout in seconds
    #[serde(default = "default_sync_timeout")]
    pub timeout_secs: u64,

    /// Flush right after each recorded event while online
    #[serde(default = "default_flush_on_append")]
    pub flush_on_append: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            single_path: default_single_path(),
            batch_path: default_batch_path(),
            timeout_secs: default_sync_timeout(),
            flush_on_append: default_flush_on_append(),
        }
    }
}

impl SyncConfig {
    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.server_url.trim().is_empty() {
            return Err(Error::Config("sync.server_url must not be empty".to_string()));
        }
        for (key, path) in [
            ("sync.single_path", &self.single_path),
            ("sync.batch_path", &self.batch_path),
        ] {
            if !path.starts_with('/') {
                return Err(Error::Config(format!("{} must start with '/'", key)));
            }
        }
        if self.single_path == self.batch_path {
            return Err(Error::Config(
                "sync.single_path and sync.batch_path must differ".to_string(),
            ));
        }
        if self.timeout_secs == 0 {
            return Err(Error::Config(
                "sync.timeout_secs must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Both telemetry endpoint paths, single first
    pub fn telemetry_paths(&self) -> [&str; 2] {
        [self.single_path.as_str(), self.batch_path.as_str()]
    }
}

fn default_server_url() -> String {
    "http://localhost:5000".to_string()
}

fn default_single_path() -> String {
    "/analytics".to_string()
}

fn default_batch_path() -> String {
    "/sync-analytics".to_string()
}

fn default_sync_timeout() -> u64 {
    30
}

fn default_flush_on_append() -> bool {
    true
}

/// Asset cache configuration
#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    /// Name of the current cache generation
    #[serde(default = "default_cache_name")]
    pub name: String,

    /// Exact paths cached on install and served cache-first
    #[serde(default = "default_core_assets")]
    pub core_assets: Vec<String>,

    /// Path prefixes served cache-first (artwork and demo images)
    #[serde(default = "default_cached_prefixes")]
    pub cached_prefixes: Vec<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            name: default_cache_name(),
            core_assets: default_core_assets(),
            cached_prefixes: default_cached_prefixes(),
        }
    }
}

impl CacheConfig {
    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Config("cache.name must not be empty".to_string()));
        }
        if let Some(bad) = self
            .core_assets
            .iter()
            .chain(self.cached_prefixes.iter())
            .find(|p| !p.starts_with('/'))
        {
            return Err(Error::Config(format!(
                "cache path {:?} must start with '/'",
                bad
            )));
        }
        Ok(())
    }
}

fn default_cache_name() -> String {
    "docent-cache-v1".to_string()
}

fn default_core_assets() -> Vec<String> {
    ["/", "/index.html", "/css/style.css", "/js/app.js", "/artworks.json"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_cached_prefixes() -> Vec<String> {
    vec!["/images/".to_string(), "/demo_mode_images/".to_string()]
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate every section
    pub fn validate(&self) -> Result<()> {
        self.sync.validate()?;
        self.cache.validate()
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/docent/config.toml` (~/.config/docent/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("docent").join("config.toml")
    }

    /// Returns the data directory path (for SQLite database)
    ///
    /// `$XDG_DATA_HOME/docent/` (~/.local/share/docent/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("docent")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/docent/` (~/.local/state/docent/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("docent")
    }

    /// Returns the database file path
    ///
    /// `$XDG_DATA_HOME/docent/docent.db`
    pub fn database_path() -> PathBuf {
        Self::data_dir().join("docent.db")
    }

    /// Ensure XDG base directory environment variables are set.
    ///
    /// Called by the CLI before anything reads these env vars.
    pub fn ensure_xdg_env() {
        let home = home_dir();

        if std::env::var("XDG_DATA_HOME").is_err() {
            std::env::set_var("XDG_DATA_HOME", home.join(".local/share"));
        }

        if std::env::var("XDG_STATE_HOME").is_err() {
            std::env::set_var("XDG_STATE_HOME", home.join(".local/state"));
        }

        if std::env::var("XDG_CONFIG_HOME").is_err() {
            std::env::set_var("XDG_CONFIG_HOME", home.join(".config"));
        }
    }
}
