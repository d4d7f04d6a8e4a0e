//! Configuration management for Biboo.
//!
//! Settings come from a TOML file in the platform-specific config
//! directory, then environment variables (optionally from `.env`)
//! override individual values.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Application name used for config directory.
const APP_NAME: &str = "Biboo";

/// Default config filename.
const CONFIG_FILENAME: &str = "config.toml";

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Translation backend settings.
    pub api: ApiConfig,

    /// Input and output directory layout.
    pub library: LibraryConfig,

    /// Scan and dispatch settings.
    pub tracker: TrackerConfig,
}

/// Translation backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL of the translation service.
    pub endpoint: String,

    /// JSON file forwarded verbatim as the `config` of each request.
    pub config_path: PathBuf,

    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:5003".to_string(),
            config_path: PathBuf::from("config.json"),
            timeout_secs: 300,
        }
    }
}

impl ApiConfig {
    /// Request timeout as a `Duration`.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Directory layout configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryConfig {
    /// Root of downloaded sources (`<extension>/<series>/<chapter>`).
    pub lookup_dir: PathBuf,

    /// Root of the translated local library.
    pub local_dir: PathBuf,

    /// Scratch space for pages that are still being translated.
    pub staging_dir: PathBuf,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            lookup_dir: PathBuf::from("data/downloads/mangas"),
            local_dir: PathBuf::from("data/local"),
            staging_dir: PathBuf::from("temp"),
        }
    }
}

/// Tracker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Category a source must carry to be translated.
    pub auto_translate_tag: String,

    /// Seconds between library scans.
    pub scan_interval_secs: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            auto_translate_tag: "Auto Translate".to_string(),
            scan_interval_secs: 60,
        }
    }
}

impl TrackerConfig {
    /// Scan interval as a `Duration`.
    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }
}

impl Config {
    /// Returns the platform-specific config directory path.
    pub fn config_dir() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|p| p.join(APP_NAME))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Returns the full path to the config file.
    pub fn config_path() -> Result<PathBuf, ConfigError> {
        Ok(Self::config_dir()?.join(CONFIG_FILENAME))
    }

    /// Loads configuration from the default location.
    ///
    /// If the config file doesn't exist, creates a default one.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::config_path()?;
        Self::load_from(&path)
    }

    /// Loads configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            let config = Config::default();
            config.save_to(path)?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(path)?;
        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        Ok(config)
    }

    /// Saves configuration to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        std::fs::write(path, content)?;
        Ok(())
    }

    /// Applies overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides from an arbitrary variable lookup.
    ///
    /// Recognised keys: `TRANSLATOR_API_ENDPOINT`, `TRANSLATOR_API_CONFIG`,
    /// `TRANSLATOR_API_TIMEOUT`, `AUTO_TRANSLATE_TAG`, `LOOKUP_DIR`,
    /// `LOCAL_DIR`, `TEMP_DIR` and `SCAN_INTERVAL`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(endpoint) = lookup("TRANSLATOR_API_ENDPOINT") {
            self.api.endpoint = endpoint;
        }
        if let Some(path) = lookup("TRANSLATOR_API_CONFIG") {
            self.api.config_path = PathBuf::from(path);
        }
        if let Some(timeout) = lookup("TRANSLATOR_API_TIMEOUT") {
            self.api.timeout_secs = parse_seconds("TRANSLATOR_API_TIMEOUT", &timeout)?;
        }
        if let Some(tag) = lookup("AUTO_TRANSLATE_TAG") {
            self.tracker.auto_translate_tag = tag;
        }
        if let Some(dir) = lookup("LOOKUP_DIR") {
            self.library.lookup_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("LOCAL_DIR") {
            self.library.local_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("TEMP_DIR") {
            self.library.staging_dir = PathBuf::from(dir);
        }
        if let Some(interval) = lookup("SCAN_INTERVAL") {
            self.tracker.scan_interval_secs = parse_seconds("SCAN_INTERVAL", &interval)?;
        }
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let endpoint = Url::parse(&self.api.endpoint).map_err(|e| ConfigError::InvalidValue {
            key: "api.endpoint".to_string(),
            message: e.to_string(),
        })?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidValue {
                key: "api.endpoint".to_string(),
                message: format!("unsupported scheme '{}'", endpoint.scheme()),
            });
        }

        if self.api.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "api.timeout_secs".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }

        if self.tracker.auto_translate_tag.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "tracker.auto_translate_tag".to_string(),
                message: "must not be empty".to_string(),
            });
        }

        if self.tracker.scan_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "tracker.scan_interval_secs".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

fn parse_seconds(key: &str, value: &str) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected a number of seconds, got '{}'", value),
        })
}
