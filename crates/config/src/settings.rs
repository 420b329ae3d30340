// Fetcher settings
// Loaded from ~/.config/georeport/config.toml (or --config PATH)

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub enum ConfigError {
    /// Config file could not be read.
    Io { path: PathBuf, message: String },
    /// TOML parse / deserialization error.
    Parse(String),
    /// A value is out of range.
    Validation(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, message } => write!(f, "cannot read {}: {message}", path.display()),
            Self::Parse(msg) => write!(f, "config parse error: {msg}"),
            Self::Validation(msg) => write!(f, "config validation error: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Registry endpoint and HTTP behaviour
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrySettings {
    pub base_url: String,
    pub timeout_secs: u64,
    /// Retries after the first attempt (429, 5xx, network errors)
    pub max_retries: u32,
    /// First backoff delay, doubled per retry
    pub retry_backoff_ms: u64,
    /// Upper bound on a server's Retry-After
    pub max_retry_after_secs: u64,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            base_url: "https://sags-uns.stadt-koeln.de/georeport/v2".to_string(),
            timeout_secs: 30,
            max_retries: 3,
            retry_backoff_ms: 1000,
            max_retry_after_secs: 60,
        }
    }
}

/// Phase 1: date-range sweep
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepSettings {
    pub window_days: u32,
    pub workers: usize,
}

impl Default for SweepSettings {
    fn default() -> Self {
        Self { window_days: 7, workers: 10 }
    }
}

/// Phase 2: point lookups for missing IDs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackfillSettings {
    pub batch_size: usize,
    /// Minimum spacing between lookups across all workers
    pub lookup_interval_ms: u64,
    pub workers: usize,
    /// Partitions missing more IDs than this are reported but not backfilled
    pub max_gap: usize,
}

impl Default for BackfillSettings {
    fn default() -> Self {
        Self { batch_size: 100, lookup_interval_ms: 100, workers: 10, max_gap: 100_000 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    pub records: PathBuf,
    pub stats: PathBuf,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            records: PathBuf::from("all_events.json"),
            stats: PathBuf::from("fetch_stats.json"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub registry: RegistrySettings,
    pub sweep: SweepSettings,
    pub backfill: BackfillSettings,
    pub output: OutputSettings,
}

impl Settings {
    /// Default config file path, if the platform has a config directory
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("georeport").join("config.toml"))
    }

    /// Load settings.
    ///
    /// An explicit path must exist. Without one, the default path is used if
    /// present and built-in defaults otherwise.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load_from(path);
        }
        match Self::config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(input: &str) -> Result<Self, ConfigError> {
        let settings: Settings = toml::from_str(input).map_err(|e| ConfigError::Parse(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = self.registry.base_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::Validation(format!(
                "registry.base_url must be an http(s) URL, got {url:?}"
            )));
        }
        if self.registry.timeout_secs == 0 {
            return Err(ConfigError::Validation("registry.timeout_secs must be at least 1".into()));
        }

        let sizes = [
            ("sweep.window_days", self.sweep.window_days as usize),
            ("sweep.workers", self.sweep.workers),
            ("backfill.batch_size", self.backfill.batch_size),
            ("backfill.workers", self.backfill.workers),
        ];
        for (key, value) in sizes {
            if value == 0 {
                return Err(ConfigError::Validation(format!("{key} must be at least 1")));
            }
        }
        Ok(())
    }
}
