//! Configuration management for micled
//!
//! Settings are read from `~/.micled/config.json` at startup. Every section
//! falls back to defaults for missing fields, so an absent or partial file is
//! always usable. Files written by a newer schema version are rejected.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

use crate::error::ConfigError;

/// Current config schema version
const CURRENT_VERSION: u32 = 1;

/// Advertised name of the LED peripheral
pub const DEFAULT_ADVERTISED_NAME: &str = "LED";

/// Writable switch characteristic on the LED peripheral
pub const DEFAULT_CHARACTERISTIC_UUID: &str = "19B10001-E8F2-537E-4F6C-D104768A1214";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Schema version; files from a newer release are rejected
    pub version: u32,
    /// Peripheral discovery and GATT settings
    pub peripheral: PeripheralConfig,
    /// Coordinator loop timing
    pub monitor: MonitorConfig,
    /// Status console settings
    pub console: ConsoleConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: CURRENT_VERSION,
            peripheral: PeripheralConfig::default(),
            monitor: MonitorConfig::default(),
            console: ConsoleConfig::default(),
        }
    }
}

/// Peripheral discovery, resolution and write settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PeripheralConfig {
    /// Exact advertised local name to match during discovery
    pub advertised_name: String,
    /// 128-bit UUID of the writable switch characteristic
    pub characteristic_uuid: String,
    /// How long a discovery scan runs before giving up
    pub scan_timeout_secs: u64,
    /// Minimum spacing between connection attempts
    pub reconnect_delay_secs: u64,
    /// Number of GATT resolution attempts per connection
    pub resolve_attempts: u32,
    /// Fixed delay between GATT resolution attempts
    pub resolve_retry_delay_ms: u64,
    /// Upper bound for opening the device and for each resolution attempt
    pub resolve_timeout_ms: u64,
    /// Upper bound for a single confirmed write
    pub write_timeout_ms: u64,
}

impl Default for PeripheralConfig {
    fn default() -> Self {
        Self {
            advertised_name: DEFAULT_ADVERTISED_NAME.to_string(),
            characteristic_uuid: DEFAULT_CHARACTERISTIC_UUID.to_string(),
            scan_timeout_secs: 8,
            reconnect_delay_secs: 3,
            resolve_attempts: 3,
            resolve_retry_delay_ms: 500,
            resolve_timeout_ms: 5000,
            write_timeout_ms: 5000,
        }
    }
}

impl PeripheralConfig {
    /// Parse the configured characteristic UUID
    pub fn characteristic(&self) -> Result<Uuid, ConfigError> {
        Uuid::parse_str(&self.characteristic_uuid).map_err(|source| ConfigError::InvalidUuid {
            value: self.characteristic_uuid.clone(),
            source,
        })
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_secs(self.scan_timeout_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    pub fn resolve_retry_delay(&self) -> Duration {
        Duration::from_millis(self.resolve_retry_delay_ms)
    }

    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_millis(self.resolve_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

/// Coordinator loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Interval between coordinator iterations
    pub poll_interval_ms: u64,
    /// Interval between heartbeat status lines
    pub heartbeat_interval_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            heartbeat_interval_secs: 30,
        }
    }
}

impl MonitorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }
}

/// Status console configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    /// Number of status lines kept for replay
    pub max_log_lines: usize,
    /// Echo status lines to the terminal from startup
    pub show_on_start: bool,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            max_log_lines: 100,
            show_on_start: false,
        }
    }
}

/// Get the path to the config file (~/.micled/config.json)
pub fn get_config_path() -> PathBuf {
    get_config_dir().join("config.json")
}

/// Get the path to the config directory (~/.micled)
pub fn get_config_dir() -> PathBuf {
    home_dir_or_fallback().join(".micled")
}

/// Get the home directory, falling back to the temp dir if unavailable
fn home_dir_or_fallback() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| {
        tracing::error!("Could not determine home directory, using temp dir");
        std::env::temp_dir()
    })
}

/// Load configuration from a specific file
///
/// A missing file yields defaults. The file is never rewritten on load.
pub fn load_from_path(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        tracing::info!("Config file not found at {:?}, using defaults", path);
        return Ok(Config::default());
    }

    let contents = fs::read_to_string(path)?;
    let config: Config = serde_json::from_str(&contents)?;

    check_version(&config)?;
    validate(&config)?;
    Ok(config)
}

/// Save configuration to a specific file, creating parent directories
///
/// Settings that would be rejected on load are never written.
pub fn save_to_path(config: &Config, path: &Path) -> Result<(), ConfigError> {
    check_version(config)?;
    validate(config)?;

    if let Some(dir) = path.parent() {
        if !dir.exists() {
            fs::create_dir_all(dir)?;
        }
    }

    let contents = serde_json::to_string_pretty(config)?;
    fs::write(path, contents)?;

    tracing::info!("Config saved to {:?}", path);
    Ok(())
}

/// Load the user's configuration, falling back to defaults on any error
pub fn load_config() -> Config {
    let path = get_config_path();
    load_from_path(&path).unwrap_or_else(|e| {
        tracing::error!("Failed to load config, using defaults: {}", e);
        Config::default()
    })
}

/// Reject files written by a newer schema
fn check_version(config: &Config) -> Result<(), ConfigError> {
    if config.version > CURRENT_VERSION {
        return Err(ConfigError::UnknownVersion(config.version));
    }
    Ok(())
}

/// Reject settings the link and coordinator cannot run with
fn validate(config: &Config) -> Result<(), ConfigError> {
    config.peripheral.characteristic()?;

    if config.peripheral.advertised_name.is_empty() {
        return Err(ConfigError::Invalid(
            "advertised_name must not be empty".to_string(),
        ));
    }
    if config.peripheral.resolve_attempts == 0 {
        return Err(ConfigError::Invalid(
            "resolve_attempts must be at least 1".to_string(),
        ));
    }
    if config.peripheral.scan_timeout_secs == 0 {
        return Err(ConfigError::Invalid(
            "scan_timeout_secs must be greater than 0".to_string(),
        ));
    }
    if config.peripheral.resolve_timeout_ms == 0 {
        return Err(ConfigError::Invalid(
            "resolve_timeout_ms must be greater than 0".to_string(),
        ));
    }
    if config.peripheral.write_timeout_ms == 0 {
        return Err(ConfigError::Invalid(
            "write_timeout_ms must be greater than 0".to_string(),
        ));
    }
    if config.monitor.poll_interval_ms == 0 {
        return Err(ConfigError::Invalid(
            "poll_interval_ms must be greater than 0".to_string(),
        ));
    }
    Ok(())
}
