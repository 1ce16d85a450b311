//! # Configuration Management
//!
//! This module handles loading and parsing configuration from the nilm-config.toml file.
//! It provides a centralized way to configure the network link, ingestion endpoint,
//! sampling cadences, display options and the meter port. Configuration is read once
//! at startup; there is no runtime reconfiguration.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::ops::RangeInclusive;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Default configuration file name, looked up in the working directory
pub const DEFAULT_PATH: &str = "nilm-config.toml";

/// Panel widths the display layout can be drawn on
pub const PANEL_WIDTH: RangeInclusive<u32> = 64..=1024;
/// Panel heights the display layout can be drawn on
pub const PANEL_HEIGHT: RangeInclusive<u32> = 32..=1024;

/// Errors from validating or saving a configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("{0} must not be empty")]
    Empty(&'static str),

    #[error("power threshold must be a finite non-negative number, got {0}")]
    Threshold(f32),

    #[error("display size {width}x{height} is outside 64..=1024 x 32..=1024")]
    DisplaySize { width: u32, height: u32 },

    #[error("config IO: {0}")]
    Io(#[from] io::Error),

    #[error("config encode: {0}")]
    Encode(#[from] toml::ser::Error),
}

/// Application configuration loaded from nilm-config.toml
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    /// Wireless link and ingestion endpoint
    #[serde(default)]
    pub network: NetworkConfig,
    /// Detection threshold and cadences
    #[serde(default)]
    pub sampling: SamplingConfig,
    /// Status display options
    #[serde(default)]
    pub display: DisplayConfig,
    /// Serial meter peripheral
    #[serde(default)]
    pub meter: MeterConfig,
}

/// Link and endpoint configuration
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Wireless interface to monitor (e.g., "wlan0")
    pub interface: String,
    /// Network to join; shown on the status display
    pub ssid: String,
    /// Network passphrase. Only used by `nmcli`, which joins by SSID; `wpa_cli`
    /// reassociates with the credentials already in wpa_supplicant.conf
    pub passphrase: String,
    /// Tool asked to reassociate when the link is down
    pub supplicant: Supplicant,
    /// Full URL of the ingestion endpoint
    pub endpoint: String,
    /// Shared secret sent as the X-API-Key header
    pub api_key: String,
    /// Reconnect attempts before a send is abandoned
    pub reconnect_attempts: u32,
    /// Pause between reconnect attempts
    pub reconnect_delay_ms: u64,
    /// Upper bound on a single POST, connect included
    pub request_timeout_ms: u64,
}

/// Supplicant front-end used for reconnect attempts
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Supplicant {
    /// `wpa_cli -i <iface> reconnect`
    #[default]
    WpaCli,
    /// `nmcli device wifi connect <ssid> ...`
    Nmcli,
    /// Leave association to the OS and only re-check the interface
    None,
}

/// Detection and cadence configuration
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Minimum absolute power change (W) that counts as an event; strict comparison
    pub power_threshold_w: f32,
    /// Meter polling period
    pub sample_interval_ms: u64,
    /// Heartbeat period
    pub periodic_interval_ms: u64,
}

/// Display configuration
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Time each view stays on screen
    pub cycle_interval_ms: u64,
    /// Panel width in pixels
    pub width: u32,
    /// Panel height in pixels
    pub height: u32,
    /// I2C bus device of the OLED panel
    pub i2c_bus: String,
    /// 7-bit I2C address of the OLED panel
    pub i2c_address: u8,
}

/// Meter peripheral configuration
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct MeterConfig {
    /// Serial device path
    pub port: String,
    /// Modbus slave address (0xF8 addresses any single meter on the bus)
    pub address: u8,
    pub baud_rate: u32,
    /// Read timeout bounding each poll
    pub timeout_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            interface: "wlan0".to_string(),
            ssid: "nilm-net".to_string(),
            passphrase: String::new(),
            supplicant: Supplicant::WpaCli,
            endpoint: "http://127.0.0.1:5000/api/data".to_string(),
            api_key: "nilm-system-api-key-2023".to_string(),
            reconnect_attempts: 10,
            reconnect_delay_ms: 500,
            request_timeout_ms: 5_000,
        }
    }
}

impl Default for SamplingConfig {
    fn default() -> Self {
        SamplingConfig {
            power_threshold_w: 20.0,
            sample_interval_ms: 1_000,
            periodic_interval_ms: 10_000,
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        DisplayConfig {
            cycle_interval_ms: 3_000,
            width: 128, // SSD1306-class OLED
            height: 64,
            i2c_bus: "/dev/i2c-1".to_string(),
            i2c_address: 0x3C,
        }
    }
}

impl Default for MeterConfig {
    fn default() -> Self {
        MeterConfig {
            port: "/dev/ttyUSB0".to_string(),
            address: 0xF8,
            baud_rate: 9_600,
            timeout_ms: 1_000,
        }
    }
}

impl NetworkConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl SamplingConfig {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }

    pub fn periodic_interval(&self) -> Duration {
        Duration::from_millis(self.periodic_interval_ms)
    }
}

impl DisplayConfig {
    pub fn cycle_interval(&self) -> Duration {
        Duration::from_millis(self.cycle_interval_ms)
    }
}

impl Config {
    /// Load configuration from specified path
    /// Falls back to default configuration if file doesn't exist or is invalid
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(contents) => match toml::from_str::<Config>(&contents) {
                Ok(config) => {
                    info!(path = %path.display(), endpoint = %config.network.endpoint, "loaded configuration");
                    config
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "invalid config file format, using defaults");
                    Self::default()
                }
            },
            Err(_) => {
                info!(path = %path.display(), "no config file found, using defaults");
                Self::default()
            }
        }
    }

    /// Save current configuration to the given path
    pub fn save_to_path<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path.as_ref(), contents)?;
        info!(path = %path.as_ref().display(), "configuration saved");
        Ok(())
    }

    /// Reject values the control loop cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.network.endpoint.trim().is_empty() {
            return Err(ConfigError::Empty("network.endpoint"));
        }
        if self.network.api_key.is_empty() {
            return Err(ConfigError::Empty("network.api_key"));
        }
        if self.network.reconnect_attempts == 0 {
            return Err(ConfigError::Zero("network.reconnect_attempts"));
        }
        if self.network.request_timeout_ms == 0 {
            return Err(ConfigError::Zero("network.request_timeout_ms"));
        }
        let threshold = self.sampling.power_threshold_w;
        if !threshold.is_finite() || threshold < 0.0 {
            return Err(ConfigError::Threshold(threshold));
        }
        if self.sampling.sample_interval_ms == 0 {
            return Err(ConfigError::Zero("sampling.sample_interval_ms"));
        }
        if self.sampling.periodic_interval_ms == 0 {
            return Err(ConfigError::Zero("sampling.periodic_interval_ms"));
        }
        if self.display.cycle_interval_ms == 0 {
            return Err(ConfigError::Zero("display.cycle_interval_ms"));
        }
        let (width, height) = (self.display.width, self.display.height);
        if !PANEL_WIDTH.contains(&width) || !PANEL_HEIGHT.contains(&height) {
            return Err(ConfigError::DisplaySize { width, height });
        }
        if self.network.supplicant == Supplicant::Nmcli && self.network.ssid.trim().is_empty() {
            return Err(ConfigError::Empty("network.ssid"));
        }
        Ok(())
    }
}
