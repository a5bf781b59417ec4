//! Application configuration.
//!
//! Loaded from `config.toml` in the platform config directory. Every section
//! and field is optional; missing values fall back to the defaults below,
//! which reproduce the stock fast-mode setup (50 Hz main rate, 5 Hz
//! interleaved rate, 60 minute sensor-side timeout).

use crate::sensors::ant::profiles::power::PageParams;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Application version
    pub version: String,
    /// Power meter module
    pub power_meter: PowerMeterSettings,
    /// Fast-mode parameters
    pub fast_mode: FastModeSettings,
    /// Loop intervals, timeouts and retry counts
    pub timing: TimingSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            power_meter: PowerMeterSettings::default(),
            fast_mode: FastModeSettings::default(),
            timing: TimingSettings::default(),
        }
    }
}

impl AppConfig {
    /// Reject values that would stall or spin the control loops.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fast = &self.fast_mode;
        if fast.fast_period == 0 || fast.normal_period == 0 {
            return Err(ConfigError::Invalid(
                "channel periods must be non-zero".to_string(),
            ));
        }
        if fast.main_frequency_hz == 0 {
            return Err(ConfigError::Invalid(
                "fast mode main frequency must be non-zero".to_string(),
            ));
        }

        let timing = &self.timing;
        if timing.control_tick_ms == 0 || timing.sample_window_ms == 0 {
            return Err(ConfigError::Invalid(
                "loop intervals must be non-zero".to_string(),
            ));
        }
        if timing.send_attempts == 0 {
            return Err(ConfigError::Invalid(
                "send_attempts must be at least 1".to_string(),
            ));
        }
        if timing.response_poll_ms == 0 || timing.response_poll_ms > timing.response_timeout_ms {
            return Err(ConfigError::Invalid(
                "response_poll_ms must be between 1 and response_timeout_ms".to_string(),
            ));
        }

        Ok(())
    }
}

/// Power meter module settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PowerMeterSettings {
    /// Whether the module is requested at all
    pub enabled: bool,
    /// ANT+ device number (0 = pair with any power meter)
    pub device_id: u16,
    /// ANT+ transmission type
    pub transmission_type: u8,
    /// RF channel as an offset from 2400 MHz
    pub rf_frequency: u8,
    /// Search timeout in seconds (255 = search forever)
    pub search_timeout: u8,
}

impl Default for PowerMeterSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            device_id: 0,
            transmission_type: 5,
            rf_frequency: 57,
            search_timeout: 255,
        }
    }
}

/// Fast-mode parameters sent to the sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FastModeSettings {
    /// Main page rate (F1) in Hz
    pub main_frequency_hz: u8,
    /// Interleaved page rate (F2) in Hz
    pub interleaved_frequency_hz: u8,
    /// Sensor leaves fast mode on its own after this many minutes
    pub timeout_minutes: u8,
    /// Channel period in fast mode (655 of 32768 -> ~50 Hz)
    pub fast_period: u16,
    /// Channel period in standard mode (8182 of 32768 -> ~4 Hz)
    pub normal_period: u16,
    /// Metrics carried by each fast page
    pub pages: PageParams,
}

impl Default for FastModeSettings {
    fn default() -> Self {
        Self {
            main_frequency_hz: 50,
            interleaved_frequency_hz: 5,
            timeout_minutes: 60,
            fast_period: 655,
            normal_period: 8182,
            pages: PageParams::default(),
        }
    }
}

/// Loop intervals, timeouts and retry counts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingSettings {
    /// Control state machine tick
    pub control_tick_ms: u64,
    /// Sample-rate window of the connection supervisor
    pub sample_window_ms: u64,
    /// Deadline for the device to answer a command with the expected page
    pub response_timeout_ms: u64,
    /// Poll granularity of the response wait
    pub response_poll_ms: u64,
    /// Attempts per command group on transport-level send failure
    pub send_attempts: u32,
    /// Delay between stick acquisition attempts
    pub reconnect_delay_ms: u64,
    /// Copies of the restore command sent per attempt
    pub restore_repeats: u32,
    /// Copies of each configure command sent per attempt
    pub configure_repeats: u32,
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            control_tick_ms: 1000,
            sample_window_ms: 2000,
            response_timeout_ms: 3000,
            response_poll_ms: 100,
            send_attempts: 10,
            reconnect_delay_ms: 2000,
            restore_repeats: 7,
            configure_repeats: 2,
        }
    }
}

impl TimingSettings {
    pub fn control_tick(&self) -> Duration {
        Duration::from_millis(self.control_tick_ms)
    }

    pub fn sample_window(&self) -> Duration {
        Duration::from_millis(self.sample_window_ms)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn response_poll(&self) -> Duration {
        Duration::from_millis(self.response_poll_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

/// Get the application configuration directory.
pub fn get_config_dir() -> PathBuf {
    directories::ProjectDirs::from("com", "antpower", "AntPower")
        .map(|dirs| dirs.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Get the configuration file path.
pub fn get_config_path() -> PathBuf {
    get_config_dir().join("config.toml")
}

/// Load application configuration from the default location.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    load_config_from(&get_config_path())
}

/// Load application configuration from `path`; a missing file yields defaults.
pub fn load_config_from(path: &Path) -> Result<AppConfig, ConfigError> {
    if !path.exists() {
        return Ok(AppConfig::default());
    }

    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;

    let config: AppConfig =
        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

    config.validate()?;

    Ok(config)
}

/// Save application configuration to the default location.
pub fn save_config(config: &AppConfig) -> Result<(), ConfigError> {
    save_config_to(&get_config_path(), config)
}

/// Save application configuration to `path`.
pub fn save_config_to(path: &Path, config: &AppConfig) -> Result<(), ConfigError> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
    }

    let content =
        toml::to_string_pretty(config).map_err(|e| ConfigError::SerializeError(e.to_string()))?;

    std::fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

    Ok(())
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
