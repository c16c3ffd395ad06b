//! Configuration loading using Figment
//!
//! Configuration is construction-time only. It is assembled from:
//! 1. Built-in defaults
//! 2. A TOML file (`config/imc.toml` by default)
//! 3. Environment variables prefixed with `IMC_` (nested keys split on `__`)
//!
//! # Example
//! ```no_run
//! use imc_core::config::ImcConfig;
//!
//! let config = ImcConfig::load()?;
//! println!("IMC port: {}", config.imc.port);
//! # Ok::<(), imc_core::error::ImcError>(())
//! ```

use crate::channel::{default_channel_entries, ChannelEntry, ChannelId, ChannelTable};
use crate::error::{AppResult, ImcError};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/imc.toml";

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImcConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Log stream locations
    pub logging: LoggingConfig,
    /// IMC serial link and channel wiring
    pub imc: ImcLinkConfig,
    /// Sampling session parameters
    pub sampling: SamplingConfig,
    /// Optional peer instrument worker
    #[serde(default)]
    pub payload: Option<PayloadConfig>,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Console output format (pretty, compact, json)
    #[serde(default)]
    pub log_format: OutputFormat,
}

/// Console output format for diagnostics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Pretty-printed format with colors (for development)
    Pretty,
    /// Compact format without colors (for deployed systems)
    #[default]
    Compact,
    /// JSON format for log aggregation
    Json,
}

/// Where log streams are written
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Control, supervisor and power telemetry logs
    pub directory: PathBuf,
    /// Ambient-light and instrument data
    pub data_directory: PathBuf,
}

/// IMC serial link configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImcLinkConfig {
    /// Serial port path (e.g., "/dev/ttyUSB0", "COM6")
    pub port: String,
    /// Link baud rate
    pub baud_rate: u32,
    /// Bounded timeout for a single telemetry read
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    /// How long an exchange keeps draining response lines
    #[serde(default = "default_drain_window_ms")]
    pub drain_window_ms: u64,
    /// The two channels switched by activate/deactivate, in order
    #[serde(default = "default_payload_channels")]
    pub payload_channels: Vec<u8>,
    /// Channel → device wiring
    #[serde(default = "default_channel_entries")]
    pub channels: Vec<ChannelEntry>,
}

/// Sampling session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingConfig {
    /// Samples read per session
    pub samples: u32,
    /// Target read rate in Hz
    pub frequency_hz: f64,
    /// Pause between a stall and the restarted session
    #[serde(default = "default_restart_cooldown_ms")]
    pub restart_cooldown_ms: u64,
    /// Maximum consecutive restarts before the loop gives up
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,
}

/// Peer instrument worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayloadConfig {
    /// Instrument name, used for its data stream
    pub name: String,
    /// Serial port path of the instrument
    pub port: String,
    /// Instrument baud rate
    pub baud_rate: u32,
    /// Bounded timeout for a single read
    #[serde(default = "default_payload_read_timeout_ms")]
    pub read_timeout_ms: u64,
    /// Read rate in Hz
    pub frequency_hz: f64,
    /// Lines to read before finishing (0 = until shutdown)
    #[serde(default)]
    pub samples: u64,
}

fn default_read_timeout_ms() -> u64 {
    1000
}

fn default_drain_window_ms() -> u64 {
    50
}

fn default_payload_channels() -> Vec<u8> {
    vec![3, 4]
}

fn default_restart_cooldown_ms() -> u64 {
    2000
}

fn default_max_restarts() -> u32 {
    10
}

fn default_payload_read_timeout_ms() -> u64 {
    100
}

impl Default for ImcConfig {
    fn default() -> Self {
        Self {
            application: ApplicationConfig {
                name: "imc-core".to_string(),
                log_level: "info".to_string(),
                log_format: OutputFormat::default(),
            },
            logging: LoggingConfig {
                directory: PathBuf::from("logs"),
                data_directory: PathBuf::from("data"),
            },
            imc: ImcLinkConfig {
                port: "/dev/ttyUSB0".to_string(),
                baud_rate: 115_200,
                read_timeout_ms: default_read_timeout_ms(),
                drain_window_ms: default_drain_window_ms(),
                payload_channels: default_payload_channels(),
                channels: default_channel_entries(),
            },
            sampling: SamplingConfig {
                samples: 200,
                frequency_hz: 5.0,
                restart_cooldown_ms: default_restart_cooldown_ms(),
                max_restarts: default_max_restarts(),
            },
            payload: None,
        }
    }
}

impl ImcConfig {
    /// Load configuration from `config/imc.toml` and environment variables
    ///
    /// Environment variables override the file with prefix `IMC_`.
    /// Example: `IMC_SAMPLING__FREQUENCY_HZ=2.5`
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path and validate it
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config: Self = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("IMC_").split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(ImcError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.imc.port.trim().is_empty() {
            return Err(ImcError::Configuration("imc.port must not be empty".into()));
        }
        if self.imc.baud_rate == 0 {
            return Err(ImcError::Configuration("imc.baud_rate must be > 0".into()));
        }
        if self.imc.read_timeout_ms == 0 {
            return Err(ImcError::Configuration(
                "imc.read_timeout_ms must be > 0".into(),
            ));
        }
        if self.imc.drain_window_ms == 0 {
            return Err(ImcError::Configuration(
                "imc.drain_window_ms must be > 0".into(),
            ));
        }

        self.channel_table()?;
        self.payload_channels()?;

        if self.sampling.samples == 0 {
            return Err(ImcError::Configuration("sampling.samples must be >= 1".into()));
        }
        validate_frequency("sampling.frequency_hz", self.sampling.frequency_hz)?;

        if let Some(payload) = &self.payload {
            if payload.name.trim().is_empty() {
                return Err(ImcError::Configuration("payload.name must not be empty".into()));
            }
            if payload.port.trim().is_empty() {
                return Err(ImcError::Configuration("payload.port must not be empty".into()));
            }
            if payload.baud_rate == 0 {
                return Err(ImcError::Configuration("payload.baud_rate must be > 0".into()));
            }
            if payload.read_timeout_ms == 0 {
                return Err(ImcError::Configuration(
                    "payload.read_timeout_ms must be > 0".into(),
                ));
            }
            validate_frequency("payload.frequency_hz", payload.frequency_hz)?;
        }

        Ok(())
    }

    /// Build the channel → device table
    pub fn channel_table(&self) -> AppResult<ChannelTable> {
        ChannelTable::from_entries(&self.imc.channels)
    }

    /// The two payload channels, in switching order
    pub fn payload_channels(&self) -> AppResult<[ChannelId; 2]> {
        match self.imc.payload_channels.as_slice() {
            [first, second] => Ok([ChannelId::new(*first)?, ChannelId::new(*second)?]),
            other => Err(ImcError::Configuration(format!(
                "imc.payload_channels must list exactly two channels, got {}",
                other.len()
            ))),
        }
    }
}

impl ImcLinkConfig {
    /// Per-read timeout as a `Duration`
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Exchange drain window as a `Duration`
    pub fn drain_window(&self) -> Duration {
        Duration::from_millis(self.drain_window_ms)
    }
}

impl SamplingConfig {
    /// Cooldown between a stall and the next session
    pub fn restart_cooldown(&self) -> Duration {
        Duration::from_millis(self.restart_cooldown_ms)
    }
}

fn validate_frequency(key: &str, hz: f64) -> AppResult<()> {
    if hz.is_finite() && hz > 0.0 {
        Ok(())
    } else {
        Err(ImcError::Configuration(format!(
            "{} must be a positive number, got {}",
            key, hz
        )))
    }
}
