//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.
//!
//! Every section and field has a default, so an empty file (or no file at
//! all) yields the standard local setup: forwarder on 9005/9006, telemetry
//! router on 9001/9003.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::crsf::protocol::CRSF_CHANNEL_VALUE_MAX;
use crate::error::{CrsfBridgeError, Result};
use crate::telemetry::{DecodePlan, GeoOrigin, TelemetryDescription, TelemetryField};

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub forward: ForwardConfig,
    #[serde(default)]
    pub receiver: ReceiverConfig,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub stats: StatsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Serial port configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SerialConfig {
    #[serde(default = "default_serial_port")]
    pub port: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

/// Serial ↔ UDP forwarder configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ForwardConfig {
    /// Where decoded frames are sent (the receiver)
    #[serde(default = "default_forward_dest")]
    pub dest: SocketAddr,

    /// Extra return-path input for telemetry producers
    #[serde(default = "default_forward_src")]
    pub src: SocketAddr,
}

/// RC channel receiver configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ReceiverConfig {
    #[serde(default = "default_receiver_bind")]
    pub bind: SocketAddr,

    /// Channel sets with any value above this are rejected
    #[serde(default = "default_axis_max")]
    pub axis_max: u16,
}

/// Telemetry router configuration
#[derive(Debug, Deserialize, Clone)]
pub struct RouterConfig {
    #[serde(default = "default_command_bind")]
    pub command_bind: SocketAddr,

    #[serde(default = "default_telemetry_bind")]
    pub telemetry_bind: SocketAddr,
}

/// Simulator telemetry configuration
#[derive(Debug, Deserialize, Clone)]
pub struct TelemetryConfig {
    #[serde(default = "default_telemetry_enabled")]
    pub enabled: bool,

    /// Router command address; when unset the telemetry port is bound directly
    #[serde(default)]
    pub router: Option<SocketAddr>,

    #[serde(default = "default_telemetry_bind")]
    pub bind: SocketAddr,

    /// Destination of encoded frames in standalone telemetry mode
    #[serde(default = "default_forward_src")]
    pub crsf_dest: SocketAddr,

    #[serde(default = "default_stream_format")]
    pub stream_format: Vec<TelemetryField>,

    /// JSON description with a `StreamFormat` list, overrides `stream_format`
    #[serde(default)]
    pub description_file: Option<String>,

    #[serde(default = "default_telemetry_interval_ms")]
    pub interval_ms: u64,

    #[serde(default = "default_keepalive_interval_s")]
    pub keepalive_interval_s: u64,

    #[serde(default = "default_max_age_ms")]
    pub max_age_ms: u64,

    #[serde(default)]
    pub origin_latitude: f64,

    #[serde(default)]
    pub origin_longitude: f64,
}

/// Throughput statistics configuration
#[derive(Debug, Deserialize, Clone)]
pub struct StatsConfig {
    #[serde(default = "default_stats_window_ms")]
    pub window_ms: u64,

    #[serde(default = "default_stats_display_interval_ms")]
    pub display_interval_ms: u64,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Also write logs to daily files in this directory
    #[serde(default)]
    pub directory: Option<String>,
}

// Default value functions
fn default_serial_port() -> String { "/dev/ttyUSB0".to_string() }
fn default_baud_rate() -> u32 { 420000 }
fn default_timeout_ms() -> u64 { 100 }

fn default_forward_dest() -> SocketAddr { SocketAddr::from(([127, 0, 0, 1], 9005)) }
fn default_forward_src() -> SocketAddr { SocketAddr::from(([127, 0, 0, 1], 9006)) }

fn default_receiver_bind() -> SocketAddr { SocketAddr::from(([0, 0, 0, 0], 9005)) }
fn default_axis_max() -> u16 { crate::crsf::protocol::AXIS_MAX }

fn default_command_bind() -> SocketAddr { SocketAddr::from(([0, 0, 0, 0], 9003)) }
fn default_telemetry_bind() -> SocketAddr { SocketAddr::from(([0, 0, 0, 0], 9001)) }

fn default_telemetry_enabled() -> bool { true }
fn default_stream_format() -> Vec<TelemetryField> {
    vec![
        TelemetryField::Timestamp,
        TelemetryField::Position,
        TelemetryField::Attitude,
        TelemetryField::Velocity,
        TelemetryField::Gyro,
        TelemetryField::Input,
        TelemetryField::Battery,
        TelemetryField::MotorRpm,
    ]
}
fn default_telemetry_interval_ms() -> u64 { 100 }
fn default_keepalive_interval_s() -> u64 { 30 }
fn default_max_age_ms() -> u64 { 1000 }

fn default_stats_window_ms() -> u64 { 1000 }
fn default_stats_display_interval_ms() -> u64 { 1000 }

fn default_log_level() -> String { "info".to_string() }

/// Baud rates accepted for CRSF links
const VALID_BAUD_RATES: &[u32] = &[115200, 400000, 416666, 420000, 422000, 921600, 1870000, 3750000];

/// Log levels accepted in `[logging] level`
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: default_serial_port(),
            baud_rate: default_baud_rate(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl Default for ForwardConfig {
    fn default() -> Self {
        Self {
            dest: default_forward_dest(),
            src: default_forward_src(),
        }
    }
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            bind: default_receiver_bind(),
            axis_max: default_axis_max(),
        }
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            command_bind: default_command_bind(),
            telemetry_bind: default_telemetry_bind(),
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: default_telemetry_enabled(),
            router: None,
            bind: default_telemetry_bind(),
            crsf_dest: default_forward_src(),
            stream_format: default_stream_format(),
            description_file: None,
            interval_ms: default_telemetry_interval_ms(),
            keepalive_interval_s: default_keepalive_interval_s(),
            max_age_ms: default_max_age_ms(),
            origin_latitude: 0.0,
            origin_longitude: 0.0,
        }
    }
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            window_ms: default_stats_window_ms(),
            display_interval_ms: default_stats_display_interval_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: None,
        }
    }
}

impl TelemetryConfig {
    /// Build the decode plan from the description file or the inline format
    ///
    /// # Errors
    ///
    /// Returns error if the description file cannot be read or parsed
    pub fn decode_plan(&self) -> Result<DecodePlan> {
        match &self.description_file {
            Some(path) => {
                let json = fs::read_to_string(path)?;
                Ok(TelemetryDescription::from_json(&json)?.plan())
            }
            None => Ok(DecodePlan::new(&self.stream_format)),
        }
    }

    pub fn origin(&self) -> GeoOrigin {
        GeoOrigin {
            latitude: self.origin_latitude,
            longitude: self.origin_longitude,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_s)
    }

    pub fn max_age(&self) -> Duration {
        Duration::from_millis(self.max_age_ms)
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails (including unknown telemetry field names)
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use crsf_bridge::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        if self.serial.port.is_empty() {
            return Err(invalid("serial port cannot be empty"));
        }

        if !VALID_BAUD_RATES.contains(&self.serial.baud_rate) {
            return Err(invalid(format!(
                "baud_rate must be one of: {:?}",
                VALID_BAUD_RATES
            )));
        }

        if self.serial.timeout_ms == 0 || self.serial.timeout_ms > 10000 {
            return Err(invalid("timeout_ms must be between 1 and 10000"));
        }

        if self.receiver.axis_max == 0 || self.receiver.axis_max > CRSF_CHANNEL_VALUE_MAX {
            return Err(invalid("axis_max must be between 1 and 2047"));
        }

        let telemetry = &self.telemetry;
        if telemetry.interval_ms == 0 || telemetry.interval_ms > 60000 {
            return Err(invalid("telemetry interval_ms must be between 1 and 60000"));
        }

        if telemetry.keepalive_interval_s == 0 || telemetry.keepalive_interval_s > 3600 {
            return Err(invalid("keepalive_interval_s must be between 1 and 3600"));
        }

        if telemetry.max_age_ms == 0 {
            return Err(invalid("max_age_ms must be greater than 0"));
        }

        if telemetry.enabled
            && telemetry.description_file.is_none()
            && telemetry.stream_format.is_empty()
        {
            return Err(invalid("stream_format cannot be empty when telemetry is enabled"));
        }

        if !(-90.0..=90.0).contains(&telemetry.origin_latitude) {
            return Err(invalid("origin_latitude must be between -90 and 90"));
        }

        if !(-180.0..=180.0).contains(&telemetry.origin_longitude) {
            return Err(invalid("origin_longitude must be between -180 and 180"));
        }

        if self.stats.window_ms == 0 || self.stats.window_ms > 60000 {
            return Err(invalid("stats window_ms must be between 1 and 60000"));
        }

        if self.stats.display_interval_ms == 0 || self.stats.display_interval_ms > 60000 {
            return Err(invalid("stats display_interval_ms must be between 1 and 60000"));
        }

        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(invalid(format!(
                "log level must be one of: {}",
                VALID_LOG_LEVELS.join(", ")
            )));
        }

        Ok(())
    }
}

fn invalid(msg: impl std::fmt::Display) -> CrsfBridgeError {
    CrsfBridgeError::Config(toml::de::Error::custom(msg))
}
