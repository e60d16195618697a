//! Configuration for the rfbridge daemon.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use rfbridge_common::config::{LoggingConfig, MqttConfig, RadioConfig};

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] json5::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete daemon configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Radio source (rtl_tcp) settings.
    #[serde(default)]
    pub radio: RadioConfig,

    /// MQTT broker settings.
    #[serde(default)]
    pub mqtt: MqttConfig,

    /// Meter pipeline settings.
    #[serde(default)]
    pub meter: MeterConfig,

    /// Sensor pipeline settings.
    #[serde(default)]
    pub sensor: SensorConfig,

    /// Metrics endpoint settings.
    #[serde(default)]
    pub http: HttpConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Meter pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeterConfig {
    /// Meter ID allowlist. Empty means full scan (no ID filter, no
    /// single-device mode).
    #[serde(default)]
    pub ids: Vec<String>,

    /// How long each collection pass listens, in seconds. Also the lower
    /// bound on the loop iteration duration.
    #[serde(default = "default_poll_secs")]
    pub poll_secs: u64,

    /// Collector binary to invoke.
    #[serde(default = "default_rtlamr_bin")]
    pub rtlamr_bin: String,
}

fn default_poll_secs() -> u64 {
    30
}

fn default_rtlamr_bin() -> String {
    "rtlamr".to_string()
}

impl Default for MeterConfig {
    fn default() -> Self {
        Self {
            ids: Vec::new(),
            poll_secs: default_poll_secs(),
            rtlamr_bin: default_rtlamr_bin(),
        }
    }
}

/// Sensor pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorConfig {
    /// How long each demodulator run lasts, in seconds.
    #[serde(default = "default_poll_secs")]
    pub poll_secs: u64,

    /// Demodulator binary to invoke.
    #[serde(default = "default_rtl433_bin")]
    pub rtl433_bin: String,
}

fn default_rtl433_bin() -> String {
    "rtl_433".to_string()
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            poll_secs: default_poll_secs(),
            rtl433_bin: default_rtl433_bin(),
        }
    }
}

/// Metrics HTTP endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Address to listen on (default: "0.0.0.0:9100").
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Path for the metrics endpoint (default: "/metrics").
    #[serde(default = "default_path")]
    pub path: String,
}

fn default_listen() -> String {
    "0.0.0.0:9100".to_string()
}

fn default_path() -> String {
    "/metrics".to_string()
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            path: default_path(),
        }
    }
}

impl BridgeConfig {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: BridgeConfig = json5::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a JSON5 string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: BridgeConfig = json5::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.radio.host.trim().is_empty() {
            return Err(ConfigError::Validation(
                "radio.host must not be empty".to_string(),
            ));
        }

        if self.mqtt.host.trim().is_empty() {
            return Err(ConfigError::Validation(
                "mqtt.host must not be empty".to_string(),
            ));
        }

        if self.meter.poll_secs == 0 {
            return Err(ConfigError::Validation(
                "meter.poll_secs must be > 0".to_string(),
            ));
        }

        if self.sensor.poll_secs == 0 {
            return Err(ConfigError::Validation(
                "sensor.poll_secs must be > 0".to_string(),
            ));
        }

        if self.meter.ids.iter().any(|id| id.contains(',')) {
            return Err(ConfigError::Validation(
                "meter.ids entries must not contain commas".to_string(),
            ));
        }

        // Validate listen address format
        if self.http.listen.parse::<std::net::SocketAddr>().is_err() {
            return Err(ConfigError::Validation(format!(
                "Invalid listen address: {}",
                self.http.listen
            )));
        }

        // Validate path starts with /
        if !self.http.path.starts_with('/') {
            return Err(ConfigError::Validation(
                "Metrics path must start with /".to_string(),
            ));
        }

        Ok(())
    }
}
