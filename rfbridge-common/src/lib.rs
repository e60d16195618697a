//! rfbridge Common Library
//!
//! This crate provides shared types and utilities for the rfbridge RF
//! telemetry daemon:
//!
//! - [`reading`] - Meter reading data model and collector output parsing
//! - [`event`] - Ambient sensor event data model
//! - [`topics`] - MQTT topic builders
//! - [`config`] - Common configuration types and JSON5 loading
//! - [`error`] - Error types

pub mod config;
pub mod error;
pub mod event;
pub mod reading;
pub mod topics;

// Re-export commonly used types at the crate root
pub use config::{LogFormat, LoggingConfig, MqttConfig, RadioConfig, load_config, parse_config};
pub use error::{Error, Result};
pub use event::SensorEvent;
pub use reading::{ParseOutcome, Reading, parse_readings};

/// Initialize tracing with the given configuration.
///
/// Supports two output formats:
/// - `LogFormat::Text` (default): Human-readable text format
/// - `LogFormat::Json`: Structured JSON format for log aggregation systems
///
/// # Example
///
/// ```ignore
/// use rfbridge_common::{LoggingConfig, LogFormat, init_tracing};
///
/// let config = LoggingConfig {
///     level: "info".to_string(),
///     format: LogFormat::Json,
/// };
/// init_tracing(&config)?;
/// ```
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    match config.format {
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer())
                .with(filter)
                .try_init()
                .map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))?;
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json())
                .with(filter)
                .try_init()
                .map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))?;
        }
    }

    Ok(())
}
