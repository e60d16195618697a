//! 433 MHz RF telemetry bridge.
//!
//! This crate bridges two families of 433 MHz transmissions into an MQTT
//! topic tree and a Prometheus `/metrics` endpoint: utility meter readings
//! decoded by an external `rtlamr` collector, and ambient sensor events
//! decoded by an external `rtl_433` demodulator.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  JSON lines  ┌──────────────────┐
//! │    rtlamr    │─────────────>│  Meter pipeline  │──> rtlamr/<id>/* (MQTT)
//! └──────────────┘              └────────┬─────────┘
//!                                        v
//! ┌──────────────┐   MQTT    ┌───────────────────┐    ┌─────────────────┐
//! │   rtl_433    │──────────>│ Sensor subscriber │───>│ Metric registry │──> /metrics
//! └──────────────┘           └───────────────────┘    └─────────────────┘
//! ```
//!
//! # Usage
//!
//! Run the daemon with a configuration file:
//!
//! ```bash
//! rfbridge --config rfbridge.json5
//! ```
//!
//! # Configuration
//!
//! See [`config::BridgeConfig`] for configuration options.

pub mod config;
pub mod http;
pub mod meter;
pub mod mqtt;
pub mod registry;
pub mod sensor;

pub use config::BridgeConfig;
pub use http::HttpServer;
pub use mqtt::MessageSink;
pub use registry::{Gauge, MetricRegistry, SharedRegistry};
pub use sensor::SensorSubscriber;
