//! Ambient sensor event data model.
//!
//! The demodulator publishes one JSON object per decoded transmission on
//! the `rtl_433/<model>/events` topics. A temperature value is required for
//! an event to be meaningful; humidity and battery status are optional.

use serde::{Deserialize, Deserializer};

use crate::error::Result;
use crate::reading::de_flex_string;

/// One decoded ambient-sensor transmission.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SensorEvent {
    /// Device model name as reported by the demodulator.
    pub model: String,

    /// Device identity. String or number on the wire.
    #[serde(deserialize_with = "de_flex_string")]
    pub id: String,

    /// Temperature in degrees Celsius.
    #[serde(default, rename = "temperature_C")]
    pub temperature_c: Option<f64>,

    /// Relative humidity, when the device reports one.
    #[serde(default, deserialize_with = "de_opt_sample")]
    pub humidity: Option<f64>,

    /// Battery status, when the device reports one. Numeric on the wire
    /// for most models; a few emit a boolean.
    #[serde(default, deserialize_with = "de_opt_sample")]
    pub battery_ok: Option<f64>,
}

impl SensorEvent {
    /// Parse an event from a raw MQTT payload.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(payload)?)
    }
}

/// Deserialize an optional sample value. Numbers pass through, `true`
/// normalizes to 1, and `null`/`false`/anything non-numeric counts as
/// absent.
fn de_opt_sample<'de, D>(deserializer: D) -> std::result::Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;

    Ok(match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::Bool(true) => Some(1.0),
        _ => None,
    })
}
