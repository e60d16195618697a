//! Meter reading data model.
//!
//! The meter collector emits one JSON record per line, each carrying a
//! `Type` discriminator and a `Message` payload whose shape depends on the
//! protocol variant. Only the SCM, SCM+, and R900 variants are recognized;
//! records with any other discriminator (or a malformed message body) fail
//! to parse and are dropped.

use serde::{Deserialize, Deserializer};

/// One decoded meter transmission.
///
/// Maps directly onto the collector's wire format:
/// `{"Type": "SCM", "Message": {...}}`. Extra top-level fields emitted by
/// the collector (capture time, frame offset, ...) are ignored.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "Type", content = "Message")]
pub enum Reading {
    #[serde(rename = "SCM")]
    Scm(ScmMessage),
    #[serde(rename = "SCM+")]
    ScmPlus(ScmPlusMessage),
    #[serde(rename = "R900")]
    R900(R900Message),
}

/// Standard Consumption Message payload.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ScmMessage {
    #[serde(rename = "ID", deserialize_with = "de_flex_string")]
    pub id: String,
    #[serde(rename = "Type", deserialize_with = "de_flex_string")]
    pub kind: String,
    #[serde(rename = "Consumption")]
    pub consumption: f64,
}

/// SCM+ (extended) payload. Identity lives in `EndpointID`/`EndpointType`,
/// not `ID`/`Type`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ScmPlusMessage {
    #[serde(rename = "EndpointID", deserialize_with = "de_flex_string")]
    pub id: String,
    #[serde(rename = "EndpointType", deserialize_with = "de_flex_string")]
    pub kind: String,
    #[serde(rename = "Consumption")]
    pub consumption: f64,
}

/// R900 payload. Carries no type field.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct R900Message {
    #[serde(rename = "ID", deserialize_with = "de_flex_string")]
    pub id: String,
    #[serde(rename = "Consumption")]
    pub consumption: f64,
}

impl Reading {
    /// Lowercase protocol variant name, used as the `message_type` label
    /// and MQTT payload.
    pub fn message_type(&self) -> &'static str {
        match self {
            Reading::Scm(_) => "scm",
            Reading::ScmPlus(_) => "scm+",
            Reading::R900(_) => "r900",
        }
    }

    /// Canonical meter identity for this reading.
    pub fn meter_id(&self) -> &str {
        match self {
            Reading::Scm(m) => &m.id,
            Reading::ScmPlus(m) => &m.id,
            Reading::R900(m) => &m.id,
        }
    }

    /// Meter type label, if the variant carries one.
    pub fn type_label(&self) -> Option<&str> {
        match self {
            Reading::Scm(m) => Some(&m.kind),
            Reading::ScmPlus(m) => Some(&m.kind),
            Reading::R900(_) => None,
        }
    }

    /// Consumption value.
    pub fn consumption(&self) -> f64 {
        match self {
            Reading::Scm(m) => m.consumption,
            Reading::ScmPlus(m) => m.consumption,
            Reading::R900(m) => m.consumption,
        }
    }
}

/// Outcome of parsing one batch of collector output.
#[derive(Debug, Default)]
pub struct ParseOutcome {
    /// Readings in collector output order.
    pub readings: Vec<Reading>,
    /// Non-empty lines that failed to parse.
    pub dropped: usize,
}

/// Parse collector output into readings.
///
/// The output is split on line boundaries and each non-empty line is parsed
/// as an independent JSON record. Lines that fail to parse are dropped and
/// counted; they do not affect adjacent valid lines.
pub fn parse_readings(output: &str) -> ParseOutcome {
    let mut outcome = ParseOutcome::default();

    for line in output.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Reading>(line) {
            Ok(reading) => outcome.readings.push(reading),
            Err(err) => {
                outcome.dropped += 1;
                tracing::debug!(%err, line, "Dropping unparsable collector line");
            }
        }
    }

    outcome
}

/// Deserialize a value that may arrive as either a JSON string or a JSON
/// number into a string. The collector emits numeric IDs; hand-fed test
/// fixtures often use strings.
pub(crate) fn de_flex_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Num(serde_json::Number),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s,
        Raw::Num(n) => n.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scm() {
        let line = r#"{"Type":"SCM","Message":{"ID":"123","Type":"5","Consumption":4567}}"#;
        let reading: Reading = serde_json::from_str(line).unwrap();

        assert_eq!(reading.message_type(), "scm");
        assert_eq!(reading.meter_id(), "123");
        assert_eq!(reading.type_label(), Some("5"));
        assert_eq!(reading.consumption(), 4567.0);
    }

    #[test]
    fn test_parse_scm_plus_identity_from_endpoint_fields() {
        let line = r#"{"Type":"SCM+","Message":{"EndpointID":42,"EndpointType":8,"Consumption":900,"ID":"decoy","Type":"decoy"}}"#;
        let reading: Reading = serde_json::from_str(line).unwrap();

        assert_eq!(reading.message_type(), "scm+");
        assert_eq!(reading.meter_id(), "42");
        assert_eq!(reading.type_label(), Some("8"));
        assert_eq!(reading.consumption(), 900.0);
    }

    #[test]
    fn test_parse_r900_has_no_type_label() {
        let line = r#"{"Type":"R900","Message":{"ID":"9","Consumption":100}}"#;
        let reading: Reading = serde_json::from_str(line).unwrap();

        assert_eq!(reading.message_type(), "r900");
        assert_eq!(reading.meter_id(), "9");
        assert_eq!(reading.type_label(), None);
        assert_eq!(reading.consumption(), 100.0);
    }

    #[test]
    fn test_parse_numeric_id() {
        let line = r#"{"Type":"SCM","Message":{"ID":35775917,"Type":12,"Consumption":881250}}"#;
        let reading: Reading = serde_json::from_str(line).unwrap();

        assert_eq!(reading.meter_id(), "35775917");
        assert_eq!(reading.type_label(), Some("12"));
    }

    #[test]
    fn test_parse_ignores_extra_top_level_fields() {
        let line = r#"{"Time":"2024-03-01T10:00:00Z","Offset":0,"Length":96,"Type":"SCM","Message":{"ID":1,"Type":7,"Consumption":12}}"#;
        let reading: Reading = serde_json::from_str(line).unwrap();

        assert_eq!(reading.meter_id(), "1");
    }

    #[test]
    fn test_unknown_discriminator_rejected() {
        let line = r#"{"Type":"IDM","Message":{"ID":"1","Consumption":5}}"#;
        assert!(serde_json::from_str::<Reading>(line).is_err());
    }

    #[test]
    fn test_parse_readings_drops_malformed_lines() {
        let output = concat!(
            r#"{"Type":"SCM","Message":{"ID":"1","Type":"5","Consumption":10}}"#,
            "\n",
            "{garbage\n",
            r#"{"Type":"R900","Message":{"ID":"2","Consumption":20}}"#,
            "\n",
        );

        let outcome = parse_readings(output);

        assert_eq!(outcome.readings.len(), 2);
        assert_eq!(outcome.dropped, 1);
        assert_eq!(outcome.readings[0].meter_id(), "1");
        assert_eq!(outcome.readings[1].meter_id(), "2");
    }

    #[test]
    fn test_parse_readings_empty_output() {
        let outcome = parse_readings("");
        assert!(outcome.readings.is_empty());
        assert_eq!(outcome.dropped, 0);

        let outcome = parse_readings("\n\n");
        assert!(outcome.readings.is_empty());
        assert_eq!(outcome.dropped, 0);
    }

    #[test]
    fn test_unknown_discriminator_counts_as_drop() {
        let output = r#"{"Type":"IDM","Message":{"ID":"1","Consumption":5}}"#;
        let outcome = parse_readings(output);

        assert!(outcome.readings.is_empty());
        assert_eq!(outcome.dropped, 1);
    }
}
