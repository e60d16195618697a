//! Meter pipeline: collect readings, classify, publish.
//!
//! Each iteration invokes the external collector once (blocking for the
//! configured listen duration), parses its JSON-lines output, then fans
//! every recognized reading out to the registry and the broker. A failed
//! iteration is logged and retried after a backoff; it never takes the
//! process down.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use rfbridge_common::config::RadioConfig;
use rfbridge_common::error::{Error, Result};
use rfbridge_common::reading::{Reading, parse_readings};
use rfbridge_common::topics;

use crate::config::MeterConfig;
use crate::mqtt::MessageSink;
use crate::registry::{Gauge, SharedRegistry, format_value};

/// Delay before retrying after a failed iteration.
const RETRY_BACKOFF: Duration = Duration::from_secs(5);

/// Source of raw collector output.
///
/// The real implementation shells out to the collector binary; tests
/// substitute canned output.
pub trait MeterSource {
    fn collect(&self) -> impl Future<Output = Result<String>> + Send;
}

/// Invokes `rtlamr` against an rtl_tcp server and captures its output.
pub struct RtlamrCollector {
    bin: String,
    server: String,
    ids: Vec<String>,
    duration_secs: u64,
}

impl RtlamrCollector {
    pub fn new(config: &MeterConfig, radio: &RadioConfig) -> Self {
        Self {
            bin: config.rtlamr_bin.clone(),
            server: radio.address(),
            ids: config.ids.clone(),
            duration_secs: config.poll_secs,
        }
    }

    /// Collector argument list.
    ///
    /// An empty allowlist means a full scan: no ID filter, no
    /// single-device mode. Duplicate suppression (`-unique`) happens in the
    /// collector, not here.
    fn args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if !self.ids.is_empty() {
            args.push(format!("-filterid={}", self.ids.join(",")));
            args.push("-single=true".to_string());
        }

        args.push(format!("-server={}", self.server));
        args.push("-msgtype=all".to_string());
        args.push(format!("-duration={}s", self.duration_secs));
        args.push("-format=json".to_string());
        args.push("-unique".to_string());

        args
    }
}

impl MeterSource for RtlamrCollector {
    async fn collect(&self) -> Result<String> {
        let output = Command::new(&self.bin)
            .args(self.args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Error::Process(format!("failed to run {}: {}", self.bin, e)))?;

        // A non-zero exit means zero readings this cycle, not a pipeline
        // failure.
        if !output.status.success() {
            warn!(status = %output.status, bin = %self.bin, "Collector exited non-zero");
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Classify readings and fan them out to the registry and the broker.
///
/// Per reading: one `meter_consumption` gauge sample labeled
/// `{message_type, type (when present), id}`, then unretained QoS 0
/// publishes of `rtlamr/<id>/message_type`, `rtlamr/<id>/type` (SCM and
/// SCM+ only), and `rtlamr/<id>/consumption`. A broker error propagates to
/// the caller with the remaining readings unprocessed.
pub async fn process_readings<S: MessageSink>(
    readings: &[Reading],
    sink: &S,
    registry: &SharedRegistry,
) -> Result<()> {
    for reading in readings {
        let id = reading.meter_id();
        let message_type = reading.message_type();

        let mut labels = vec![("message_type", message_type), ("id", id)];
        if let Some(type_label) = reading.type_label() {
            labels.push(("type", type_label));
        }
        registry.set(Gauge::MeterConsumption, &labels, reading.consumption());

        sink.publish(topics::meter_message_type(id), message_type.to_string())
            .await?;
        if let Some(type_label) = reading.type_label() {
            sink.publish(topics::meter_type(id), type_label.to_string())
                .await?;
        }
        sink.publish(
            topics::meter_consumption(id),
            format_value(reading.consumption()),
        )
        .await?;

        registry.add_meter_readings(1);
        debug!(
            id,
            message_type,
            consumption = reading.consumption(),
            "Published meter reading"
        );
    }

    Ok(())
}

/// One collection pass: collect, parse, fan out.
async fn iterate<M: MeterSource, S: MessageSink>(
    source: &M,
    sink: &S,
    registry: &SharedRegistry,
) -> Result<usize> {
    let output = source.collect().await?;
    let outcome = parse_readings(&output);

    if outcome.dropped > 0 {
        registry.add_meter_dropped(outcome.dropped as u64);
        debug!(dropped = outcome.dropped, "Dropped unparsable collector lines");
    }

    process_readings(&outcome.readings, sink, registry).await?;

    Ok(outcome.readings.len())
}

/// Run the meter pipeline until shutdown.
pub async fn run_meter_loop<M: MeterSource, S: MessageSink>(
    source: M,
    sink: S,
    registry: SharedRegistry,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("Starting meter pipeline");

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
            result = iterate(&source, &sink, &registry) => match result {
                Ok(count) => {
                    if count > 0 {
                        info!(count, "Meter collection pass complete");
                    } else {
                        debug!("Meter collection pass returned no readings");
                    }
                }
                Err(err) => {
                    error!(%err, "Meter pipeline iteration failed");
                    tokio::select! {
                        _ = tokio::time::sleep(RETRY_BACKOFF) => {}
                        _ = shutdown.changed() => {
                            if *shutdown.borrow() {
                                break;
                            }
                        }
                    }
                }
            }
        }
    }

    info!("Meter pipeline stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::MetricRegistry;
    use std::sync::Arc;
    use std::sync::Mutex;

    struct RecordingSink {
        messages: Mutex<Vec<(String, String)>>,
    }

    impl RecordingSink {
        fn new() -> Self {
            Self {
                messages: Mutex::new(Vec::new()),
            }
        }

        fn messages(&self) -> Vec<(String, String)> {
            self.messages.lock().unwrap().clone()
        }
    }

    impl MessageSink for RecordingSink {
        async fn publish(&self, topic: String, payload: String) -> Result<()> {
            self.messages.lock().unwrap().push((topic, payload));
            Ok(())
        }
    }

    struct FailingSink;

    impl MessageSink for FailingSink {
        async fn publish(&self, _topic: String, _payload: String) -> Result<()> {
            Err(Error::Mqtt("connection reset".to_string()))
        }
    }

    struct FakeSource(String);

    impl MeterSource for FakeSource {
        async fn collect(&self) -> Result<String> {
            Ok(self.0.clone())
        }
    }

    fn parse(line: &str) -> Reading {
        serde_json::from_str(line).unwrap()
    }

    #[tokio::test]
    async fn test_scm_fan_out() {
        let registry = Arc::new(MetricRegistry::new());
        let sink = RecordingSink::new();
        let readings =
            [parse(r#"{"Type":"SCM","Message":{"ID":"123","Type":"5","Consumption":4567}}"#)];

        process_readings(&readings, &sink, &registry).await.unwrap();

        let rendered = registry.render();
        assert!(rendered.contains(
            "meter_consumption{id=\"123\",message_type=\"scm\",type=\"5\"} 4567"
        ));

        assert_eq!(
            sink.messages(),
            vec![
                ("rtlamr/123/message_type".to_string(), "scm".to_string()),
                ("rtlamr/123/type".to_string(), "5".to_string()),
                ("rtlamr/123/consumption".to_string(), "4567".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_scm_plus_uses_endpoint_identity() {
        let registry = Arc::new(MetricRegistry::new());
        let sink = RecordingSink::new();
        let readings = [parse(
            r#"{"Type":"SCM+","Message":{"EndpointID":"42","EndpointType":"8","Consumption":900}}"#,
        )];

        process_readings(&readings, &sink, &registry).await.unwrap();

        let rendered = registry.render();
        assert!(
            rendered.contains("meter_consumption{id=\"42\",message_type=\"scm+\",type=\"8\"} 900")
        );
        assert!(sink
            .messages()
            .iter()
            .any(|(t, p)| t == "rtlamr/42/message_type" && p == "scm+"));
    }

    #[tokio::test]
    async fn test_r900_skips_type_topic() {
        let registry = Arc::new(MetricRegistry::new());
        let sink = RecordingSink::new();
        let readings = [parse(r#"{"Type":"R900","Message":{"ID":"9","Consumption":100}}"#)];

        process_readings(&readings, &sink, &registry).await.unwrap();

        let rendered = registry.render();
        assert!(rendered.contains("meter_consumption{id=\"9\",message_type=\"r900\"} 100"));

        // Canonical topic shape for all variants; no trailing-slash R900
        // special case.
        assert_eq!(
            sink.messages(),
            vec![
                ("rtlamr/9/message_type".to_string(), "r900".to_string()),
                ("rtlamr/9/consumption".to_string(), "100".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_broker_error_propagates() {
        let registry = Arc::new(MetricRegistry::new());
        let readings = [parse(r#"{"Type":"R900","Message":{"ID":"9","Consumption":100}}"#)];

        let result = process_readings(&readings, &FailingSink, &registry).await;

        assert!(result.is_err());
        // The gauge write precedes the publish attempt
        assert_eq!(registry.series_count(), 1);
        assert_eq!(registry.stats().meter_readings, 0);
    }

    #[tokio::test]
    async fn test_iterate_drops_malformed_lines() {
        let registry = Arc::new(MetricRegistry::new());
        let sink = RecordingSink::new();
        let source = FakeSource(
            concat!(
                r#"{"Type":"SCM","Message":{"ID":"1","Type":"5","Consumption":10}}"#,
                "\n",
                "not json\n",
                r#"{"Type":"R900","Message":{"ID":"2","Consumption":20}}"#,
                "\n",
            )
            .to_string(),
        );

        let count = iterate(&source, &sink, &registry).await.unwrap();

        assert_eq!(count, 2);
        assert_eq!(registry.stats().meter_readings, 2);
        assert_eq!(registry.stats().meter_records_dropped, 1);
        assert_eq!(registry.series_count(), 2);
    }

    #[tokio::test]
    async fn test_iterate_empty_output() {
        let registry = Arc::new(MetricRegistry::new());
        let sink = RecordingSink::new();
        let source = FakeSource(String::new());

        let count = iterate(&source, &sink, &registry).await.unwrap();

        assert_eq!(count, 0);
        assert!(sink.messages().is_empty());
        assert_eq!(registry.series_count(), 0);
    }

    #[test]
    fn test_collector_args_full_scan() {
        let collector = RtlamrCollector::new(
            &MeterConfig::default(),
            &RadioConfig {
                host: "radio.lan".to_string(),
                port: 1234,
            },
        );

        let args = collector.args();

        assert_eq!(
            args,
            vec![
                "-server=radio.lan:1234",
                "-msgtype=all",
                "-duration=30s",
                "-format=json",
                "-unique",
            ]
        );
    }

    #[test]
    fn test_collector_args_with_allowlist() {
        let config = MeterConfig {
            ids: vec!["111".to_string(), "222".to_string()],
            poll_secs: 60,
            ..MeterConfig::default()
        };
        let collector = RtlamrCollector::new(&config, &RadioConfig::default());

        let args = collector.args();

        assert_eq!(args[0], "-filterid=111,222");
        assert_eq!(args[1], "-single=true");
        assert!(args.contains(&"-duration=60s".to_string()));
    }
}
