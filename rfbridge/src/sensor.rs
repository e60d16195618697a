//! Sensor pipeline: demodulator runs and the event subscription.
//!
//! The demodulator publishes decoded events directly to the broker, so
//! this pipeline has two halves: a loop that re-invokes the external
//! process for a bounded listen window, and a standing MQTT subscription
//! that turns each event into gauge samples. Malformed payloads are
//! dropped and counted, never fatal.

use std::process::Stdio;
use std::time::Duration;

use rumqttc::{Event, Packet, QoS};
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use rfbridge_common::config::{MqttConfig, RadioConfig};
use rfbridge_common::error::{Error, Result};
use rfbridge_common::event::SensorEvent;
use rfbridge_common::topics;

use crate::config::SensorConfig;
use crate::mqtt;
use crate::registry::{Gauge, SharedRegistry};

/// Delay before retrying a failed demodulator run or subscription.
const RETRY_BACKOFF: Duration = Duration::from_secs(5);

/// A bounded demodulator run.
///
/// The real implementation shells out to the demodulator binary; tests
/// substitute a no-op.
pub trait SensorRadio {
    fn run(&self) -> impl Future<Output = Result<()>> + Send;
}

/// Invokes `rtl_433` against an rtl_tcp server, publishing decoded events
/// straight to the broker.
pub struct Rtl433Runner {
    bin: String,
    radio: String,
    broker: String,
    duration_secs: u64,
}

impl Rtl433Runner {
    pub fn new(config: &SensorConfig, radio: &RadioConfig, mqtt: &MqttConfig) -> Self {
        Self {
            bin: config.rtl433_bin.clone(),
            radio: radio.address(),
            broker: mqtt.address(),
            duration_secs: config.poll_secs,
        }
    }

    /// Demodulator argument list. `-F mqtt://...` makes the tool publish
    /// events itself; no output capture happens here.
    fn args(&self) -> Vec<String> {
        vec![
            "-d".to_string(),
            format!("rtl_tcp:{}", self.radio),
            "-M".to_string(),
            "newmodel".to_string(),
            "-T".to_string(),
            self.duration_secs.to_string(),
            "-F".to_string(),
            format!("mqtt://{}", self.broker),
        ]
    }
}

impl SensorRadio for Rtl433Runner {
    async fn run(&self) -> Result<()> {
        let status = Command::new(&self.bin)
            .args(self.args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|e| Error::Process(format!("failed to run {}: {}", self.bin, e)))?;

        if !status.success() {
            warn!(%status, bin = %self.bin, "Demodulator exited non-zero");
        }

        Ok(())
    }
}

/// Run the demodulator loop until shutdown.
pub async fn run_radio_loop<R: SensorRadio>(radio: R, mut shutdown: watch::Receiver<bool>) {
    info!("Starting sensor radio loop");

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
            result = radio.run() => {
                if let Err(err) = result {
                    warn!(%err, "Demodulator run failed");
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

    info!("Sensor radio loop stopped");
}

/// Standing subscription turning decoded sensor events into gauge samples.
pub struct SensorSubscriber {
    config: MqttConfig,
    registry: SharedRegistry,
}

impl SensorSubscriber {
    pub fn new(config: MqttConfig, registry: SharedRegistry) -> Self {
        Self { config, registry }
    }

    /// Run the subscription until shutdown, reconnecting with a backoff on
    /// connection loss.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(filter = topics::SENSOR_EVENTS_FILTER, "Starting sensor subscriber");

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                result = self.session() => {
                    // session() only returns on error
                    if let Err(err) = result {
                        warn!(%err, "Sensor subscription lost, reconnecting");
                    }
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

        info!("Sensor subscriber stopped");
    }

    /// One subscription session: connect, subscribe, process events until
    /// the connection drops.
    async fn session(&self) -> Result<()> {
        let client_id = format!("rfbridge-sub-{}", std::process::id());
        let (client, mut eventloop) = mqtt::connect(&self.config, &client_id);

        client
            .subscribe(topics::SENSOR_EVENTS_FILTER, QoS::AtMostOnce)
            .await
            .map_err(|e| Error::Mqtt(e.to_string()))?;

        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    self.handle(&publish.topic, &publish.payload);
                }
                Ok(_) => {}
                Err(err) => return Err(Error::Mqtt(err.to_string())),
            }
        }
    }

    /// Process one message arriving on the subscription.
    pub fn handle(&self, topic: &str, payload: &[u8]) {
        if !topics::is_sensor_event_topic(topic) {
            return;
        }

        match SensorEvent::parse(payload) {
            Ok(event) => self.sample(event),
            Err(err) => {
                self.registry.add_sensor_dropped();
                debug!(%err, topic, "Dropping malformed sensor payload");
            }
        }
    }

    /// Write gauge samples for one event.
    ///
    /// Temperature is required for the event to be meaningful; without it
    /// the whole event counts as dropped. Humidity and battery samples are
    /// written only when the event carries them.
    fn sample(&self, event: SensorEvent) {
        let Some(temperature) = event.temperature_c else {
            self.registry.add_sensor_dropped();
            debug!(
                model = %event.model,
                id = %event.id,
                "Dropping sensor event without temperature"
            );
            return;
        };

        let labels = [("id", event.id.as_str()), ("model", event.model.as_str())];

        self.registry
            .set(Gauge::SensorTemperature, &labels, temperature);

        if let Some(humidity) = event.humidity {
            self.registry.set(Gauge::SensorHumidity, &labels, humidity);
        }

        if let Some(battery) = event.battery_ok {
            self.registry.set(Gauge::SensorBattery, &labels, battery);
        }

        self.registry.add_sensor_event();
        debug!(
            model = %event.model,
            id = %event.id,
            temperature,
            "Sampled sensor event"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::MetricRegistry;
    use std::sync::Arc;

    fn make_subscriber() -> (SensorSubscriber, SharedRegistry) {
        let registry = Arc::new(MetricRegistry::new());
        let subscriber = SensorSubscriber::new(MqttConfig::default(), registry.clone());
        (subscriber, registry)
    }

    #[test]
    fn test_full_event_writes_three_gauges() {
        let (subscriber, registry) = make_subscriber();

        subscriber.handle(
            "rtl_433/Acurite-Tower/events",
            br#"{"model":"Acurite-Tower","id":11547,"temperature_C":21.5,"humidity":48,"battery_ok":1}"#,
        );

        let rendered = registry.render();
        assert!(rendered.contains("rtl433_temperature{id=\"11547\",model=\"Acurite-Tower\"} 21.5"));
        assert!(rendered.contains("rtl433_humidity{id=\"11547\",model=\"Acurite-Tower\"} 48"));
        assert!(rendered.contains("rtl433_battery{id=\"11547\",model=\"Acurite-Tower\"} 1"));
        assert_eq!(registry.stats().sensor_events, 1);
    }

    #[test]
    fn test_temperature_only_event() {
        let (subscriber, registry) = make_subscriber();

        subscriber.handle(
            "rtl_433/X/events",
            br#"{"model":"X","id":"7","temperature_C":21.5}"#,
        );

        let rendered = registry.render();
        assert!(rendered.contains("rtl433_temperature{id=\"7\",model=\"X\"} 21.5"));
        assert!(!rendered.contains("rtl433_humidity{"));
        assert!(!rendered.contains("rtl433_battery{"));
        assert_eq!(registry.series_count(), 1);
    }

    #[test]
    fn test_malformed_payload_dropped_and_counted() {
        let (subscriber, registry) = make_subscriber();

        subscriber.handle("rtl_433/X/events", b"{broken");

        assert_eq!(registry.series_count(), 0);
        assert_eq!(registry.stats().sensor_events_dropped, 1);
        assert_eq!(registry.stats().sensor_events, 0);
    }

    #[test]
    fn test_event_without_temperature_dropped() {
        let (subscriber, registry) = make_subscriber();

        subscriber.handle("rtl_433/X/events", br#"{"model":"X","id":1,"humidity":50}"#);

        assert_eq!(registry.series_count(), 0);
        assert_eq!(registry.stats().sensor_events_dropped, 1);
    }

    #[test]
    fn test_unrelated_topic_ignored() {
        let (subscriber, registry) = make_subscriber();

        subscriber.handle(
            "rtl_433/X/states",
            br#"{"model":"X","id":1,"temperature_C":5.0}"#,
        );

        assert_eq!(registry.series_count(), 0);
        assert_eq!(registry.stats().sensor_events_dropped, 0);
    }

    #[test]
    fn test_runner_args() {
        let runner = Rtl433Runner::new(
            &SensorConfig::default(),
            &RadioConfig {
                host: "radio.lan".to_string(),
                port: 1234,
            },
            &MqttConfig {
                host: "broker.lan".to_string(),
                port: 1883,
            },
        );

        assert_eq!(
            runner.args(),
            vec![
                "-d",
                "rtl_tcp:radio.lan:1234",
                "-M",
                "newmodel",
                "-T",
                "30",
                "-F",
                "mqtt://broker.lan:1883",
            ]
        );
    }
}
