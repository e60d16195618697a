//! Metrics registry and Prometheus text exposition.

use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;

use parking_lot::RwLock;

/// The fixed set of gauges this daemon exports. All descriptors are
/// registered when the registry is constructed; no metric is ever added or
/// removed at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Gauge {
    MeterConsumption,
    SensorTemperature,
    SensorHumidity,
    SensorBattery,
}

impl Gauge {
    /// Every registered gauge, in exposition order.
    pub const ALL: [Gauge; 4] = [
        Gauge::MeterConsumption,
        Gauge::SensorTemperature,
        Gauge::SensorHumidity,
        Gauge::SensorBattery,
    ];

    /// The exported metric name.
    pub fn name(&self) -> &'static str {
        match self {
            Gauge::MeterConsumption => "meter_consumption",
            Gauge::SensorTemperature => "rtl433_temperature",
            Gauge::SensorHumidity => "rtl433_humidity",
            Gauge::SensorBattery => "rtl433_battery",
        }
    }

    /// Help text for the exposition header.
    pub fn help(&self) -> &'static str {
        match self {
            Gauge::MeterConsumption => "Utility meter consumption",
            Gauge::SensorTemperature => "433 MHz device temperature",
            Gauge::SensorHumidity => "433 MHz device humidity",
            Gauge::SensorBattery => "433 MHz device battery status",
        }
    }
}

/// A unique identifier for one time series: gauge plus sorted label pairs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SeriesKey {
    gauge: Gauge,
    labels: Vec<(String, String)>,
}

impl SeriesKey {
    fn new(gauge: Gauge, labels: &[(&str, &str)]) -> Self {
        let mut labels: Vec<(String, String)> = labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        // Sort for consistent hashing and stable exposition output
        labels.sort_by(|a, b| a.0.cmp(&b.0));

        Self { gauge, labels }
    }

    /// Format labels for Prometheus exposition format.
    fn format_labels(&self) -> String {
        if self.labels.is_empty() {
            return String::new();
        }

        let parts: Vec<String> = self
            .labels
            .iter()
            .map(|(k, v)| format!("{}=\"{}\"", k, escape_label_value(v)))
            .collect();

        format!("{{{}}}", parts.join(","))
    }
}

/// Pipeline counters, rendered alongside the gauges.
#[derive(Debug, Clone, Default)]
pub struct RegistryStats {
    /// Meter readings classified and published.
    pub meter_readings: u64,
    /// Collector lines dropped as unparsable or unrecognized.
    pub meter_records_dropped: u64,
    /// Sensor events received and sampled.
    pub sensor_events: u64,
    /// Sensor payloads dropped as malformed or incomplete.
    pub sensor_events_dropped: u64,
}

/// Thread-safe gauge registry with last-write-wins semantics.
///
/// Writers from both pipelines and readers from the HTTP handler may run
/// concurrently; each write replaces one series value atomically. A series
/// persists until process exit, even if its labels stop being reported.
pub struct MetricRegistry {
    series: RwLock<HashMap<SeriesKey, f64>>,
    stats: RwLock<RegistryStats>,
}

/// A shareable registry handle.
pub type SharedRegistry = Arc<MetricRegistry>;

impl MetricRegistry {
    /// Create a registry with all four gauges registered.
    pub fn new() -> Self {
        Self {
            series: RwLock::new(HashMap::new()),
            stats: RwLock::new(RegistryStats::default()),
        }
    }

    /// Set a gauge sample, overwriting any prior value for the same label
    /// set.
    pub fn set(&self, gauge: Gauge, labels: &[(&str, &str)], value: f64) {
        let key = SeriesKey::new(gauge, labels);
        self.series.write().insert(key, value);
    }

    /// Number of distinct series currently stored.
    pub fn series_count(&self) -> usize {
        self.series.read().len()
    }

    /// Snapshot of the pipeline counters.
    pub fn stats(&self) -> RegistryStats {
        self.stats.read().clone()
    }

    /// Count readings that were classified and published.
    pub fn add_meter_readings(&self, n: u64) {
        self.stats.write().meter_readings += n;
    }

    /// Count collector lines dropped as unparsable or unrecognized.
    pub fn add_meter_dropped(&self, n: u64) {
        self.stats.write().meter_records_dropped += n;
    }

    /// Count one sampled sensor event.
    pub fn add_sensor_event(&self) {
        self.stats.write().sensor_events += 1;
    }

    /// Count one dropped sensor payload.
    pub fn add_sensor_dropped(&self) {
        self.stats.write().sensor_events_dropped += 1;
    }

    /// Render all metrics in Prometheus text exposition format.
    ///
    /// Output is stable: gauges render in registration order, series within
    /// a gauge in label order. Two renders with no intervening writes
    /// produce identical text.
    pub fn render(&self) -> String {
        let series = self.series.read();
        let mut output = Vec::with_capacity(series.len() * 64 + 512);

        for gauge in Gauge::ALL {
            writeln!(output, "# HELP {} {}", gauge.name(), gauge.help()).ok();
            writeln!(output, "# TYPE {} gauge", gauge.name()).ok();

            let mut rows: Vec<(&SeriesKey, &f64)> =
                series.iter().filter(|(k, _)| k.gauge == gauge).collect();
            rows.sort_by(|a, b| a.0.labels.cmp(&b.0.labels));

            for (key, value) in rows {
                writeln!(
                    output,
                    "{}{} {}",
                    gauge.name(),
                    key.format_labels(),
                    format_value(*value)
                )
                .ok();
            }
        }

        let stats = self.stats.read();
        writeln!(output).ok();
        for (name, value) in [
            ("rfbridge_meter_readings_total", stats.meter_readings),
            (
                "rfbridge_meter_records_dropped_total",
                stats.meter_records_dropped,
            ),
            ("rfbridge_sensor_events_total", stats.sensor_events),
            (
                "rfbridge_sensor_events_dropped_total",
                stats.sensor_events_dropped,
            ),
        ] {
            writeln!(output, "# TYPE {} counter", name).ok();
            writeln!(output, "{} {}", name, value).ok();
        }

        String::from_utf8(output).unwrap_or_default()
    }
}

impl Default for MetricRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Escape special characters in label values.
fn escape_label_value(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            '"' => result.push_str("\\\""),
            '\n' => result.push_str("\\n"),
            _ => result.push(c),
        }
    }
    result
}

/// Format a floating point value for exposition output and numeric-as-string
/// payloads.
pub(crate) fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value.is_sign_positive() {
            "+Inf".to_string()
        } else {
            "-Inf".to_string()
        }
    } else if value.fract() == 0.0 {
        format!("{:.0}", value)
    } else {
        format!("{}", value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_render() {
        let registry = MetricRegistry::new();
        registry.set(
            Gauge::MeterConsumption,
            &[("message_type", "scm"), ("type", "5"), ("id", "123")],
            4567.0,
        );

        let output = registry.render();

        assert!(output.contains("# TYPE meter_consumption gauge"));
        assert!(output.contains(
            "meter_consumption{id=\"123\",message_type=\"scm\",type=\"5\"} 4567"
        ));
    }

    #[test]
    fn test_last_write_wins() {
        let registry = MetricRegistry::new();
        registry.set(Gauge::SensorTemperature, &[("id", "7"), ("model", "X")], 20.0);
        registry.set(Gauge::SensorTemperature, &[("id", "7"), ("model", "X")], 21.5);

        assert_eq!(registry.series_count(), 1);

        let output = registry.render();
        assert!(output.contains("rtl433_temperature{id=\"7\",model=\"X\"} 21.5"));
        assert!(!output.contains(" 20\n"));
    }

    #[test]
    fn test_label_order_does_not_split_series() {
        let registry = MetricRegistry::new();
        registry.set(Gauge::SensorHumidity, &[("model", "X"), ("id", "7")], 40.0);
        registry.set(Gauge::SensorHumidity, &[("id", "7"), ("model", "X")], 41.0);

        assert_eq!(registry.series_count(), 1);
    }

    #[test]
    fn test_render_idempotent() {
        let registry = MetricRegistry::new();
        registry.set(Gauge::SensorBattery, &[("id", "1"), ("model", "A")], 1.0);
        registry.set(Gauge::SensorBattery, &[("id", "2"), ("model", "B")], 0.0);
        registry.add_meter_readings(3);

        assert_eq!(registry.render(), registry.render());
    }

    #[test]
    fn test_all_gauges_headered_when_empty() {
        let registry = MetricRegistry::new();
        let output = registry.render();

        for gauge in Gauge::ALL {
            assert!(output.contains(&format!("# HELP {} ", gauge.name())));
            assert!(output.contains(&format!("# TYPE {} gauge", gauge.name())));
        }
    }

    #[test]
    fn test_stats_rendered_as_counters() {
        let registry = MetricRegistry::new();
        registry.add_meter_readings(2);
        registry.add_meter_dropped(1);
        registry.add_sensor_event();
        registry.add_sensor_dropped();

        let output = registry.render();

        assert!(output.contains("rfbridge_meter_readings_total 2"));
        assert!(output.contains("rfbridge_meter_records_dropped_total 1"));
        assert!(output.contains("rfbridge_sensor_events_total 1"));
        assert!(output.contains("rfbridge_sensor_events_dropped_total 1"));
    }

    #[test]
    fn test_escape_label_value() {
        assert_eq!(escape_label_value("simple"), "simple");
        assert_eq!(escape_label_value("with\"quote"), "with\\\"quote");
        assert_eq!(escape_label_value("with\\backslash"), "with\\\\backslash");
        assert_eq!(escape_label_value("with\nnewline"), "with\\nnewline");
    }

    #[test]
    fn test_format_value() {
        assert_eq!(format_value(42.0), "42");
        assert_eq!(format_value(3.14), "3.14");
        assert_eq!(format_value(f64::NAN), "NaN");
        assert_eq!(format_value(f64::INFINITY), "+Inf");
    }
}
