//! 433 MHz RF telemetry bridge daemon.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};

use rfbridge::config::BridgeConfig;
use rfbridge::meter::{self, RtlamrCollector};
use rfbridge::sensor::{self, Rtl433Runner, SensorSubscriber};
use rfbridge::{HttpServer, MetricRegistry};
use rfbridge_common::{LoggingConfig, init_tracing};

/// 433 MHz RF telemetry bridge.
#[derive(Parser, Debug)]
#[command(name = "rfbridge")]
#[command(about = "Bridge rtlamr and rtl_433 telemetry to MQTT and Prometheus")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format).
    #[arg(short, long)]
    config: Option<String>,

    /// HTTP listen address (overrides config).
    #[arg(long)]
    listen: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = if let Some(config_path) = &args.config {
        BridgeConfig::load_from_file(config_path)?
    } else {
        BridgeConfig::default()
    };

    // CLI overrides
    if let Some(listen) = args.listen {
        config.http.listen = listen;
        config.validate()?;
    }

    // Initialize logging
    let log_config = LoggingConfig {
        level: args.log_level.unwrap_or_else(|| config.logging.level.clone()),
        format: config.logging.format,
    };
    init_tracing(&log_config)?;

    info!("Starting rfbridge");

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // The registry is constructed here and handed to every pipeline and
    // the HTTP server; nothing else holds metric state.
    let registry = Arc::new(MetricRegistry::new());

    // Parse listen address
    let listen_addr = config
        .http
        .listen
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid listen address: {}", e))?;

    // Broker client for the meter publisher; its event loop runs as its
    // own task and handles reconnects.
    let publisher_id = format!("rfbridge-pub-{}", std::process::id());
    let (publisher, eventloop) = rfbridge::mqtt::connect(&config.mqtt, &publisher_id);
    let driver_shutdown = shutdown_rx.clone();
    let driver_task = tokio::spawn(rfbridge::mqtt::drive(eventloop, driver_shutdown));

    // Meter pipeline
    let collector = RtlamrCollector::new(&config.meter, &config.radio);
    let meter_registry = registry.clone();
    let meter_shutdown = shutdown_rx.clone();
    let meter_task = tokio::spawn(async move {
        meter::run_meter_loop(collector, publisher, meter_registry, meter_shutdown).await;
    });

    // Sensor radio loop
    let runner = Rtl433Runner::new(&config.sensor, &config.radio, &config.mqtt);
    let radio_shutdown = shutdown_rx.clone();
    let radio_task = tokio::spawn(async move {
        sensor::run_radio_loop(runner, radio_shutdown).await;
    });

    // Sensor event subscriber
    let subscriber = SensorSubscriber::new(config.mqtt.clone(), registry.clone());
    let subscriber_shutdown = shutdown_rx.clone();
    let subscriber_task = tokio::spawn(async move {
        subscriber.run(subscriber_shutdown).await;
    });

    // HTTP server
    let http_server = HttpServer::new(registry.clone(), listen_addr, config.http.path.clone());
    let http_shutdown = shutdown_rx.clone();
    let http_task = tokio::spawn(async move {
        if let Err(e) = http_server.run(http_shutdown).await {
            error!("HTTP server error: {}", e);
        }
    });

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = async {
            #[cfg(unix)]
            {
                let mut sigterm = tokio::signal::unix::signal(
                    tokio::signal::unix::SignalKind::terminate()
                ).unwrap();
                sigterm.recv().await;
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await;
            }
        } => {
            info!("Received SIGTERM, shutting down...");
        }
    }

    // Signal shutdown
    shutdown_tx.send(true)?;

    // Wait for tasks to complete
    let _ = tokio::time::timeout(Duration::from_secs(5), async {
        let _ = meter_task.await;
        let _ = radio_task.await;
        let _ = subscriber_task.await;
        let _ = http_task.await;
        let _ = driver_task.await;
    })
    .await;

    // Print final stats
    let stats = registry.stats();
    info!(
        meter_readings = stats.meter_readings,
        meter_records_dropped = stats.meter_records_dropped,
        sensor_events = stats.sensor_events,
        sensor_events_dropped = stats.sensor_events_dropped,
        series_count = registry.series_count(),
        "Final statistics"
    );

    info!("rfbridge stopped");
    Ok(())
}
