//! MQTT broker connection plumbing.

use std::time::Duration;

use rumqttc::{AsyncClient, EventLoop, MqttOptions, QoS};
use tokio::sync::watch;
use tracing::{trace, warn};

use rfbridge_common::config::MqttConfig;
use rfbridge_common::error::{Error, Result};

/// Delay before repolling after a connection error.
const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);

/// Create a broker client and its event loop.
pub fn connect(config: &MqttConfig, client_id: &str) -> (AsyncClient, EventLoop) {
    let mut options = MqttOptions::new(client_id, config.host.clone(), config.port);
    options.set_keep_alive(Duration::from_secs(30));

    AsyncClient::new(options, 64)
}

/// Drive an event loop until shutdown.
///
/// rumqttc performs all network I/O (including reconnects) inside
/// `poll()`; publishes enqueued on the client only reach the broker while
/// this runs. Connection errors are logged and retried after a backoff.
pub async fn drive(mut eventloop: EventLoop, mut shutdown: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
            result = eventloop.poll() => match result {
                Ok(event) => trace!(?event, "MQTT event"),
                Err(err) => {
                    warn!(%err, "MQTT connection error, retrying");
                    tokio::select! {
                        _ = tokio::time::sleep(RECONNECT_BACKOFF) => {}
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
}

/// Sink for outbound broker messages.
///
/// Pipelines publish through this seam so tests can record messages in
/// memory instead of talking to a broker.
pub trait MessageSink {
    fn publish(
        &self,
        topic: String,
        payload: String,
    ) -> impl Future<Output = Result<()>> + Send;
}

impl MessageSink for AsyncClient {
    async fn publish(&self, topic: String, payload: String) -> Result<()> {
        // Unretained, QoS 0: readings are periodic and a lost sample is
        // replaced by the next collection pass.
        AsyncClient::publish(self, topic, QoS::AtMostOnce, false, payload)
            .await
            .map_err(|e| Error::Mqtt(e.to_string()))
    }
}
