//! MQTT telemetry listener
//!
//! Subscribes to the simulation telemetry topic and logs whatever the
//! engine side publishes there. Connection failures are retried a fixed
//! number of times with a fixed delay between attempts.

use crate::infra::config::Config;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Run the telemetry listener until shutdown or until retries are exhausted.
pub async fn start_telemetry_listener(
    config: &Config,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    if !config.telemetry_enabled() {
        info!("telemetry_disabled");
        return Ok(());
    }

    let mut mqttoptions =
        MqttOptions::new("simbridge", config.telemetry_host(), config.telemetry_port());
    mqttoptions.set_keep_alive(Duration::from_secs(30));

    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 100);
    client.subscribe(config.telemetry_topic(), QoS::AtMostOnce).await?;

    info!(
        topic = %config.telemetry_topic(),
        host = %config.telemetry_host(),
        port = %config.telemetry_port(),
        "telemetry_subscribed"
    );

    let max_retries = config.telemetry_max_retries();
    let retry_delay = config.telemetry_retry_delay();
    let mut attempt: u32 = 0;

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("telemetry_shutdown");
                    return Ok(());
                }
            }
            result = eventloop.poll() => {
                match result {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        match std::str::from_utf8(&publish.payload) {
                            Ok(payload) => {
                                info!(topic = %publish.topic, payload = %payload, "telemetry_message");
                            }
                            Err(e) => {
                                warn!(topic = %publish.topic, error = %e, "telemetry_payload_not_utf8");
                            }
                        }
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        attempt = 0;
                        info!("telemetry_connected");
                    }
                    Ok(event) => {
                        debug!(event = ?event, "telemetry_event");
                    }
                    Err(e) => {
                        attempt += 1;
                        if attempt > max_retries {
                            error!(error = %e, attempts = attempt, "telemetry_giving_up");
                            return Ok(());
                        }
                        warn!(
                            error = %e,
                            attempt = attempt,
                            max_retries = max_retries,
                            "telemetry_connect_failed"
                        );
                        tokio::time::sleep(retry_delay).await;
                    }
                }
            }
        }
    }
}
