//! MQTT scan feed
//!
//! Subscribes to the topic barcode-server (or any other publisher) posts scans
//! to. Payloads are barcode-server JSON; anything that is not JSON is taken
//! as the raw barcode.

use crate::domain::ScanEvent;
use crate::infra::metrics::Metrics;
use crate::io::feed::{forward, forward_payload, wait_for_shutdown};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct MqttFeedConfig {
    pub host: String,
    pub port: u16,
    pub topic: String,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Raw-barcode fallback for payloads that are not JSON
fn raw_barcode(payload: &[u8]) -> Option<&str> {
    let text = std::str::from_utf8(payload).ok()?.trim();
    if text.is_empty() || text.starts_with('{') {
        return None;
    }
    Some(text)
}

/// Start the MQTT client and forward scans to the channel
pub async fn start_mqtt_feed(
    config: MqttFeedConfig,
    scan_tx: mpsc::Sender<ScanEvent>,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), rumqttc::ClientError> {
    let mut mqttoptions = MqttOptions::new(&config.client_id, &config.host, config.port);
    mqttoptions.set_keep_alive(Duration::from_secs(30));

    if let (Some(username), Some(password)) = (&config.username, &config.password) {
        mqttoptions.set_credentials(username, password);
    }

    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 100);
    client.subscribe(&config.topic, QoS::AtLeastOnce).await?;

    info!(topic = %config.topic, host = %config.host, port = %config.port, "mqtt_feed_subscribed");

    loop {
        tokio::select! {
            _ = wait_for_shutdown(&mut shutdown) => {
                info!("mqtt_feed_shutdown");
                let _ = client.disconnect().await;
                return Ok(());
            }
            result = eventloop.poll() => {
                match result {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        debug!(topic = %publish.topic, bytes = %publish.payload.len(), "mqtt_message");
                        let forwarded = match raw_barcode(&publish.payload) {
                            Some(barcode) => forward(ScanEvent::new(barcode), &scan_tx).await,
                            None => forward_payload(&publish.payload, &scan_tx, &metrics).await,
                        };
                        if !forwarded {
                            warn!("mqtt_feed_channel_closed");
                            return Ok(());
                        }
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        metrics.record_feed_connect();
                        info!("feed_connected");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(error = %e, "mqtt_feed_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
    }
}
