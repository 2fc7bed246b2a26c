//! MQTT client wrapper for the sensor bus.

use super::{BusEvent, TopicSubscriber};
use crate::config::MqttConfig;
use crate::error::{RelayError, Result};
use async_trait::async_trait;
use log::{debug, error, info};
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet, QoS};
use std::time::Duration;
use tokio::sync::mpsc;

/// MQTT client feeding bus events to the relay loop.
pub struct MqttClient {
    client: AsyncClient,
    event_loop: EventLoop,
}

impl MqttClient {
    /// Create a new MQTT client from configuration.
    pub fn new(config: &MqttConfig) -> Self {
        let mut options =
            MqttOptions::new(&config.client_id, &config.broker_host, config.broker_port);
        options.set_keep_alive(Duration::from_secs(30));
        // camera snapshots and clips arrive as single publishes
        options.set_max_packet_size(64 * 1024 * 1024, 64 * 1024 * 1024);

        if let Some(username) = &config.username {
            options.set_credentials(username, config.password.as_deref().unwrap_or_default());
        }

        let (client, event_loop) = AsyncClient::new(options, 100);

        Self { client, event_loop }
    }

    /// Get a clone of the async client for subscribing from the relay loop.
    pub fn client(&self) -> AsyncClient {
        self.client.clone()
    }

    /// Run the MQTT event loop and forward connection acknowledgements and
    /// publishes to `tx`.
    ///
    /// rumqttc reconnects on the next poll after an error; every successful
    /// reconnect produces a fresh `Connected` event so topics get
    /// re-subscribed.
    pub async fn run(mut self, tx: mpsc::Sender<BusEvent>) {
        info!("[MQTT] Starting event loop");

        loop {
            let event = match self.event_loop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    let code = if ack.code == ConnectReturnCode::Success {
                        0
                    } else {
                        ack.code as u8
                    };
                    BusEvent::Connected(code)
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    debug!(
                        "[MQTT] Received {} byte(s) on {}",
                        publish.payload.len(),
                        publish.topic
                    );
                    BusEvent::Message {
                        topic: publish.topic,
                        payload: publish.payload.to_vec(),
                        retain: publish.retain,
                    }
                }
                Ok(_) => continue,
                Err(e) => {
                    error!("[MQTT] Connection error: {:?}", e);
                    // Wait before reconnecting
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    continue;
                }
            };

            if tx.send(event).await.is_err() {
                error!("[MQTT] Bus event channel closed");
                break;
            }
        }
    }
}

#[async_trait]
impl TopicSubscriber for AsyncClient {
    async fn subscribe(&self, pattern: &str) -> Result<()> {
        info!("[MQTT] Subscribing to topic: {}", pattern);
        AsyncClient::subscribe(self, pattern, QoS::AtMostOnce)
            .await
            .map_err(RelayError::from)
    }
}
