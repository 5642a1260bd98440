//! MQTT telemetry sink
//!
//! Publishes with QoS 1, not retained. The rumqttc event loop runs in a
//! background task for the lifetime of the sink; it reconnects on its own
//! after broker outages. A publish only enqueues; it fails when the topic
//! is invalid or the request channel is full.
//!
//! The event loop does not read the channel while it cannot reach the
//! broker. The channel holds a single request, so an outage piles up one
//! stale status for delivery on reconnect and later publishes fail.

use super::TelemetrySink;
use crate::config::MqttConfig;
use crate::error::{Result, RouterError};
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Requests buffered between the client handle and the event loop
const CHANNEL_CAPACITY: usize = 1;

pub struct MqttSink {
    client: AsyncClient,
    event_loop: JoinHandle<()>,
}

impl MqttSink {
    /// Create the client and start driving its event loop. Must be called
    /// from within a tokio runtime.
    pub fn connect(config: &MqttConfig) -> Self {
        let client_id = format!("{}-{}", config.client_prefix, Uuid::new_v4());
        let mut options = MqttOptions::new(client_id.clone(), config.host.clone(), config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            options.set_credentials(username.clone(), password.clone());
        }

        let (client, mut event_loop) = AsyncClient::new(options, CHANNEL_CAPACITY);

        info!(
            "MQTT client {} created for {}:{}",
            client_id, config.host, config.port
        );

        let handle = tokio::spawn(async move {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("Connected to MQTT broker");
                    }
                    Ok(event) => {
                        debug!("MQTT event: {:?}", event);
                    }
                    Err(e) => {
                        warn!("MQTT connection error: {}. Retrying in 5s...", e);
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        });

        Self {
            client,
            event_loop: handle,
        }
    }
}

#[async_trait]
impl TelemetrySink for MqttSink {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        self.client
            .try_publish(topic, QoS::AtLeastOnce, false, payload)
            .map_err(|e| RouterError::PublishFailed(e.to_string()))
    }
}

impl Drop for MqttSink {
    fn drop(&mut self) {
        self.event_loop.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> MqttConfig {
        MqttConfig {
            // Nothing listens here; the event loop just keeps retrying
            host: "127.0.0.1".to_string(),
            port: 1,
            client_prefix: "router-watchdog-test".to_string(),
            username: None,
            password: None,
            keep_alive_secs: 30,
        }
    }

    #[tokio::test]
    async fn test_publish_is_queued_without_broker() {
        let sink = MqttSink::connect(&config());
        sink.publish("pitu/router/telemetry", b"{}".to_vec())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_invalid_topic_is_publish_failed() {
        let sink = MqttSink::connect(&config());
        let result = sink.publish("pitu/+/telemetry", b"{}".to_vec()).await;
        assert!(matches!(result, Err(RouterError::PublishFailed(_))));
    }

    #[tokio::test]
    async fn test_outage_keeps_at_most_one_queued_status() {
        let sink = MqttSink::connect(&config());
        let mut outcomes = Vec::new();
        for _ in 0..4 {
            outcomes.push(sink.publish("pitu/router/telemetry", b"{}".to_vec()).await);
        }
        assert!(outcomes[0].is_ok());
        assert!(outcomes[1..]
            .iter()
            .all(|r| matches!(r, Err(RouterError::PublishFailed(_)))));
    }
}
