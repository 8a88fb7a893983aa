use anyhow::{Context, Result};
use chrono::Utc;
use common::{ReconnectPolicy, with_jitter};
use rumqttc::{Client, ConnectionError, Event, MqttOptions, Packet, QoS};
use serde::Serialize;
use session::NotificationGateway;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::config::MqttConfig;

const BROKER_BACKOFF: ReconnectPolicy = ReconnectPolicy::CappedExponential {
    base: Duration::from_millis(100),
    max: Duration::from_secs(30),
};

#[derive(Debug, Serialize)]
pub struct AlertNotification {
    pub device_id: String,
    pub timestamp: String,
    pub event_type: &'static str,
    pub title: String,
    pub body: String,
}

impl AlertNotification {
    fn new(device_id: &str, event_type: &'static str, title: &str, body: &str) -> Self {
        Self {
            device_id: device_id.to_string(),
            timestamp: Utc::now().to_rfc3339(),
            event_type,
            title: title.to_string(),
            body: body.to_string(),
        }
    }
}

/// Publishes alert notifications to an MQTT broker (push relay, pager...).
pub struct MqttGateway {
    client: Client,
    topic: String,
    device_id: String,
    connected: Arc<AtomicBool>,
}

impl MqttGateway {
    pub fn new(config: &MqttConfig) -> Result<Self> {
        let mut mqtt_options = MqttOptions::new(
            format!("drowning-monitor-{}", config.device_id),
            &config.broker_host,
            config.broker_port,
        );
        mqtt_options.set_keep_alive(Duration::from_secs(30));
        mqtt_options.set_clean_session(true);

        let (client, mut connection) = Client::new(mqtt_options, 10);
        let connected = Arc::new(AtomicBool::new(false));
        let connected_clone = Arc::clone(&connected);

        std::thread::Builder::new()
            .name("mqtt-eventloop".to_string())
            .spawn(move || {
                let mut reconnect_attempts = 0u32;

                loop {
                    for notification in connection.iter() {
                        match notification {
                            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                                connected_clone.store(true, Ordering::Release);
                                reconnect_attempts = 0;
                                tracing::info!("MQTT connected to broker");
                            }
                            Ok(Event::Incoming(Packet::PingResp)) => {
                                tracing::trace!("MQTT ping response received");
                            }
                            Ok(_) => {}
                            Err(e) => {
                                connected_clone.store(false, Ordering::Release);
                                match &e {
                                    ConnectionError::Io(_) | ConnectionError::NetworkTimeout => {
                                        let backoff = broker_backoff(reconnect_attempts);
                                        reconnect_attempts = reconnect_attempts.saturating_add(1);
                                        tracing::warn!(
                                            error = %e,
                                            attempt = reconnect_attempts,
                                            backoff_ms = backoff.as_millis() as u64,
                                            "MQTT connection lost, reconnecting"
                                        );
                                        std::thread::sleep(backoff);
                                    }
                                    _ => {
                                        tracing::error!(error = %e, "MQTT error");
                                    }
                                }
                            }
                        }
                    }

                    // Iterator ends on disconnect; iterating again reconnects.
                    connected_clone.store(false, Ordering::Release);
                    let backoff = broker_backoff(reconnect_attempts);
                    reconnect_attempts = reconnect_attempts.saturating_add(1);
                    tracing::warn!(
                        attempt = reconnect_attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        "MQTT connection closed, attempting reconnect"
                    );
                    std::thread::sleep(backoff);
                }
            })
            .context("Failed to spawn MQTT event loop thread")?;

        tracing::info!(
            broker = %format!("{}:{}", config.broker_host, config.broker_port),
            topic = %config.topic,
            device_id = %config.device_id,
            "MQTT gateway initialized"
        );

        Ok(Self {
            client,
            topic: config.topic.clone(),
            device_id: config.device_id.clone(),
            connected,
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn publish(&self, notification: &AlertNotification) -> Result<()> {
        if !self.is_connected() {
            // rumqttc queues the publish and delivers it after reconnecting.
            tracing::debug!(event_type = notification.event_type, "Broker offline, queueing");
        }

        let payload =
            serde_json::to_string(notification).context("Failed to serialize alert notification")?;

        self.client
            .publish(&self.topic, QoS::AtLeastOnce, false, payload.as_bytes())
            .context("Failed to publish MQTT message")?;

        tracing::debug!(event_type = notification.event_type, "Alert notification published");
        Ok(())
    }
}

impl NotificationGateway for MqttGateway {
    fn raise_alert(&mut self, title: &str, body: &str) -> Result<()> {
        self.publish(&AlertNotification::new(&self.device_id, "alert_raised", title, body))
    }

    fn clear_alert(&mut self) -> Result<()> {
        self.publish(&AlertNotification::new(
            &self.device_id,
            "alert_cleared",
            session::notify::ALERT_TITLE,
            "Dismissed",
        ))
    }
}

fn broker_backoff(attempt: u32) -> Duration {
    with_jitter(BROKER_BACKOFF.delay_for_attempt(attempt))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn notification_payload_shape() {
        let notification =
            AlertNotification::new("pool-3", "alert_raised", "ALERT - PERSON DROWNING", "Tap to check");
        let json: Value = serde_json::from_str(&serde_json::to_string(&notification).unwrap()).unwrap();

        assert_eq!(json["device_id"], "pool-3");
        assert_eq!(json["event_type"], "alert_raised");
        assert_eq!(json["title"], "ALERT - PERSON DROWNING");
        assert_eq!(json["body"], "Tap to check");
        assert!(chrono::DateTime::parse_from_rfc3339(json["timestamp"].as_str().unwrap()).is_ok());
    }

    #[test]
    fn broker_backoff_is_capped() {
        assert!(broker_backoff(0) >= Duration::from_millis(100));
        assert!(broker_backoff(0) < Duration::from_millis(111));
        assert!(broker_backoff(40) <= Duration::from_secs(33));
        assert!(broker_backoff(40) >= Duration::from_secs(30));
    }
}
