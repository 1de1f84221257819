//! MQTT alert transport

use chrono::{DateTime, Utc};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::{Alert, AlertError, AlertSender};

/// MQTT transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertTransportConfig {
    pub broker_host: String,
    pub broker_port: u16,
    /// Base topic; attachments go to `<topic>/attachments/<file name>`
    pub topic: String,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Largest outgoing packet, sized for full-resolution JPEG frames
    pub max_packet_bytes: usize,
    pub keep_alive_secs: u64,
}

impl Default for AlertTransportConfig {
    fn default() -> Self {
        Self {
            broker_host: "localhost".to_string(),
            broker_port: 1883,
            topic: "vespwatch/alerts".to_string(),
            client_id: "vespwatch".to_string(),
            username: None,
            password: None,
            max_packet_bytes: 16 * 1024 * 1024,
            keep_alive_secs: 30,
        }
    }
}

/// JSON message published on the base topic
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertMessage {
    pub alert_id: Uuid,
    pub source: String,
    pub sent_at: DateTime<Utc>,
    pub subject: String,
    pub body: String,
    pub attachments: Vec<String>,
}

impl AlertMessage {
    fn new(alert: &Alert, source: &str) -> Self {
        Self {
            alert_id: Uuid::new_v4(),
            source: source.to_string(),
            sent_at: Utc::now(),
            subject: alert.subject.clone(),
            body: alert.body.clone(),
            attachments: alert.attachments.iter().map(|a| a.file_name.clone()).collect(),
        }
    }
}

fn attachment_topic(base: &str, file_name: &str) -> String {
    format!("{}/attachments/{}", base.trim_end_matches('/'), file_name)
}

/// Publishes alerts to an MQTT broker.
///
/// The client's event loop runs as a tokio task; `send` is synchronous and
/// only enqueues onto the client, failing fast while the broker connection
/// is down so the caller can retry later.
pub struct MqttAlertSender {
    config: AlertTransportConfig,
    client: AsyncClient,
    connected: Arc<AtomicBool>,
}

impl MqttAlertSender {
    /// Create the client and spawn its event loop on the current tokio runtime
    pub fn connect(config: AlertTransportConfig) -> Result<Self, AlertError> {
        let handle = tokio::runtime::Handle::try_current().map_err(|_| AlertError::NoRuntime)?;

        let mut options =
            MqttOptions::new(&config.client_id, &config.broker_host, config.broker_port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs.max(5)));
        options.set_max_packet_size(config.max_packet_bytes, config.max_packet_bytes);
        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            options.set_credentials(user, pass);
        }

        let (client, mut eventloop) = AsyncClient::new(options, 16);
        let connected = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&connected);
        let broker = format!("{}:{}", config.broker_host, config.broker_port);
        handle.spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        flag.store(true, Ordering::SeqCst);
                        info!("Connected to MQTT broker: {}", broker);
                    }
                    Ok(Event::Incoming(incoming)) => {
                        debug!("MQTT incoming: {:?}", incoming);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        if flag.swap(false, Ordering::SeqCst) {
                            error!("MQTT connection lost: {}", e);
                        } else {
                            debug!("MQTT connect attempt failed: {}", e);
                        }
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        });

        info!(
            "MQTT alert transport for {}:{} topic {}",
            config.broker_host, config.broker_port, config.topic
        );
        Ok(Self {
            config,
            client,
            connected,
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn publish(&self, topic: String, payload: Vec<u8>) -> Result<(), AlertError> {
        self.client
            .try_publish(topic, QoS::AtLeastOnce, false, payload)
            .map_err(|e| AlertError::Publish(e.to_string()))
    }
}

impl AlertSender for MqttAlertSender {
    fn send(&self, alert: &Alert) -> Result<(), AlertError> {
        if !self.is_connected() {
            return Err(AlertError::NotConnected(format!(
                "{}:{}",
                self.config.broker_host, self.config.broker_port
            )));
        }

        // Read every attachment before publishing anything
        let mut files = Vec::with_capacity(alert.attachments.len());
        for attachment in &alert.attachments {
            let bytes = std::fs::read(&attachment.path).map_err(|source| AlertError::Attachment {
                path: attachment.path.clone(),
                source,
            })?;
            files.push((attachment_topic(&self.config.topic, &attachment.file_name), bytes));
        }

        let message = AlertMessage::new(alert, &self.config.client_id);
        self.publish(self.config.topic.clone(), serde_json::to_vec(&message)?)?;
        for (topic, bytes) in files {
            debug!("Publishing attachment to {} ({} bytes)", topic, bytes.len());
            self.publish(topic, bytes)?;
        }

        info!("Alert {} published to {}", message.alert_id, self.config.topic);
        Ok(())
    }

    fn describe(&self) -> String {
        format!(
            "mqtt://{}:{}/{}",
            self.config.broker_host, self.config.broker_port, self.config.topic
        )
    }
}
