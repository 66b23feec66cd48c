// src/io/mqtt/publisher.rs
//
// MQTT Publisher - forwards parsed serial lines to an MQTT broker.
//
// Each message is published as one JSON multi-array payload:
// {
//   "layout": {"dim": [{"label": "length", "size": 3, "stride": 1}], "data_offset": 0},
//   "data": [12, 340, -7]
// }

use rumqttc::{AsyncClient, Event, MqttOptions, Outgoing, Packet, QoS};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Duration;

use crate::io::{max_payload_len, IoError, ParsedMessage};

/// Broker packets we accept; only acks and pings arrive on this connection.
const INCOMING_PACKET_LIMIT: usize = 10 * 1024;
/// PUBLISH fixed header, topic length prefix and packet id.
const PUBLISH_HEADER_LEN: usize = 16;

/// Pause after a connection error before polling the event loop again.
const RECONNECT_DELAY: Duration = Duration::from_secs(1);
/// How long to keep flushing queued publishes after the input closes.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

// ============================================================================
// Configuration
// ============================================================================

/// MQTT publisher configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MqttConfig {
    /// MQTT broker hostname
    #[serde(default = "default_host")]
    pub host: String,
    /// MQTT broker port
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Topic every message is published to
    #[serde(default = "default_topic")]
    pub topic: String,
    /// Client ID (generated if None)
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    /// 0 = at most once, 1 = at least once, 2 = exactly once
    #[serde(default)]
    pub qos: u8,
    /// Outgoing request queue depth inside the client
    #[serde(default = "default_request_capacity")]
    pub request_capacity: usize,
}

fn default_host() -> String {
    "localhost".to_string()
}
fn default_port() -> u16 {
    1883
}
fn default_topic() -> String {
    "serial_bridge/data".to_string()
}
fn default_keep_alive_secs() -> u64 {
    30
}
fn default_request_capacity() -> usize {
    100
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            username: None,
            password: None,
            topic: default_topic(),
            client_id: None,
            keep_alive_secs: default_keep_alive_secs(),
            qos: 0,
            request_capacity: default_request_capacity(),
        }
    }
}

impl MqttConfig {
    pub fn broker_label(&self) -> String {
        format!("mqtt://{}:{}", self.host, self.port)
    }

    pub fn validate(&self) -> Result<(), IoError> {
        if self.host.trim().is_empty() {
            return Err(IoError::configuration("mqtt host must not be empty"));
        }
        if self.topic.trim().is_empty() {
            return Err(IoError::configuration("mqtt topic must not be empty"));
        }
        if self.topic.contains(['+', '#']) {
            return Err(IoError::configuration(format!(
                "mqtt topic must not contain wildcards: {}",
                self.topic
            )));
        }
        qos_from_level(self.qos).map(|_| ())
    }

    /// Largest PUBLISH packet a line of at most `max_line_len` bytes produces.
    pub fn outgoing_packet_limit(&self, max_line_len: usize) -> usize {
        PUBLISH_HEADER_LEN + self.topic.len() + max_payload_len(max_line_len)
    }

    fn resolved_client_id(&self) -> String {
        self.client_id
            .clone()
            .unwrap_or_else(|| format!("serial-bridge-{}", uuid::Uuid::new_v4().simple()))
    }
}

pub fn qos_from_level(level: u8) -> Result<QoS, IoError> {
    match level {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        2 => Ok(QoS::ExactlyOnce),
        other => Err(IoError::configuration(format!(
            "invalid mqtt qos {} (expected 0, 1 or 2)",
            other
        ))),
    }
}

// ============================================================================
// Publisher Task
// ============================================================================

/// Spawn the publisher. It runs until `rx` closes, then flushes and
/// disconnects. `max_line_len` sizes the outgoing packet limit so the longest
/// valid line still fits. Resolves to the number of PUBLISH packets written
/// to the broker connection.
pub fn spawn_publisher(
    config: MqttConfig,
    max_line_len: usize,
    rx: mpsc::Receiver<ParsedMessage>,
) -> Result<JoinHandle<u64>, IoError> {
    config.validate()?;
    let qos = qos_from_level(config.qos)?;
    Ok(tokio::spawn(run_publisher(config, qos, max_line_len, rx)))
}

async fn run_publisher(
    config: MqttConfig,
    qos: QoS,
    max_line_len: usize,
    mut rx: mpsc::Receiver<ParsedMessage>,
) -> u64 {
    let broker = config.broker_label();
    let client_id = config.resolved_client_id();

    let mut mqttoptions = MqttOptions::new(&client_id, &config.host, config.port);
    mqttoptions.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
    mqttoptions.set_max_packet_size(
        INCOMING_PACKET_LIMIT,
        config.outgoing_packet_limit(max_line_len),
    );
    if let (Some(username), Some(password)) = (&config.username, &config.password) {
        mqttoptions.set_credentials(username, password);
    }

    let (client, mut eventloop) = AsyncClient::new(mqttoptions, config.request_capacity);
    let mut queued: u64 = 0;
    let mut published: u64 = 0;
    let mut dropped: u64 = 0;

    tlog!("[mqtt] Publishing to '{}' on {} as {}", config.topic, broker, client_id);

    loop {
        tokio::select! {
            message = rx.recv() => {
                let Some(message) = message else { break };
                let payload = match serde_json::to_vec(&message.payload()) {
                    Ok(p) => p,
                    Err(e) => {
                        tlog!("[mqtt] Failed to encode payload: {}", e);
                        continue;
                    }
                };
                // try_publish keeps this loop from stalling the event loop
                // when the client queue is full.
                match client.try_publish(&config.topic, qos, false, payload) {
                    Ok(()) => queued += 1,
                    Err(e) => {
                        if dropped == 0 {
                            tlog!("[mqtt] Dropping messages: {}", e);
                        }
                        dropped += 1;
                    }
                }
            }
            event = eventloop.poll() => match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    tlog!("[mqtt] Connected to {}", broker);
                    if dropped > 0 {
                        tlog!("[mqtt] {} messages dropped while the queue was full", dropped);
                        dropped = 0;
                    }
                }
                Ok(Event::Outgoing(Outgoing::Publish(_))) => published += 1,
                Ok(_) => {}
                Err(e) => {
                    tlog!("[mqtt] Connection error on {}: {}", broker, e);
                    tokio::time::sleep(RECONNECT_DELAY).await;
                }
            },
        }
    }

    // Input closed: flush what is queued, then disconnect cleanly.
    if client.try_disconnect().is_ok() {
        let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Publish(_))) => published += 1,
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        })
        .await;
        if drained.is_err() {
            tlog!("[mqtt] Timed out flushing queued messages");
        }
    }

    tlog!(
        "[mqtt] Publisher stopped ({} of {} queued messages published)",
        published,
        queued
    );
    published
}
