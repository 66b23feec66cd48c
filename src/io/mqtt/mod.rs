// src/io/mqtt/mod.rs
//
// MQTT publisher: the downstream bus for parsed serial lines.

mod publisher;

pub use publisher::{qos_from_level, spawn_publisher, MqttConfig};
