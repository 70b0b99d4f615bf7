//! Broker transport for outbound messages.
//!
//! Endpoint parsing, the loopback policy and TLS material loading live in
//! `endpoint`; the rumqttc-backed `MqttSink` lives in `mqtt`.

mod endpoint;
mod mqtt;

pub use endpoint::{
    build_transport, parse_mqtt_endpoint, validate_loopback_addr, MqttEndpoint, TlsMaterials,
};
pub use mqtt::{MqttSettings, MqttSink, PAYLOAD_OFFLINE, PAYLOAD_ONLINE};
