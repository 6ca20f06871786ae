//! Pub/sub transport for the stream node: MQTT client, broker TLS settings
//! and video chunk framing.

pub mod chunk;
pub mod mqtt;
mod tls;

pub use chunk::VideoChunk;
pub use mqtt::{
    classify, connect_mqtt, mqtt_publish_qos1, Inbound, MqttRuntime, MqttSettings,
    DEFAULT_MAX_CHUNK_BYTES,
};
pub use tls::{parse_mqtt_endpoint, validate_loopback_addr, MqttEndpoint, TlsMaterials};
