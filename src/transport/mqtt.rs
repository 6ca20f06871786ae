//! MQTT client for the stream node.
//!
//! A connection thread iterates the rumqttc event loop, re-subscribes on
//! every ConnAck and forwards publishes on the command and video topics as
//! `Inbound` messages. Status snapshots are published retained with QoS 1.

use anyhow::{Context, Result};
use rumqttc::v5::{mqttbytes::QoS, Client, Connection, Event, Incoming, MqttOptions};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use super::tls::{MqttEndpoint, TlsMaterials};
use crate::config::TopicSettings;
use crate::status::StatusSnapshot;

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Largest video chunk accepted on the video topic unless configured.
pub const DEFAULT_MAX_CHUNK_BYTES: u32 = 4 * 1024 * 1024;

/// Room for the fixed header, topic and properties on top of the payload.
const PUBLISH_HEADROOM: u32 = 4 * 1024;

#[derive(Clone, Debug)]
pub struct MqttSettings {
    pub endpoint: MqttEndpoint,
    pub tls: TlsMaterials,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Largest chunk payload the connection will read; bigger publishes drop
    /// the connection.
    pub max_chunk_bytes: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Inbound {
    Command(Vec<u8>),
    Video(Vec<u8>),
}

/// Route a publish by topic.
pub fn classify(topics: &TopicSettings, topic: &str, payload: &[u8]) -> Option<Inbound> {
    if topic == topics.command {
        Some(Inbound::Command(payload.to_vec()))
    } else if topic == topics.video {
        Some(Inbound::Video(payload.to_vec()))
    } else {
        None
    }
}

pub fn connect_mqtt(settings: &MqttSettings) -> Result<(Client, Connection)> {
    let endpoint = &settings.endpoint;
    let mut options = MqttOptions::new(&settings.client_id, &endpoint.host, endpoint.port);
    options.set_keep_alive(Duration::from_secs(60));
    options.set_clean_start(true);
    // rumqttc's own incoming limit is 10 KiB, below a single keyframe.
    options.set_max_packet_size(Some(
        settings.max_chunk_bytes.saturating_add(PUBLISH_HEADROOM),
    ));
    if let Some(user) = settings.username.as_deref() {
        options.set_credentials(user, settings.password.as_deref().unwrap_or_default());
    }
    options.set_transport(endpoint.transport(&settings.tls)?);

    let (client, connection) = Client::new(options, 10);
    log::info!(
        "MQTT client created for {}:{} (TLS: {}, auth: {})",
        endpoint.host,
        endpoint.port,
        endpoint.use_tls,
        settings.username.is_some()
    );
    Ok((client, connection))
}

pub struct MqttRuntime {
    client: Client,
    topics: TopicSettings,
    shutdown: Arc<AtomicBool>,
    connection_handle: Option<JoinHandle<()>>,
}

impl MqttRuntime {
    /// Connect and start the connection thread. Inbound messages are sent
    /// on the returned channel until `disconnect`.
    pub fn start(
        settings: &MqttSettings,
        topics: TopicSettings,
    ) -> Result<(Self, mpsc::Receiver<Inbound>)> {
        let (client, connection) = connect_mqtt(settings)?;
        let (tx, rx) = mpsc::channel();
        let shutdown = Arc::new(AtomicBool::new(false));

        let thread_client = client.clone();
        let thread_topics = topics.clone();
        let thread_shutdown = Arc::clone(&shutdown);
        let handle = std::thread::Builder::new()
            .name("mqtt-connection".to_string())
            .spawn(move || {
                run_connection(connection, thread_client, thread_topics, tx, thread_shutdown)
            })
            .context("spawn MQTT connection thread")?;

        Ok((
            Self {
                client,
                topics,
                shutdown,
                connection_handle: Some(handle),
            },
            rx,
        ))
    }

    pub fn publish_status(&self, snapshot: &StatusSnapshot) -> Result<()> {
        let payload = serde_json::to_vec(snapshot).context("serialize status")?;
        mqtt_publish_qos1(&self.client, &self.topics.status, &payload, true)
    }

    pub fn disconnect(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        self.client.disconnect()?;
        if let Some(handle) = self.connection_handle.take() {
            let _ = handle.join();
        }
        Ok(())
    }
}

fn run_connection(
    mut connection: Connection,
    client: Client,
    topics: TopicSettings,
    tx: mpsc::Sender<Inbound>,
    shutdown: Arc<AtomicBool>,
) {
    for event in connection.iter() {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match event {
            Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                for topic in [&topics.command, &topics.video] {
                    if let Err(e) = client.subscribe(topic.as_str(), QoS::AtMostOnce) {
                        log::error!("failed to subscribe to {}: {}", topic, e);
                    }
                }
                log::info!("subscribed to {} and {}", topics.command, topics.video);
            }
            Ok(Event::Incoming(Incoming::Publish(publish))) => {
                let topic = match std::str::from_utf8(&publish.topic) {
                    Ok(topic) => topic,
                    Err(e) => {
                        log::warn!("skipping publish with invalid topic: {}", e);
                        continue;
                    }
                };
                if let Some(message) = classify(&topics, topic, &publish.payload) {
                    if tx.send(message).is_err() {
                        break;
                    }
                }
            }
            Ok(_) => {}
            Err(e) => {
                if shutdown.load(Ordering::SeqCst) {
                    break;
                }
                log::error!("MQTT connection error: {}. Reconnecting...", e);
                std::thread::sleep(RECONNECT_DELAY);
            }
        }
    }
}

pub fn mqtt_publish_qos1(client: &Client, topic: &str, payload: &[u8], retain: bool) -> Result<()> {
    client.publish(topic, QoS::AtLeastOnce, retain, payload.to_vec())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MqttEndpoint, TlsMaterials, VideoChunk};
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};

    fn topics() -> TopicSettings {
        TopicSettings {
            command: "streamer/command".to_string(),
            video: "streamer/video".to_string(),
            status: "streamer/status".to_string(),
        }
    }

    #[test]
    fn classify_routes_by_topic() {
        let topics = topics();
        assert_eq!(
            classify(&topics, "streamer/command", b"{}"),
            Some(Inbound::Command(b"{}".to_vec()))
        );
        assert_eq!(
            classify(&topics, "streamer/video", &[1, 2]),
            Some(Inbound::Video(vec![1, 2]))
        );
        assert_eq!(classify(&topics, "streamer/status", b"{}"), None);
    }

    fn write_remaining_len(out: &mut Vec<u8>, mut len: usize) {
        loop {
            let mut byte = (len % 128) as u8;
            len /= 128;
            if len > 0 {
                byte |= 0x80;
            }
            out.push(byte);
            if len == 0 {
                break;
            }
        }
    }

    fn read_packet(stream: &mut TcpStream) -> u8 {
        let mut byte = [0u8; 1];
        stream.read_exact(&mut byte).expect("packet type");
        let packet_type = byte[0];
        let (mut len, mut shift) = (0usize, 0);
        loop {
            stream.read_exact(&mut byte).expect("remaining length");
            len |= ((byte[0] & 0x7f) as usize) << shift;
            shift += 7;
            if byte[0] & 0x80 == 0 {
                break;
            }
        }
        let mut body = vec![0u8; len];
        stream.read_exact(&mut body).expect("packet body");
        packet_type
    }

    fn publish_v5(topic: &str, payload: &[u8]) -> Vec<u8> {
        let mut packet = vec![0x30];
        write_remaining_len(&mut packet, 2 + topic.len() + 1 + payload.len());
        packet.extend_from_slice(&(topic.len() as u16).to_be_bytes());
        packet.extend_from_slice(topic.as_bytes());
        packet.push(0x00);
        packet.extend_from_slice(payload);
        packet
    }

    #[test]
    fn keyframe_sized_chunks_fit_through_the_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().expect("addr").port();
        let chunk = VideoChunk::new(7, vec![0x5a; 20 * 1024]).encode();
        let packet = publish_v5("streamer/video", &chunk);

        let broker = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("accept");
            assert_eq!(read_packet(&mut stream) >> 4, 1, "expected CONNECT");
            stream.write_all(&[0x20, 0x03, 0x00, 0x00, 0x00]).expect("connack");
            stream.write_all(&packet).expect("publish");
            // Hold the socket open until the client has read the publish.
            std::thread::sleep(Duration::from_millis(500));
        });

        let settings = MqttSettings {
            endpoint: MqttEndpoint {
                host: "127.0.0.1".to_string(),
                port,
                use_tls: false,
            },
            tls: TlsMaterials::default(),
            client_id: "chunk-size-test".to_string(),
            username: None,
            password: None,
            max_chunk_bytes: DEFAULT_MAX_CHUNK_BYTES,
        };
        let (_client, mut connection) = connect_mqtt(&settings).expect("connect");

        let mut received = None;
        for event in connection.iter().take(10) {
            match event {
                Ok(Event::Incoming(Incoming::Publish(publish))) => {
                    received = Some(publish);
                    break;
                }
                Ok(_) => {}
                Err(e) => panic!("connection failed: {}", e),
            }
        }
        let publish = received.expect("publish delivered");
        assert_eq!(&publish.topic[..], b"streamer/video");
        let decoded = VideoChunk::decode(&publish.payload).expect("decode chunk");
        assert_eq!(decoded.timestamp_ns, 7);
        assert_eq!(decoded.payload.len(), 20 * 1024);

        broker.join().expect("broker thread");
    }
}
