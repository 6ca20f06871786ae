//! stream_cmd - publish a start/stop command to a running streamerd.

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use rumqttc::v5::{Event, Incoming};
use std::path::PathBuf;

use failover_streamer::transport::{
    connect_mqtt, mqtt_publish_qos1, parse_mqtt_endpoint, MqttSettings, TlsMaterials,
    DEFAULT_MAX_CHUNK_BYTES,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Send a command to streamerd")]
struct Args {
    #[arg(long, env = "MQTT_BROKER_ADDR", default_value = "127.0.0.1:1883")]
    mqtt_broker_addr: String,

    #[arg(long, env = "MQTT_USERNAME")]
    mqtt_username: Option<String>,

    #[arg(long, env = "MQTT_PASSWORD")]
    mqtt_password: Option<String>,

    #[arg(long, env = "MQTT_USE_TLS")]
    mqtt_use_tls: bool,

    #[arg(long, env = "MQTT_TLS_CA_PATH")]
    mqtt_tls_ca_path: Option<PathBuf>,

    /// Command topic streamerd subscribes to.
    #[arg(long, env = "STREAMER_COMMAND_TOPIC", default_value = "streamer/command")]
    topic: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start streaming; unset fields keep the daemon's current values.
    Start {
        /// H264 or H265.
        #[arg(long)]
        encoding: Option<String>,
        #[arg(long)]
        width: Option<u32>,
        #[arg(long)]
        height: Option<u32>,
        #[arg(long)]
        fps: Option<u32>,
        /// Bits per second.
        #[arg(long)]
        bitrate: Option<u32>,
        /// udp://host:port or an RTSP location.
        #[arg(long)]
        address: Option<String>,
    },
    Stop,
}

fn command_payload(command: &Command) -> serde_json::Value {
    match command {
        Command::Start {
            encoding,
            width,
            height,
            fps,
            bitrate,
            address,
        } => {
            let mut payload = serde_json::json!({ "Command": "start" });
            let fields = [
                ("Encoding", encoding.clone().map(serde_json::Value::from)),
                ("Width", width.map(serde_json::Value::from)),
                ("Height", height.map(serde_json::Value::from)),
                ("Fps", fps.map(serde_json::Value::from)),
                ("Bitrate", bitrate.map(serde_json::Value::from)),
                ("Address", address.clone().map(serde_json::Value::from)),
            ];
            for (name, value) in fields {
                if let Some(value) = value {
                    payload[name] = value;
                }
            }
            payload
        }
        Command::Stop => serde_json::json!({ "Command": "stop" }),
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let settings = MqttSettings {
        endpoint: parse_mqtt_endpoint(&args.mqtt_broker_addr, args.mqtt_use_tls)?,
        tls: TlsMaterials::load(args.mqtt_tls_ca_path.as_ref(), None, None)?,
        client_id: format!("stream_cmd_{}", std::process::id()),
        username: args.mqtt_username.clone(),
        password: args.mqtt_password.clone(),
        max_chunk_bytes: DEFAULT_MAX_CHUNK_BYTES,
    };
    let payload = serde_json::to_vec(&command_payload(&args.command))?;

    let (client, mut connection) = connect_mqtt(&settings)?;
    mqtt_publish_qos1(&client, &args.topic, &payload, false)?;

    for event in connection.iter() {
        match event {
            Ok(Event::Incoming(Incoming::PubAck(_))) => {
                log::info!("command delivered to {}", args.topic);
                break;
            }
            Ok(_) => {}
            Err(e) => bail!("MQTT connection error: {}", e),
        }
    }
    client.disconnect()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_payload_only_carries_set_fields() {
        let payload = command_payload(&Command::Start {
            encoding: Some("H265".to_string()),
            width: Some(640),
            height: None,
            fps: None,
            bitrate: None,
            address: None,
        });
        assert_eq!(
            payload,
            serde_json::json!({"Command": "start", "Encoding": "H265", "Width": 640})
        );
    }
}
