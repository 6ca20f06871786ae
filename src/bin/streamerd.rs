//! streamerd - failover video streaming daemon.
//!
//! This daemon:
//! 1. Loads the streamer config (STREAMER_CONFIG + STREAMER_* overrides)
//! 2. Connects to the MQTT broker and subscribes to the command and video topics
//! 3. Feeds video chunks into the live branch and applies start/stop commands
//! 4. Restarts a stream whose pipeline stopped on its own and publishes status

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::time::{Duration, Instant};

use failover_streamer::transport::{
    parse_mqtt_endpoint, validate_loopback_addr, Inbound, MqttRuntime, MqttSettings,
    TlsMaterials,
};
use failover_streamer::{create_backend, BackendKind, StreamNode, StreamerConfig};

const DAEMON_NAME: &str = "streamerd";
const SUPERVISE_TICK: Duration = Duration::from_millis(250);

#[derive(Parser, Debug)]
#[command(author, version, about = "Failover video streaming daemon")]
struct Args {
    /// MQTT broker address.
    /// By default, only loopback addresses are allowed.
    #[arg(long, env = "MQTT_BROKER_ADDR", default_value = "127.0.0.1:1883")]
    mqtt_broker_addr: String,

    /// Allow non-loopback MQTT connections.
    #[arg(long, env = "ALLOW_REMOTE_MQTT")]
    allow_remote_mqtt: bool,

    /// MQTT username for authentication.
    #[arg(long, env = "MQTT_USERNAME")]
    mqtt_username: Option<String>,

    /// MQTT password for authentication.
    #[arg(long, env = "MQTT_PASSWORD")]
    mqtt_password: Option<String>,

    /// Enable TLS for MQTT (required for mqtts:// brokers).
    #[arg(long, env = "MQTT_USE_TLS")]
    mqtt_use_tls: bool,

    /// Path to a PEM-encoded CA certificate to trust for MQTT TLS.
    #[arg(long, env = "MQTT_TLS_CA_PATH")]
    mqtt_tls_ca_path: Option<PathBuf>,

    /// Path to a PEM-encoded client certificate for MQTT TLS.
    #[arg(long, env = "MQTT_TLS_CLIENT_CERT_PATH")]
    mqtt_tls_client_cert_path: Option<PathBuf>,

    /// Path to a PEM-encoded client private key for MQTT TLS.
    #[arg(long, env = "MQTT_TLS_CLIENT_KEY_PATH")]
    mqtt_tls_client_key_path: Option<PathBuf>,

    /// MQTT client identifier.
    #[arg(long, env = "MQTT_CLIENT_ID", default_value = DAEMON_NAME)]
    mqtt_client_id: String,

    /// Start streaming with the configured parameters without waiting for a
    /// start command.
    #[arg(long, env = "STREAMER_AUTOSTART")]
    autostart: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = StreamerConfig::load()?;
    let endpoint = parse_mqtt_endpoint(&args.mqtt_broker_addr, args.mqtt_use_tls)?;
    if !args.allow_remote_mqtt {
        validate_loopback_addr(&endpoint, &args.mqtt_broker_addr)?;
    } else {
        log::warn!("Remote MQTT enabled - ensure broker is in a trusted network");
    }
    let tls = TlsMaterials::load(
        args.mqtt_tls_ca_path.as_ref(),
        args.mqtt_tls_client_cert_path.as_ref(),
        args.mqtt_tls_client_key_path.as_ref(),
    )?;

    log::info!("{} starting", DAEMON_NAME);
    log::info!(
        "  MQTT broker: {}:{} (TLS: {})",
        endpoint.host,
        endpoint.port,
        endpoint.use_tls
    );
    log::info!(
        "  Topics: command={} video={} status={}",
        config.topics.command,
        config.topics.video,
        config.topics.status
    );
    log::info!("  Backend: {}", config.backend);
    if config.backend == BackendKind::Simulated {
        log::warn!(
            "simulated media backend selected: no packets will reach {}",
            config.stream.address
        );
    }
    log::info!(
        "  Stream: {} {}x{}@{} -> {} (live input: {})",
        config.stream.profile,
        config.stream.width,
        config.stream.height,
        config.stream.fps,
        config.stream.address,
        config.live_input
    );

    let backend = create_backend(config.backend)?;
    let mut node = StreamNode::new(backend, config.node_settings());

    let shutdown = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&shutdown);
    ctrlc::set_handler(move || {
        handler_flag.store(true, Ordering::SeqCst);
    })
    .context("error setting Ctrl-C handler")?;

    let settings = MqttSettings {
        endpoint,
        tls,
        client_id: args.mqtt_client_id.clone(),
        username: args.mqtt_username.clone(),
        password: args.mqtt_password.clone(),
        max_chunk_bytes: config.max_chunk_bytes,
    };
    let (mqtt, inbound) = MqttRuntime::start(&settings, config.topics.clone())?;

    if args.autostart {
        if let Err(e) = node.start() {
            log::error!("autostart failed: {:#}", e);
        }
    }

    let mut last_status = Instant::now();
    while !shutdown.load(Ordering::SeqCst) {
        match inbound.recv_timeout(SUPERVISE_TICK) {
            Ok(Inbound::Command(payload)) => {
                if let Err(e) = node.handle_command(&payload) {
                    log::error!("rejected command: {:#}", e);
                }
            }
            Ok(Inbound::Video(chunk)) => {
                if let Err(e) = node.handle_video_chunk(&chunk) {
                    log::warn!("dropping video chunk: {:#}", e);
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                log::error!("MQTT connection thread exited");
                break;
            }
        }

        if let Err(e) = node.supervise() {
            log::warn!("supervision: {:#}", e);
        }
        if last_status.elapsed() >= config.status_interval {
            last_status = Instant::now();
            if let Err(e) = mqtt.publish_status(&node.status()) {
                log::warn!("failed to publish status: {}", e);
            }
        }
    }

    log::info!("shutdown requested, stopping stream...");
    node.shutdown();
    if let Err(e) = mqtt.publish_status(&node.status()) {
        log::warn!("failed to publish final status: {}", e);
    }
    mqtt.disconnect()?;
    Ok(())
}
