use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::backend::BackendKind;
use crate::codec::EncoderProfile;
use crate::command::StreamParameters;
use crate::demand::DEFAULT_PULL_TIMEOUT;
use crate::frame::DEFAULT_QUEUE_CAPACITY;
use crate::lifecycle::ControllerSettings;
use crate::node::NodeSettings;
use crate::transport::chunk::HEADER_LEN;
use crate::transport::mqtt::DEFAULT_MAX_CHUNK_BYTES;

const DEFAULT_STREAM_ADDRESS: &str = "udp://127.0.0.1:5600";
const DEFAULT_COMMAND_TOPIC: &str = "streamer/command";
const DEFAULT_VIDEO_TOPIC: &str = "streamer/video";
const DEFAULT_STATUS_TOPIC: &str = "streamer/status";
const DEFAULT_STATUS_INTERVAL_MS: u64 = 1000;

#[derive(Debug, Deserialize, Default)]
struct StreamerConfigFile {
    stream: Option<StreamConfigFile>,
    pipeline: Option<PipelineConfigFile>,
    topics: Option<TopicsConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct StreamConfigFile {
    address: Option<String>,
    encoding: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    fps: Option<u32>,
    bitrate: Option<u32>,
    live_input: Option<bool>,
    rtsp_tls_validation: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct PipelineConfigFile {
    backend: Option<String>,
    pull_timeout_ms: Option<u64>,
    queue_capacity: Option<usize>,
    status_interval_ms: Option<u64>,
    max_chunk_bytes: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct TopicsConfigFile {
    command: Option<String>,
    video: Option<String>,
    status: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StreamerConfig {
    pub stream: StreamParameters,
    pub live_input: bool,
    pub rtsp_tls_validation: bool,
    pub backend: BackendKind,
    pub pull_timeout: Duration,
    pub queue_capacity: usize,
    pub status_interval: Duration,
    /// Upper bound for one video chunk read from the video topic.
    pub max_chunk_bytes: u32,
    pub topics: TopicSettings,
}

#[derive(Debug, Clone)]
pub struct TopicSettings {
    pub command: String,
    pub video: String,
    pub status: String,
}

impl StreamerConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("STREAMER_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: StreamerConfigFile) -> Result<Self> {
        let stream_file = file.stream.unwrap_or_default();
        let pipeline = file.pipeline.unwrap_or_default();
        let topics = file.topics.unwrap_or_default();

        let defaults = StreamParameters::default();
        let profile = match stream_file.encoding.as_deref() {
            Some(encoding) => encoding.parse::<EncoderProfile>()?,
            None => defaults.profile,
        };
        let stream = StreamParameters {
            profile,
            width: stream_file.width.unwrap_or(defaults.width),
            height: stream_file.height.unwrap_or(defaults.height),
            fps: stream_file.fps.unwrap_or(defaults.fps),
            bitrate: stream_file.bitrate.unwrap_or(defaults.bitrate),
            address: stream_file
                .address
                .unwrap_or_else(|| DEFAULT_STREAM_ADDRESS.to_string()),
        };
        let backend = match pipeline.backend.as_deref() {
            Some(name) => name.parse::<BackendKind>()?,
            None => BackendKind::default(),
        };

        Ok(Self {
            stream,
            live_input: stream_file.live_input.unwrap_or(true),
            rtsp_tls_validation: stream_file.rtsp_tls_validation.unwrap_or(false),
            backend,
            pull_timeout: pipeline
                .pull_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_PULL_TIMEOUT),
            queue_capacity: pipeline.queue_capacity.unwrap_or(DEFAULT_QUEUE_CAPACITY),
            status_interval: Duration::from_millis(
                pipeline
                    .status_interval_ms
                    .unwrap_or(DEFAULT_STATUS_INTERVAL_MS),
            ),
            max_chunk_bytes: pipeline.max_chunk_bytes.unwrap_or(DEFAULT_MAX_CHUNK_BYTES),
            topics: TopicSettings {
                command: topics
                    .command
                    .unwrap_or_else(|| DEFAULT_COMMAND_TOPIC.to_string()),
                video: topics
                    .video
                    .unwrap_or_else(|| DEFAULT_VIDEO_TOPIC.to_string()),
                status: topics
                    .status
                    .unwrap_or_else(|| DEFAULT_STATUS_TOPIC.to_string()),
            },
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(address) = env_nonempty("STREAMER_STREAM_ADDRESS") {
            self.stream.address = address;
        }
        if let Some(encoding) = env_nonempty("STREAMER_ENCODING") {
            self.stream.profile = encoding.parse()?;
        }
        if let Some(width) = env_parsed::<u32>("STREAMER_WIDTH")? {
            self.stream.width = width;
        }
        if let Some(height) = env_parsed::<u32>("STREAMER_HEIGHT")? {
            self.stream.height = height;
        }
        if let Some(fps) = env_parsed::<u32>("STREAMER_FPS")? {
            self.stream.fps = fps;
        }
        if let Some(bitrate) = env_parsed::<u32>("STREAMER_BITRATE")? {
            self.stream.bitrate = bitrate;
        }
        if let Some(backend) = env_nonempty("STREAMER_BACKEND") {
            self.backend = backend.parse()?;
        }
        if let Some(ms) = env_parsed::<u64>("STREAMER_PULL_TIMEOUT_MS")? {
            self.pull_timeout = Duration::from_millis(ms);
        }
        if let Some(capacity) = env_parsed::<usize>("STREAMER_QUEUE_CAPACITY")? {
            self.queue_capacity = capacity;
        }
        if let Some(bytes) = env_parsed::<u32>("STREAMER_MAX_CHUNK_BYTES")? {
            self.max_chunk_bytes = bytes;
        }
        if let Some(live) = env_nonempty("STREAMER_LIVE_INPUT") {
            self.live_input = parse_bool("STREAMER_LIVE_INPUT", &live)?;
        }
        if let Some(validate) = env_nonempty("STREAMER_RTSP_TLS_VALIDATION") {
            self.rtsp_tls_validation = parse_bool("STREAMER_RTSP_TLS_VALIDATION", &validate)?;
        }
        if let Some(topic) = env_nonempty("STREAMER_COMMAND_TOPIC") {
            self.topics.command = topic;
        }
        if let Some(topic) = env_nonempty("STREAMER_VIDEO_TOPIC") {
            self.topics.video = topic;
        }
        if let Some(topic) = env_nonempty("STREAMER_STATUS_TOPIC") {
            self.topics.status = topic;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        self.stream.validate()?;
        crate::address::StreamAddress::parse(&self.stream.address)?;
        self.backend.validate_feature_support()?;
        if self.pull_timeout.is_zero() {
            return Err(anyhow!("pull timeout must be greater than zero"));
        }
        if self.queue_capacity == 0 {
            return Err(anyhow!("queue capacity must be greater than zero"));
        }
        if self.status_interval.is_zero() {
            return Err(anyhow!("status interval must be greater than zero"));
        }
        if (self.max_chunk_bytes as usize) <= HEADER_LEN {
            return Err(anyhow!(
                "max chunk size must exceed the {}-byte chunk header",
                HEADER_LEN
            ));
        }
        for (name, topic) in [
            ("command", &self.topics.command),
            ("video", &self.topics.video),
            ("status", &self.topics.status),
        ] {
            if topic.trim().is_empty() || topic.contains(['+', '#']) {
                return Err(anyhow!("invalid {} topic '{}'", name, topic));
            }
        }
        Ok(())
    }

    pub fn node_settings(&self) -> NodeSettings {
        NodeSettings {
            params: self.stream.clone(),
            live_input: self.live_input,
            rtsp_tls_validation: self.rtsp_tls_validation,
            controller: ControllerSettings {
                pull_timeout: self.pull_timeout,
                queue_capacity: self.queue_capacity,
            },
        }
    }
}

fn read_config_file(path: &Path) -> Result<StreamerConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn env_nonempty(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn env_parsed<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match env_nonempty(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| anyhow!("{} must be a non-negative integer", name)),
        None => Ok(None),
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(anyhow!("{} must be a boolean", name)),
    }
}
