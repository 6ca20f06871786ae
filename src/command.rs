//! Control commands.
//!
//! Commands arrive as JSON objects, e.g.
//! `{"Command": "start", "Encoding": "H265", "Width": 640, "Height": 480}`.
//! Field names are matched exactly; the command verb and the encoding are
//! case-insensitive. Numeric fields that are not integers are ignored rather
//! than rejected.

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::codec::EncoderProfile;

pub const DEFAULT_WIDTH: u32 = 1280;
pub const DEFAULT_HEIGHT: u32 = 720;
pub const DEFAULT_FPS: u32 = 25;
pub const DEFAULT_BITRATE: u32 = 3_000_000;

pub const MAX_DIMENSION: u32 = 4096;
pub const MAX_FPS: u32 = 120;
pub const MAX_BITRATE: u32 = 100_000_000;

/// Encoder and sink settings for one stream.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamParameters {
    pub profile: EncoderProfile,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub bitrate: u32,
    pub address: String,
}

impl Default for StreamParameters {
    fn default() -> Self {
        Self {
            profile: EncoderProfile::H264,
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            fps: DEFAULT_FPS,
            bitrate: DEFAULT_BITRATE,
            address: String::new(),
        }
    }
}

impl StreamParameters {
    /// Copy of `self` with every field `overrides` carries replaced.
    pub fn merged(&self, overrides: &StartRequest) -> Self {
        Self {
            profile: overrides.profile.unwrap_or(self.profile),
            width: overrides.width.unwrap_or(self.width),
            height: overrides.height.unwrap_or(self.height),
            fps: overrides.fps.unwrap_or(self.fps),
            bitrate: overrides.bitrate.unwrap_or(self.bitrate),
            address: overrides
                .address
                .clone()
                .unwrap_or_else(|| self.address.clone()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [("width", self.width), ("height", self.height)] {
            if value == 0 || value > MAX_DIMENSION {
                bail!("{} must be in 1..={} (got {})", name, MAX_DIMENSION, value);
            }
            if value % 2 != 0 {
                bail!("{} must be even (got {})", name, value);
            }
        }
        if self.fps == 0 || self.fps > MAX_FPS {
            bail!("fps must be in 1..={} (got {})", MAX_FPS, self.fps);
        }
        if self.bitrate == 0 || self.bitrate > MAX_BITRATE {
            bail!(
                "bitrate must be in 1..={} bit/s (got {})",
                MAX_BITRATE,
                self.bitrate
            );
        }
        if self.address.trim().is_empty() {
            bail!("stream address is empty");
        }
        Ok(())
    }
}

/// Optional overrides carried by a start command.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StartRequest {
    pub profile: Option<EncoderProfile>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fps: Option<u32>,
    pub bitrate: Option<u32>,
    pub address: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamCommand {
    Start(StartRequest),
    Stop,
}

impl StreamCommand {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let value: Value =
            serde_json::from_slice(payload).context("command is not valid JSON")?;
        let object = value
            .as_object()
            .ok_or_else(|| anyhow!("command must be a JSON object"))?;

        let verb = object
            .get("Command")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("command has no \"Command\" field"))?;
        match verb.trim().to_lowercase().as_str() {
            "start" => Ok(Self::Start(StartRequest::from_object(object)?)),
            "stop" => Ok(Self::Stop),
            other => bail!("unknown command '{}'", other),
        }
    }
}

impl StartRequest {
    fn from_object(object: &serde_json::Map<String, Value>) -> Result<Self> {
        let profile = match object.get("Encoding").and_then(Value::as_str) {
            Some(encoding) => Some(encoding.parse::<EncoderProfile>()?),
            None => None,
        };
        let address = object
            .get("Address")
            .or_else(|| object.get("StreamAddress"))
            .and_then(Value::as_str)
            .map(str::to_string);

        Ok(Self {
            profile,
            width: integer_field(object, "Width"),
            height: integer_field(object, "Height"),
            fps: integer_field(object, "Fps"),
            bitrate: integer_field(object, "Bitrate"),
            address,
        })
    }
}

fn integer_field(object: &serde_json::Map<String, Value>, name: &str) -> Option<u32> {
    let value = object.get(name)?;
    match value.as_u64().and_then(|v| u32::try_from(v).ok()) {
        Some(v) => Some(v),
        None => {
            log::warn!("ignoring non-integer \"{}\" value {}", name, value);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start(payload: &str) -> StartRequest {
        match StreamCommand::parse(payload.as_bytes()).unwrap() {
            StreamCommand::Start(request) => request,
            other => panic!("expected start, got {:?}", other),
        }
    }

    #[test]
    fn parses_start_with_overrides() {
        let request = start(
            r#"{"Command":"Start","Encoding":"h265","Width":640,"Height":480,"Fps":30,"Bitrate":2000000,"Address":"udp://10.0.0.2:5600"}"#,
        );
        assert_eq!(request.profile, Some(EncoderProfile::H265));
        assert_eq!(request.width, Some(640));
        assert_eq!(request.height, Some(480));
        assert_eq!(request.fps, Some(30));
        assert_eq!(request.bitrate, Some(2_000_000));
        assert_eq!(request.address.as_deref(), Some("udp://10.0.0.2:5600"));
    }

    #[test]
    fn verb_is_case_insensitive() {
        assert_eq!(
            StreamCommand::parse(br#"{"Command":"STOP"}"#).unwrap(),
            StreamCommand::Stop
        );
        assert_eq!(start(r#"{"Command":"sTaRt"}"#), StartRequest::default());
    }

    #[test]
    fn non_integer_numbers_are_ignored() {
        let request = start(r#"{"Command":"start","Width":"640","Height":480.5,"Fps":-1}"#);
        assert_eq!(request.width, None);
        assert_eq!(request.height, None);
        assert_eq!(request.fps, None);
    }

    #[test]
    fn legacy_address_field_is_accepted() {
        let request = start(r#"{"Command":"start","StreamAddress":"rtsp://cam/live"}"#);
        assert_eq!(request.address.as_deref(), Some("rtsp://cam/live"));
    }

    #[test]
    fn rejects_malformed_and_unknown() {
        assert!(StreamCommand::parse(b"{not json").is_err());
        assert!(StreamCommand::parse(b"[1,2]").is_err());
        assert!(StreamCommand::parse(br#"{"Command":"pause"}"#).is_err());
        assert!(StreamCommand::parse(br#"{"Width":640}"#).is_err());
        assert!(StreamCommand::parse(br#"{"Command":"start","Encoding":"vp9"}"#).is_err());
    }

    #[test]
    fn merge_keeps_unset_fields() {
        let base = StreamParameters {
            address: "udp://127.0.0.1:5600".to_string(),
            ..StreamParameters::default()
        };
        let merged = base.merged(&StartRequest {
            width: Some(640),
            height: Some(480),
            ..StartRequest::default()
        });
        assert_eq!(merged.width, 640);
        assert_eq!(merged.height, 480);
        assert_eq!(merged.fps, DEFAULT_FPS);
        assert_eq!(merged.address, base.address);
    }

    #[test]
    fn validate_enforces_ranges() {
        let ok = StreamParameters {
            address: "udp://127.0.0.1:5600".to_string(),
            ..StreamParameters::default()
        };
        assert!(ok.validate().is_ok());

        let odd = StreamParameters { width: 641, ..ok.clone() };
        assert!(odd.validate().is_err());
        let huge = StreamParameters { height: 8192, ..ok.clone() };
        assert!(huge.validate().is_err());
        let fast = StreamParameters { fps: 240, ..ok.clone() };
        assert!(fast.validate().is_err());
        let no_rate = StreamParameters { bitrate: 0, ..ok.clone() };
        assert!(no_rate.validate().is_err());
        let no_addr = StreamParameters { address: " ".to_string(), ..ok };
        assert!(no_addr.validate().is_err());
    }
}
