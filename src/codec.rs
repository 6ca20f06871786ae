//! Encoder profile selection.
//!
//! An `EncoderProfile` fixes every codec-dependent stage factory and caps
//! string used by the topology builder.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Payload type announced by the RTP payloader.
pub const RTP_PAYLOAD_TYPE: i64 = 96;

/// Bitrate (kbit/s) of the synthetic fallback encoder.
pub const FALLBACK_BITRATE_KBPS: i64 = 500;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EncoderProfile {
    #[default]
    H264,
    H265,
}

impl FromStr for EncoderProfile {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "h264" | "h.264" | "avc" => Ok(Self::H264),
            "h265" | "h.265" | "hevc" => Ok(Self::H265),
            other => Err(anyhow!(
                "unknown encoding '{}': expected 'H264' or 'H265'",
                other
            )),
        }
    }
}

impl std::fmt::Display for EncoderProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::H264 => write!(f, "H264"),
            Self::H265 => write!(f, "H265"),
        }
    }
}

impl EncoderProfile {
    /// Caps media type of the encoded stream.
    pub fn media_type(&self) -> &'static str {
        match self {
            Self::H264 => "video/x-h264",
            Self::H265 => "video/x-h265",
        }
    }

    pub fn encoder_factory(&self) -> &'static str {
        match self {
            Self::H264 => "x264enc",
            Self::H265 => "x265enc",
        }
    }

    pub fn parser_factory(&self) -> &'static str {
        match self {
            Self::H264 => "h264parse",
            Self::H265 => "h265parse",
        }
    }

    pub fn payloader_factory(&self) -> &'static str {
        match self {
            Self::H264 => "rtph264pay",
            Self::H265 => "rtph265pay",
        }
    }

    /// Profile requested from the live producer.
    pub fn live_profile(&self) -> &'static str {
        "main"
    }

    /// Profile of the synthetic branch output. x265 has no baseline profile.
    pub fn fallback_profile(&self) -> Option<&'static str> {
        match self {
            Self::H264 => Some("baseline"),
            Self::H265 => None,
        }
    }
}
