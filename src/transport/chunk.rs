//! Video chunk framing on the video topic.
//!
//! `[timestamp_ns: u64 big-endian][encoded payload]`

use anyhow::{bail, Result};

pub const HEADER_LEN: usize = 8;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VideoChunk {
    pub timestamp_ns: u64,
    pub payload: Vec<u8>,
}

impl VideoChunk {
    pub fn new(timestamp_ns: u64, payload: Vec<u8>) -> Self {
        Self {
            timestamp_ns,
            payload,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.payload.len());
        out.extend_from_slice(&self.timestamp_ns.to_be_bytes());
        out.extend_from_slice(&self.payload);
        out
    }

    pub fn decode(raw: &[u8]) -> Result<Self> {
        if raw.len() <= HEADER_LEN {
            bail!(
                "video chunk too short: {} bytes (need a {}-byte header and a payload)",
                raw.len(),
                HEADER_LEN
            );
        }
        let (header, payload) = raw.split_at(HEADER_LEN);
        let mut ts = [0u8; HEADER_LEN];
        ts.copy_from_slice(header);
        Ok(Self {
            timestamp_ns: u64::from_be_bytes(ts),
            payload: payload.to_vec(),
        })
    }
}
