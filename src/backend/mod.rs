//! Media runtime backends.
//!
//! A `MediaBackend` turns a validated `Topology` into a running
//! `MediaPipeline`. The controller never talks to a media runtime directly:
//! stage instantiation, buffer injection, input switching and bus events all
//! cross this seam.
//!
//! Events raised by the runtime (demand for data, end of stream, warnings,
//! errors) are delivered on the `EventSender` passed to `instantiate`, which
//! the controller's execution thread drains.

use anyhow::{bail, Result};
use serde::Deserialize;
use std::str::FromStr;
use std::sync::mpsc;

use crate::graph::Topology;
use crate::watchdog::ActiveBranch;

#[cfg(feature = "backend-gstreamer")]
pub mod gst;
pub mod simulated;

pub use simulated::{DeliveredBuffer, SimFaults, SimProbe, SimulatedBackend};

/// Event raised by a running pipeline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PipelineEvent {
    /// The live source can accept one more buffer.
    NeedData,
    EndOfStream,
    Warning {
        source: Option<String>,
        message: String,
    },
    Error {
        source: Option<String>,
        message: String,
    },
    /// Wakes the execution thread so it re-checks its quit flag.
    Wake,
}

pub type EventSender = mpsc::Sender<PipelineEvent>;
pub type EventReceiver = mpsc::Receiver<PipelineEvent>;

/// Non-OK outcome of pushing into the live source.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlowError {
    NotLinked,
    Flushing,
    Eos,
    NotNegotiated,
    Error,
}

impl std::fmt::Display for FlowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::NotLinked => "not-linked",
            Self::Flushing => "flushing",
            Self::Eos => "eos",
            Self::NotNegotiated => "not-negotiated",
            Self::Error => "error",
        };
        write!(f, "{}", text)
    }
}

pub type FlowResult = std::result::Result<(), FlowError>;

/// Buffer ready for the live source, stamped with its presentation time.
#[derive(Debug)]
pub struct EncodedBuffer {
    pub pts_ns: u64,
    pub payload: Vec<u8>,
}

/// Factory side of a media runtime.
pub trait MediaBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Returns true when the runtime can create stages of this factory.
    fn has_factory(&self, factory: &str) -> bool;

    /// Create every stage and link of `topology`.
    ///
    /// The event listener is attached here, before the pipeline can play.
    /// On error nothing of the partial graph survives.
    fn instantiate(
        &mut self,
        topology: &Topology,
        events: EventSender,
    ) -> Result<Box<dyn MediaPipeline>>;
}

/// A built pipeline.
///
/// Shared between the controlling thread (play/halt/end-of-stream on stop) and
/// the execution thread (push, input selection), hence `Sync`.
pub trait MediaPipeline: Send + Sync {
    /// Transition the whole graph to playing.
    fn play(&self) -> Result<()>;

    /// Force the graph to its null state.
    fn halt(&self) -> Result<()>;

    fn push_buffer(&self, buffer: EncodedBuffer) -> FlowResult;

    /// Signal end-of-stream on the live source.
    fn end_of_stream(&self) -> FlowResult;

    /// Make `branch` the switch's active input.
    fn select_input(&self, branch: ActiveBranch) -> Result<()>;

    /// Stop raising `NeedData`. Idempotent.
    fn disconnect_demand(&self);
}

/// Check every stage factory before instantiation so a missing plugin fails
/// the build with the stage that needs it.
pub fn check_factories(backend: &dyn MediaBackend, topology: &Topology) -> Result<()> {
    for stage in topology.stages() {
        if !backend.has_factory(&stage.factory) {
            bail!(
                "backend '{}' has no factory '{}' for stage '{}'",
                backend.name(),
                stage.factory,
                stage.name
            );
        }
    }
    Ok(())
}

// ----------------------------------------------------------------------------
// Backend selection
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Simulated,
    Gstreamer,
}

impl Default for BackendKind {
    /// GStreamer when compiled in, so a default deployment actually emits
    /// packets; the simulated backend otherwise.
    fn default() -> Self {
        if cfg!(feature = "backend-gstreamer") {
            Self::Gstreamer
        } else {
            Self::Simulated
        }
    }
}

impl FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "simulated" | "sim" | "stub" => Ok(Self::Simulated),
            "gstreamer" | "gst" => Ok(Self::Gstreamer),
            other => bail!(
                "unknown media backend '{}': expected 'simulated' or 'gstreamer'",
                other
            ),
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Simulated => write!(f, "simulated"),
            Self::Gstreamer => write!(f, "gstreamer"),
        }
    }
}

impl BackendKind {
    /// Returns an error if the backend was not compiled in.
    pub fn validate_feature_support(&self) -> Result<()> {
        if *self == Self::Gstreamer && !cfg!(feature = "backend-gstreamer") {
            bail!(
                "media backend 'gstreamer' requires the 'backend-gstreamer' feature.\n\
                 Recompile with: cargo build --features backend-gstreamer\n\
                 Or set STREAMER_BACKEND=simulated."
            );
        }
        Ok(())
    }
}

/// Create the configured backend.
pub fn create_backend(kind: BackendKind) -> Result<Box<dyn MediaBackend>> {
    kind.validate_feature_support()?;
    match kind {
        BackendKind::Simulated => Ok(Box::new(SimulatedBackend::new())),
        #[cfg(feature = "backend-gstreamer")]
        BackendKind::Gstreamer => Ok(Box::new(gst::GstBackend::new()?)),
        #[cfg(not(feature = "backend-gstreamer"))]
        BackendKind::Gstreamer => bail!("media backend 'gstreamer' is not available"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::EncoderProfile;
    use crate::graph::{BuildParams, TopologyMode};

    #[test]
    fn backend_kind_from_str() {
        assert_eq!("simulated".parse::<BackendKind>().unwrap(), BackendKind::Simulated);
        assert_eq!("GST".parse::<BackendKind>().unwrap(), BackendKind::Gstreamer);
        assert!("ffmpeg".parse::<BackendKind>().is_err());
    }

    #[test]
    fn default_backend_follows_compiled_features() {
        let kind = BackendKind::default();
        assert!(kind.validate_feature_support().is_ok());
        if cfg!(feature = "backend-gstreamer") {
            assert_eq!(kind, BackendKind::Gstreamer);
        } else {
            assert_eq!(kind, BackendKind::Simulated);
        }
    }

    #[test]
    #[cfg(not(feature = "backend-gstreamer"))]
    fn gstreamer_backend_requires_feature() {
        let err = create_backend(BackendKind::Gstreamer).err().expect("error");
        assert!(err.to_string().contains("backend-gstreamer"));
    }

    #[test]
    fn check_factories_names_missing_stage() -> Result<()> {
        let topology = Topology::build(&BuildParams {
            mode: TopologyMode::Live,
            profile: EncoderProfile::H264,
            width: 640,
            height: 480,
            fps: 25,
            bitrate: 1_000_000,
            stream_address: "rtsp://127.0.0.1:8554/cam".to_string(),
            rtsp_tls_validation: false,
        })?;

        let complete = SimulatedBackend::new();
        check_factories(&complete, &topology)?;

        let missing = SimulatedBackend::new().without_factory("rtspclientsink");
        let err = check_factories(&missing, &topology).unwrap_err().to_string();
        assert!(err.contains("rtspclientsink"));
        assert!(err.contains("rtsp_sink"));
        Ok(())
    }
}
