//! Failover video streamer
//!
//! Streams encoded video from an intermittent producer to an RTSP or UDP
//! sink without ever stalling the downstream pipeline: when no live frame
//! arrives within the pull timeout, the pipeline switches to a synthetic
//! "camera not detected" pattern and keeps streaming.
//!
//! # Architecture
//!
//! Producer → `FrameQueue` → `DemandController` (pulled on demand) → live
//! branch → input switch → parser → payloader/sink.
//!
//! # Module Structure
//!
//! - `frame`: frames, the bounded frame queue and the producer handle
//! - `graph`: declarative pipeline topology (stages, links, caps)
//! - `backend`: media runtime seam (simulated, GStreamer)
//! - `demand`, `watchdog`: the pull protocol and failover
//! - `lifecycle`: build/start/stop of one pipeline and its execution thread
//! - `node`, `command`, `config`, `transport`: the daemon around it

pub mod address;
pub mod backend;
pub mod codec;
pub mod command;
pub mod config;
pub mod demand;
pub mod frame;
pub mod graph;
pub mod lifecycle;
pub mod node;
pub mod status;
pub mod transport;
pub mod watchdog;

pub use address::StreamAddress;
pub use backend::{
    create_backend, BackendKind, FlowError, MediaBackend, MediaPipeline, PipelineEvent,
    SimProbe, SimulatedBackend,
};
pub use codec::EncoderProfile;
pub use command::{StartRequest, StreamCommand, StreamParameters};
pub use config::StreamerConfig;
pub use demand::{DemandController, PullOutcome, DEFAULT_PULL_TIMEOUT};
pub use frame::{
    Frame, FrameQueue, FrameSender, PopOutcome, PushOutcome, QueueStats, DEFAULT_QUEUE_CAPACITY,
};
pub use graph::{BuildParams, Topology, TopologyMode};
pub use lifecycle::{ControllerSettings, PipelineState, StreamController};
pub use node::{NodeSettings, StreamNode, SupervisorAction};
pub use status::{StatusSnapshot, StreamStatus};
pub use watchdog::{ActiveBranch, FailoverWatchdog};
