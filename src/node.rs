//! Stream node: commands, frame ingestion and supervision around one
//! `StreamController`.

use anyhow::{Context, Result};

use crate::backend::MediaBackend;
use crate::command::{StreamCommand, StreamParameters};
use crate::frame::FrameSender;
use crate::graph::{BuildParams, TopologyMode};
use crate::lifecycle::{ControllerSettings, StreamController};
use crate::status::StatusSnapshot;
use crate::transport::chunk::VideoChunk;

#[derive(Clone, Debug)]
pub struct NodeSettings {
    pub params: StreamParameters,
    /// A frame producer is attached; selects the live topology.
    pub live_input: bool,
    pub rtsp_tls_validation: bool,
    pub controller: ControllerSettings,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SupervisorAction {
    Idle,
    Restarted,
}

pub struct StreamNode {
    controller: StreamController,
    params: StreamParameters,
    live_input: bool,
    rtsp_tls_validation: bool,
    started: bool,
    stop_requested: bool,
}

impl StreamNode {
    pub fn new(backend: Box<dyn MediaBackend>, settings: NodeSettings) -> Self {
        Self {
            controller: StreamController::new(backend, settings.controller),
            params: settings.params,
            live_input: settings.live_input,
            rtsp_tls_validation: settings.rtsp_tls_validation,
            started: false,
            stop_requested: false,
        }
    }

    /// Parse and apply one JSON command. On error nothing changes.
    pub fn handle_command(&mut self, payload: &[u8]) -> Result<()> {
        match StreamCommand::parse(payload)? {
            StreamCommand::Start(request) => {
                let params = self.params.merged(&request);
                params.validate().context("invalid stream parameters")?;
                self.start_with(params)
            }
            StreamCommand::Stop => {
                self.stop_requested = true;
                self.started = false;
                self.controller.stop_stream();
                Ok(())
            }
        }
    }

    /// Start streaming with the stored parameters.
    pub fn start(&mut self) -> Result<()> {
        let params = self.params.clone();
        params.validate().context("invalid stream parameters")?;
        self.start_with(params)
    }

    fn start_with(&mut self, params: StreamParameters) -> Result<()> {
        self.controller.build_pipeline(&self.build_params(&params))?;
        self.controller.start_pipeline()?;
        log::info!(
            "stream started: {} {}x{}@{} {} bit/s -> {}",
            params.profile,
            params.width,
            params.height,
            params.fps,
            params.bitrate,
            params.address
        );
        self.params = params;
        self.started = true;
        self.stop_requested = false;
        Ok(())
    }

    /// Decode a framed chunk and queue its frame for the live branch.
    pub fn handle_video_chunk(&self, chunk: &[u8]) -> Result<()> {
        let chunk = VideoChunk::decode(chunk)?;
        self.controller
            .submit_frame(chunk.timestamp_ns, chunk.payload);
        Ok(())
    }

    /// Restart a stream whose execution loop ended without a stop request.
    pub fn supervise(&mut self) -> Result<SupervisorAction> {
        if !self.started || self.stop_requested || !self.controller.loop_exited() {
            return Ok(SupervisorAction::Idle);
        }
        log::warn!(
            "stream loop exited (error detected: {}), restarting",
            self.controller.is_error_detected()
        );
        self.controller.stop_stream();
        let params = self.params.clone();
        if let Err(e) = self.start_with(params) {
            // Retried on the next supervision tick.
            log::error!("stream restart failed: {:#}", e);
            return Err(e);
        }
        Ok(SupervisorAction::Restarted)
    }

    pub fn status(&self) -> StatusSnapshot {
        self.controller.status()
    }

    pub fn params(&self) -> &StreamParameters {
        &self.params
    }

    pub fn frame_sender(&self) -> FrameSender {
        self.controller.frame_sender()
    }

    pub fn controller(&self) -> &StreamController {
        &self.controller
    }

    pub fn shutdown(&mut self) {
        self.stop_requested = true;
        self.started = false;
        self.controller.stop_stream();
    }

    fn build_params(&self, params: &StreamParameters) -> BuildParams {
        let mode = if self.live_input {
            TopologyMode::Live
        } else {
            TopologyMode::Default
        };
        BuildParams {
            mode,
            profile: params.profile,
            width: params.width,
            height: params.height,
            fps: params.fps,
            bitrate: params.bitrate,
            stream_address: params.address.clone(),
            rtsp_tls_validation: self.rtsp_tls_validation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SimulatedBackend;
    use crate::codec::EncoderProfile;
    use crate::lifecycle::PipelineState;

    fn node() -> StreamNode {
        StreamNode::new(
            Box::new(SimulatedBackend::new()),
            NodeSettings {
                params: StreamParameters {
                    address: "udp://127.0.0.1:5600".to_string(),
                    ..StreamParameters::default()
                },
                live_input: true,
                rtsp_tls_validation: false,
                controller: ControllerSettings::default(),
            },
        )
    }

    #[test]
    fn invalid_command_changes_nothing() {
        let mut node = node();
        assert!(node.handle_command(b"garbage").is_err());
        assert!(node
            .handle_command(br#"{"Command":"start","Width":641}"#)
            .is_err());
        assert_eq!(node.status().state, PipelineState::Unbuilt);
        assert_eq!(node.params().width, 1280);
    }

    #[test]
    fn start_then_stop_updates_params_and_state() -> Result<()> {
        let mut node = node();
        node.handle_command(br#"{"Command":"start","Encoding":"H265","Width":640,"Height":480}"#)?;
        assert_eq!(node.params().profile, EncoderProfile::H265);
        assert_eq!(node.params().width, 640);

        node.handle_command(br#"{"Command":"stop"}"#)?;
        assert_eq!(node.status().state, PipelineState::Stopped);
        assert!(!node.status().playing);
        assert_eq!(node.supervise()?, SupervisorAction::Idle);
        Ok(())
    }

    #[test]
    fn start_while_playing_is_rejected() -> Result<()> {
        let mut node = node();
        node.handle_command(br#"{"Command":"start"}"#)?;
        assert!(node.handle_command(br#"{"Command":"start","Fps":30}"#).is_err());
        assert_eq!(node.params().fps, 25);
        node.shutdown();
        Ok(())
    }

    #[test]
    fn malformed_chunk_is_rejected() {
        let node = node();
        assert!(node.handle_video_chunk(&[0, 1, 2]).is_err());
    }
}
