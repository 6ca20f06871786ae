//! Pipeline lifecycle: build, start, stop, teardown.
//!
//! `StreamController` owns the media backend, the frame queue and at most one
//! built pipeline. `start_pipeline` spawns exactly one execution thread which
//! plays the graph and drains pipeline events:
//! - `NeedData` runs one pull through the `DemandController`
//! - `EndOfStream` ends the loop
//! - `Warning` is logged and ignored
//! - `Error` sets the error flag and ends the loop
//!
//! Nothing restarts a stopped loop; that is the owning node's decision.

use anyhow::{anyhow, bail, Context, Result};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::backend::{self, EventReceiver, EventSender, MediaBackend, MediaPipeline, PipelineEvent};
use crate::demand::{DemandController, PullOutcome, DEFAULT_PULL_TIMEOUT};
use crate::frame::{FrameQueue, FrameSender, QueueStats, DEFAULT_QUEUE_CAPACITY};
use crate::graph::{BuildParams, Topology, TopologyMode};
use crate::status::{StatusSnapshot, StreamStatus};
use crate::watchdog::FailoverWatchdog;

/// How long the execution thread waits for an event before re-checking quit.
const LOOP_TICK: Duration = Duration::from_millis(100);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Unbuilt,
    Built,
    Playing,
    Stopping,
    Stopped,
}

#[derive(Clone, Debug)]
pub struct ControllerSettings {
    pub pull_timeout: Duration,
    pub queue_capacity: usize,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            pull_timeout: DEFAULT_PULL_TIMEOUT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// Pipeline built but not yet handed to an execution thread.
struct BuiltPipeline {
    topology: Topology,
    pipeline: Arc<dyn MediaPipeline>,
    events_tx: EventSender,
    events_rx: Option<EventReceiver>,
}

pub struct StreamController {
    backend: Box<dyn MediaBackend>,
    settings: ControllerSettings,
    queue: Arc<FrameQueue>,
    status: Arc<StreamStatus>,
    state: Arc<Mutex<PipelineState>>,
    built: Option<BuiltPipeline>,
    quit: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl StreamController {
    pub fn new(backend: Box<dyn MediaBackend>, settings: ControllerSettings) -> Self {
        let queue = Arc::new(FrameQueue::new(settings.queue_capacity));
        Self {
            backend,
            settings,
            queue,
            status: Arc::new(StreamStatus::new()),
            state: Arc::new(Mutex::new(PipelineState::Unbuilt)),
            built: None,
            quit: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    // ------------------------------------------------------------------
    // Build
    // ------------------------------------------------------------------

    /// Build the graph for `params`.
    ///
    /// Fails while a pipeline is playing. A built-but-unstarted pipeline is
    /// torn down first. On failure no partial graph is kept.
    pub fn build_pipeline(&mut self, params: &BuildParams) -> Result<()> {
        if self.worker.is_some() || self.state() == PipelineState::Playing {
            bail!("stream pipeline is already playing; stop it before rebuilding");
        }
        if self.built.take().is_some() {
            log::info!("discarding previously built pipeline");
        }

        let topology = Topology::build(params).context("invalid stream topology")?;
        backend::check_factories(self.backend.as_ref(), &topology)?;
        if topology.mode() == TopologyMode::Default {
            log::warn!("building default topology: only the synthetic pattern will be streamed");
        }
        if !params.rtsp_tls_validation && !topology.address().is_udp() {
            log::warn!("RTSP sink TLS certificate validation is disabled");
        }

        let (events_tx, events_rx) = mpsc::channel();
        let pipeline: Arc<dyn MediaPipeline> = Arc::from(
            self.backend
                .instantiate(&topology, events_tx.clone())
                .with_context(|| format!("instantiate pipeline on '{}' backend", self.backend.name()))?,
        );

        self.queue.reset();
        self.quit.store(false, Ordering::SeqCst);
        self.status.reset(topology.mode() == TopologyMode::Default);
        log::info!(
            "built {} pipeline ({} {}x{}@{} -> {}): {}",
            topology.mode(),
            params.profile,
            params.width,
            params.height,
            params.fps,
            topology.address(),
            topology.describe()
        );
        self.built = Some(BuiltPipeline {
            topology,
            pipeline,
            events_tx,
            events_rx: Some(events_rx),
        });
        self.set_state(PipelineState::Built);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Start
    // ------------------------------------------------------------------

    /// Spawn the execution thread for the built pipeline.
    pub fn start_pipeline(&mut self) -> Result<()> {
        if self.worker.is_some() {
            bail!("stream pipeline is already running");
        }
        let built = self
            .built
            .as_mut()
            .ok_or_else(|| anyhow!("no stream pipeline built"))?;
        let events = built
            .events_rx
            .take()
            .ok_or_else(|| anyhow!("stream pipeline was already started"))?;

        let watchdog = FailoverWatchdog::new(built.topology.mode(), Arc::clone(&self.status));
        let demand = DemandController::new(
            built.topology.mode(),
            Arc::clone(&self.queue),
            watchdog,
            self.settings.pull_timeout,
        );
        let ctx = LoopContext {
            pipeline: Arc::clone(&built.pipeline),
            events,
            demand,
            status: Arc::clone(&self.status),
            state: Arc::clone(&self.state),
            quit: Arc::clone(&self.quit),
        };

        let handle = std::thread::Builder::new()
            .name("stream-loop".to_string())
            .spawn(move || run_loop(ctx))
            .context("spawn stream execution thread")?;
        self.worker = Some(handle);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Stop
    // ------------------------------------------------------------------

    /// Stop and tear down the pipeline. Idempotent and safe before start.
    pub fn stop_stream(&mut self) {
        let Some(built) = self.built.take() else {
            if let Some(handle) = self.worker.take() {
                join_worker(handle);
            }
            self.status.set_playing(false);
            if self.state() != PipelineState::Unbuilt {
                self.set_state(PipelineState::Stopped);
            }
            return;
        };
        self.set_state(PipelineState::Stopping);

        built.pipeline.disconnect_demand();
        let started = self.worker.is_some();
        if started && built.topology.live_source().is_some() {
            match built.pipeline.end_of_stream() {
                Ok(()) => log::debug!("end-of-stream accepted by live source"),
                Err(err) => log::warn!("live source did not accept end-of-stream: {}", err),
            }
        }
        if let Err(e) = built.pipeline.halt() {
            log::error!("failed to stop stream pipeline: {:#}", e);
        }

        self.quit.store(true, Ordering::SeqCst);
        self.queue.close();
        let _ = built.events_tx.send(PipelineEvent::Wake);
        if let Some(handle) = self.worker.take() {
            join_worker(handle);
        }

        drop(built);
        self.status.set_playing(false);
        self.set_state(PipelineState::Stopped);
        log::info!("stream stopped");
    }

    // ------------------------------------------------------------------
    // Ingestion and status
    // ------------------------------------------------------------------

    /// Hand one encoded frame to the live branch. Never blocks.
    pub fn submit_frame(&self, timestamp_ns: u64, payload: Vec<u8>) {
        self.frame_sender().submit_frame(timestamp_ns, payload);
    }

    /// Producer handle usable from other threads.
    pub fn frame_sender(&self) -> FrameSender {
        FrameSender::new(Arc::clone(&self.queue))
    }

    pub fn is_stream_playing(&self) -> bool {
        self.status.is_playing()
    }

    pub fn is_stream_default(&self) -> bool {
        self.status.is_default()
    }

    pub fn is_error_detected(&self) -> bool {
        self.status.is_error_detected()
    }

    pub fn state(&self) -> PipelineState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// True when an execution thread was started and has since exited on its own.
    pub fn loop_exited(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|handle| handle.is_finished())
    }

    pub fn status(&self) -> StatusSnapshot {
        StatusSnapshot::capture(&self.status, self.state())
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }

    fn set_state(&self, state: PipelineState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }
}

impl Drop for StreamController {
    fn drop(&mut self) {
        self.stop_stream();
    }
}

fn join_worker(handle: JoinHandle<()>) {
    if handle.join().is_err() {
        log::error!("stream execution thread panicked");
    }
}

// ----------------------------------------------------------------------------
// Execution thread
// ----------------------------------------------------------------------------

struct LoopContext {
    pipeline: Arc<dyn MediaPipeline>,
    events: EventReceiver,
    demand: DemandController,
    status: Arc<StreamStatus>,
    state: Arc<Mutex<PipelineState>>,
    quit: Arc<AtomicBool>,
}

fn run_loop(mut ctx: LoopContext) {
    if let Err(e) = ctx.pipeline.play() {
        log::error!("failed to start stream pipeline: {:#}", e);
        ctx.status.set_error_detected(true);
        mark_loop_stopped(&ctx.state);
        return;
    }
    ctx.status.set_playing(true);
    {
        let mut state = ctx.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state == PipelineState::Built {
            *state = PipelineState::Playing;
        }
    }
    log::info!("stream pipeline playing");

    while !ctx.quit.load(Ordering::SeqCst) {
        let event = match ctx.events.recv_timeout(LOOP_TICK) {
            Ok(event) => event,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        match event {
            PipelineEvent::NeedData => match ctx.demand.on_need_data(ctx.pipeline.as_ref()) {
                PullOutcome::Fatal(err) => {
                    log::error!("stopping stream loop after flow error: {}", err);
                    ctx.status.set_error_detected(true);
                    break;
                }
                PullOutcome::Closed => break,
                PullOutcome::Delivered { .. } | PullOutcome::FailedOver | PullOutcome::Idle => {}
            },
            PipelineEvent::EndOfStream => {
                log::info!("end of stream reached");
                break;
            }
            PipelineEvent::Warning { source, message } => {
                log::warn!(
                    "warning from {}: {}",
                    source.as_deref().unwrap_or("pipeline"),
                    message
                );
            }
            PipelineEvent::Error { source, message } => {
                log::error!(
                    "error from {}: {}",
                    source.as_deref().unwrap_or("pipeline"),
                    message
                );
                ctx.status.set_error_detected(true);
                break;
            }
            PipelineEvent::Wake => {}
        }
    }

    ctx.status.set_playing(false);
    mark_loop_stopped(&ctx.state);
    log::info!(
        "stream loop finished after {} live frames",
        ctx.demand.delivered()
    );
}

/// A loop that ends on its own leaves the pipeline stopped; `Stopping` is
/// owned by `stop_stream` and left alone.
fn mark_loop_stopped(state: &Mutex<PipelineState>) {
    let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
    if matches!(*state, PipelineState::Built | PipelineState::Playing) {
        *state = PipelineState::Stopped;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SimulatedBackend;
    use crate::codec::EncoderProfile;
    use std::time::Instant;

    fn params(mode: TopologyMode) -> BuildParams {
        BuildParams {
            mode,
            profile: EncoderProfile::H264,
            width: 640,
            height: 480,
            fps: 50,
            bitrate: 1_000_000,
            stream_address: "udp://127.0.0.1:5600".to_string(),
            rtsp_tls_validation: false,
        }
    }

    fn controller() -> StreamController {
        StreamController::new(
            Box::new(SimulatedBackend::new()),
            ControllerSettings {
                pull_timeout: Duration::from_millis(200),
                queue_capacity: 32,
            },
        )
    }

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn state_follows_build_start_stop() -> Result<()> {
        let mut ctl = controller();
        assert_eq!(ctl.state(), PipelineState::Unbuilt);

        ctl.build_pipeline(&params(TopologyMode::Live))?;
        assert_eq!(ctl.state(), PipelineState::Built);
        assert!(!ctl.is_stream_default());

        ctl.start_pipeline()?;
        assert!(wait_for(|| ctl.state() == PipelineState::Playing));
        assert!(ctl.is_stream_playing());

        ctl.stop_stream();
        assert_eq!(ctl.state(), PipelineState::Stopped);
        assert!(!ctl.is_stream_playing());
        Ok(())
    }

    #[test]
    fn start_without_build_fails() {
        let mut ctl = controller();
        assert!(ctl.start_pipeline().is_err());
    }

    #[test]
    fn stop_is_idempotent_and_safe_before_start() -> Result<()> {
        let mut ctl = controller();
        ctl.stop_stream();
        assert_eq!(ctl.state(), PipelineState::Unbuilt);

        ctl.build_pipeline(&params(TopologyMode::Live))?;
        ctl.stop_stream();
        ctl.stop_stream();
        assert_eq!(ctl.state(), PipelineState::Stopped);
        Ok(())
    }

    #[test]
    fn default_topology_reports_default_immediately() -> Result<()> {
        let mut ctl = controller();
        ctl.build_pipeline(&params(TopologyMode::Default))?;
        assert!(ctl.is_stream_default());
        Ok(())
    }

    #[test]
    fn build_rejects_empty_address_without_keeping_a_graph() {
        let mut ctl = controller();
        let mut p = params(TopologyMode::Live);
        p.stream_address = String::new();
        assert!(ctl.build_pipeline(&p).is_err());
        assert_eq!(ctl.state(), PipelineState::Unbuilt);
        assert!(ctl.start_pipeline().is_err());
    }

    #[test]
    fn play_failure_sets_error_and_exits_loop() -> Result<()> {
        let backend = SimulatedBackend::new().with_faults(crate::backend::SimFaults {
            fail_play: true,
            push_error: None,
        });
        let mut ctl = StreamController::new(Box::new(backend), ControllerSettings::default());
        ctl.build_pipeline(&params(TopologyMode::Live))?;
        ctl.start_pipeline()?;

        assert!(wait_for(|| ctl.loop_exited()));
        assert!(ctl.is_error_detected());
        assert!(!ctl.is_stream_playing());
        assert_eq!(ctl.state(), PipelineState::Stopped);
        ctl.stop_stream();
        Ok(())
    }
}
