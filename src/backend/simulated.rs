//! In-process media backend.
//!
//! `SimulatedBackend` runs a topology without a media runtime, the same way a
//! `stub://` source stands in for a camera:
//! - a pacer thread raises `NeedData` once per frame interval while the live
//!   input is active, with at most one request outstanding (like `appsrc`)
//! - while the synthetic input is active the pacer emits fallback frames
//! - every buffer that reaches the sink is recorded in a `SimProbe`
//!
//! The probe also injects faults: bus errors and warnings, end-of-stream,
//! rejected pushes, missing factories and failed state changes.

use anyhow::{bail, Result};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use super::{EncodedBuffer, EventSender, FlowError, FlowResult, MediaBackend, MediaPipeline, PipelineEvent};
use crate::graph::Topology;
use crate::watchdog::ActiveBranch;

/// Every factory a topology can name.
const KNOWN_FACTORIES: &[&str] = &[
    "appsrc",
    "videotestsrc",
    "capsfilter",
    "textoverlay",
    "x264enc",
    "x265enc",
    "identity",
    "input-selector",
    "h264parse",
    "h265parse",
    "queue",
    "rtph264pay",
    "rtph265pay",
    "udpsink",
    "rtspclientsink",
];

/// Buffer observed at the sink.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeliveredBuffer {
    pub branch: ActiveBranch,
    pub pts_ns: u64,
    pub len: usize,
}

#[derive(Clone, Debug, Default)]
pub struct SimFaults {
    /// `play()` fails.
    pub fail_play: bool,
    /// Every push into the live source is rejected with this flow error.
    pub push_error: Option<FlowError>,
}

#[derive(Default)]
struct SimShared {
    events: Option<EventSender>,
    delivered: Vec<DeliveredBuffer>,
    active: Option<ActiveBranch>,
    playing: bool,
    halted: bool,
    eos: bool,
    push_error: Option<FlowError>,
    demand_requests: u64,
    instantiations: u64,
}

/// Observer and fault injector for pipelines built by a `SimulatedBackend`.
///
/// Cloned handles share state; state carries across rebuilds except for the
/// per-pipeline flags, which each instantiation resets.
#[derive(Clone, Default)]
pub struct SimProbe {
    shared: Arc<Mutex<SimShared>>,
}

impl SimProbe {
    fn lock(&self) -> MutexGuard<'_, SimShared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn delivered(&self) -> Vec<DeliveredBuffer> {
        self.lock().delivered.clone()
    }

    /// Presentation times of live buffers that reached the sink, in order.
    pub fn live_pts(&self) -> Vec<u64> {
        self.lock()
            .delivered
            .iter()
            .filter(|buffer| buffer.branch == ActiveBranch::LiveSource)
            .map(|buffer| buffer.pts_ns)
            .collect()
    }

    pub fn fallback_frames(&self) -> usize {
        self.lock()
            .delivered
            .iter()
            .filter(|buffer| buffer.branch == ActiveBranch::FallbackSource)
            .count()
    }

    pub fn active_input(&self) -> Option<ActiveBranch> {
        self.lock().active
    }

    pub fn is_playing(&self) -> bool {
        self.lock().playing
    }

    pub fn is_halted(&self) -> bool {
        self.lock().halted
    }

    pub fn eos_received(&self) -> bool {
        self.lock().eos
    }

    pub fn demand_requests(&self) -> u64 {
        self.lock().demand_requests
    }

    pub fn instantiations(&self) -> u64 {
        self.lock().instantiations
    }

    /// Reject subsequent pushes with `error` (or accept them again with `None`).
    pub fn set_push_error(&self, error: Option<FlowError>) {
        self.lock().push_error = error;
    }

    /// Post an error on the bus. Returns false if no pipeline is listening.
    pub fn inject_error(&self, source: &str, message: &str) -> bool {
        self.post(PipelineEvent::Error {
            source: Some(source.to_string()),
            message: message.to_string(),
        })
    }

    pub fn inject_warning(&self, source: &str, message: &str) -> bool {
        self.post(PipelineEvent::Warning {
            source: Some(source.to_string()),
            message: message.to_string(),
        })
    }

    pub fn inject_eos(&self) -> bool {
        self.post(PipelineEvent::EndOfStream)
    }

    fn post(&self, event: PipelineEvent) -> bool {
        let sender = self.lock().events.clone();
        sender.is_some_and(|sender| sender.send(event).is_ok())
    }
}

// ----------------------------------------------------------------------------
// Backend
// ----------------------------------------------------------------------------

pub struct SimulatedBackend {
    missing: HashSet<String>,
    faults: SimFaults,
    probe: SimProbe,
}

impl SimulatedBackend {
    pub fn new() -> Self {
        Self {
            missing: HashSet::new(),
            faults: SimFaults::default(),
            probe: SimProbe::default(),
        }
    }

    /// Pretend the runtime lacks `factory`.
    pub fn without_factory(mut self, factory: &str) -> Self {
        self.missing.insert(factory.to_string());
        self
    }

    pub fn with_faults(mut self, faults: SimFaults) -> Self {
        self.faults = faults;
        self
    }

    pub fn probe(&self) -> SimProbe {
        self.probe.clone()
    }
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaBackend for SimulatedBackend {
    fn name(&self) -> &'static str {
        "simulated"
    }

    fn has_factory(&self, factory: &str) -> bool {
        KNOWN_FACTORIES.contains(&factory) && !self.missing.contains(factory)
    }

    fn instantiate(
        &mut self,
        topology: &Topology,
        events: EventSender,
    ) -> Result<Box<dyn MediaPipeline>> {
        for stage in topology.stages() {
            if !self.has_factory(&stage.factory) {
                bail!("no element factory '{}' for stage '{}'", stage.factory, stage.name);
            }
        }

        let has_live = topology.live_source().is_some();
        {
            let mut shared = self.probe.lock();
            shared.events = Some(events.clone());
            shared.active = Some(if has_live {
                ActiveBranch::LiveSource
            } else {
                ActiveBranch::FallbackSource
            });
            shared.playing = false;
            shared.halted = false;
            shared.eos = false;
            shared.push_error = self.faults.push_error;
            shared.instantiations += 1;
        }
        log::debug!("simulated pipeline built: {}", topology.describe());

        Ok(Box::new(SimPipeline {
            probe: self.probe.clone(),
            events,
            has_live,
            interval: topology.frame_interval(),
            fail_play: self.faults.fail_play,
            running: Arc::new(AtomicBool::new(false)),
            demand_connected: Arc::new(AtomicBool::new(true)),
            demand_pending: Arc::new(AtomicBool::new(false)),
            pacer: Mutex::new(None),
        }))
    }
}

// ----------------------------------------------------------------------------
// Pipeline
// ----------------------------------------------------------------------------

struct SimPipeline {
    probe: SimProbe,
    events: EventSender,
    has_live: bool,
    interval: Duration,
    fail_play: bool,
    running: Arc<AtomicBool>,
    demand_connected: Arc<AtomicBool>,
    demand_pending: Arc<AtomicBool>,
    pacer: Mutex<Option<JoinHandle<()>>>,
}

impl SimPipeline {
    fn stop_pacer(&self) {
        self.running.store(false, Ordering::SeqCst);
        let handle = self
            .pacer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                log::warn!("simulated pacer thread panicked");
            }
        }
    }
}

impl MediaPipeline for SimPipeline {
    fn play(&self) -> Result<()> {
        if self.fail_play {
            bail!("state change to playing failed");
        }
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.probe.lock().playing = true;

        let probe = self.probe.clone();
        let events = self.events.clone();
        let running = Arc::clone(&self.running);
        let demand_connected = Arc::clone(&self.demand_connected);
        let demand_pending = Arc::clone(&self.demand_pending);
        let interval = self.interval;
        let handle = std::thread::Builder::new()
            .name("sim-pacer".to_string())
            .spawn(move || {
                let mut fallback_pts = 0u64;
                while running.load(Ordering::SeqCst) {
                    std::thread::sleep(interval);
                    let active = probe.lock().active;
                    match active {
                        Some(ActiveBranch::LiveSource) => {
                            if demand_connected.load(Ordering::SeqCst)
                                && !demand_pending.swap(true, Ordering::SeqCst)
                            {
                                probe.lock().demand_requests += 1;
                                if events.send(PipelineEvent::NeedData).is_err() {
                                    break;
                                }
                            }
                        }
                        Some(ActiveBranch::FallbackSource) => {
                            probe.lock().delivered.push(DeliveredBuffer {
                                branch: ActiveBranch::FallbackSource,
                                pts_ns: fallback_pts,
                                len: 0,
                            });
                            fallback_pts += interval.as_nanos() as u64;
                        }
                        None => {}
                    }
                }
            })?;
        *self.pacer.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        Ok(())
    }

    fn halt(&self) -> Result<()> {
        self.stop_pacer();
        let mut shared = self.probe.lock();
        shared.playing = false;
        shared.halted = true;
        Ok(())
    }

    fn push_buffer(&self, buffer: EncodedBuffer) -> FlowResult {
        if !self.has_live {
            return Err(FlowError::NotLinked);
        }
        let mut shared = self.probe.lock();
        if !shared.playing {
            return Err(FlowError::Flushing);
        }
        if shared.eos {
            return Err(FlowError::Eos);
        }
        if let Some(err) = shared.push_error {
            return Err(err);
        }
        shared.delivered.push(DeliveredBuffer {
            branch: ActiveBranch::LiveSource,
            pts_ns: buffer.pts_ns,
            len: buffer.payload.len(),
        });
        drop(shared);
        self.demand_pending.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn end_of_stream(&self) -> FlowResult {
        if !self.has_live {
            return Err(FlowError::NotLinked);
        }
        let mut shared = self.probe.lock();
        if shared.halted {
            return Err(FlowError::Flushing);
        }
        if shared.eos {
            return Err(FlowError::Eos);
        }
        shared.eos = true;
        let live_active = shared.active == Some(ActiveBranch::LiveSource);
        drop(shared);
        if live_active {
            let _ = self.events.send(PipelineEvent::EndOfStream);
        }
        Ok(())
    }

    fn select_input(&self, branch: ActiveBranch) -> Result<()> {
        if branch == ActiveBranch::LiveSource && !self.has_live {
            bail!("topology has no live input to select");
        }
        self.probe.lock().active = Some(branch);
        Ok(())
    }

    fn disconnect_demand(&self) {
        self.demand_connected.store(false, Ordering::SeqCst);
    }
}

impl Drop for SimPipeline {
    fn drop(&mut self) {
        self.stop_pacer();
    }
}
