//! Demand-driven pull from the frame queue into the live source.
//!
//! Each `NeedData` from the pipeline triggers one `on_need_data` call on the
//! execution thread. A frame is popped with a bounded wait; on timeout the
//! watchdog fails over to the synthetic input.

use std::sync::Arc;
use std::time::Duration;

use crate::backend::{EncodedBuffer, FlowError, MediaPipeline};
use crate::frame::{FrameQueue, PopOutcome};
use crate::graph::TopologyMode;
use crate::watchdog::FailoverWatchdog;

/// Longest wait for a live frame before failing over.
pub const DEFAULT_PULL_TIMEOUT: Duration = Duration::from_secs(2);

/// What a single pull did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PullOutcome {
    /// Nothing to do: no live branch, or already failed over.
    Idle,
    Delivered { pts_ns: u64 },
    /// The pull timed out and the watchdog switched inputs.
    FailedOver,
    /// The live source rejected the buffer; the loop must stop.
    Fatal(FlowError),
    /// The queue was closed by a stop request.
    Closed,
}

pub struct DemandController {
    mode: TopologyMode,
    queue: Arc<FrameQueue>,
    watchdog: FailoverWatchdog,
    pull_timeout: Duration,
    /// Timestamp of the first delivered frame; presentation times count from it.
    epoch_ns: Option<u64>,
    delivered: u64,
}

impl DemandController {
    pub fn new(
        mode: TopologyMode,
        queue: Arc<FrameQueue>,
        watchdog: FailoverWatchdog,
        pull_timeout: Duration,
    ) -> Self {
        Self {
            mode,
            queue,
            watchdog,
            pull_timeout,
            epoch_ns: None,
            delivered: 0,
        }
    }

    pub fn watchdog(&self) -> &FailoverWatchdog {
        &self.watchdog
    }

    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    pub fn on_need_data(&mut self, pipeline: &dyn MediaPipeline) -> PullOutcome {
        if self.mode == TopologyMode::Default || self.watchdog.is_failed_over() {
            return PullOutcome::Idle;
        }

        match self.queue.try_pop_timeout(self.pull_timeout) {
            PopOutcome::Frame(frame) => {
                let (timestamp_ns, payload) = frame.into_parts();
                let epoch = *self.epoch_ns.get_or_insert(timestamp_ns);
                let pts_ns = timestamp_ns.saturating_sub(epoch);
                match pipeline.push_buffer(EncodedBuffer { pts_ns, payload }) {
                    Ok(()) => {
                        self.delivered += 1;
                        PullOutcome::Delivered { pts_ns }
                    }
                    Err(err) => {
                        log::error!("live source rejected buffer at pts {}ns: {}", pts_ns, err);
                        PullOutcome::Fatal(err)
                    }
                }
            }
            PopOutcome::Timeout => match self.watchdog.trip(pipeline) {
                Ok(_) => PullOutcome::FailedOver,
                Err(e) => {
                    log::error!("failed to switch to the fallback source: {:#}", e);
                    PullOutcome::Fatal(FlowError::Error)
                }
            },
            PopOutcome::Closed => PullOutcome::Closed,
        }
    }
}
