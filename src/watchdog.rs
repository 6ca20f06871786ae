//! Failover watchdog.
//!
//! Owns the switch's active input. The only transition is
//! `LiveSource -> FallbackSource`, taken when a pull times out; there is no
//! way back short of rebuilding the pipeline.

use anyhow::Result;
use serde::Serialize;
use std::sync::Arc;

use crate::backend::MediaPipeline;
use crate::graph::TopologyMode;
use crate::status::StreamStatus;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActiveBranch {
    LiveSource,
    FallbackSource,
}

pub struct FailoverWatchdog {
    active: ActiveBranch,
    status: Arc<StreamStatus>,
}

impl FailoverWatchdog {
    /// Live topologies start on the live input; default topologies only have
    /// the synthetic one.
    pub fn new(mode: TopologyMode, status: Arc<StreamStatus>) -> Self {
        let active = match mode {
            TopologyMode::Live => ActiveBranch::LiveSource,
            TopologyMode::Default => ActiveBranch::FallbackSource,
        };
        Self { active, status }
    }

    pub fn active(&self) -> ActiveBranch {
        self.active
    }

    pub fn is_failed_over(&self) -> bool {
        self.active == ActiveBranch::FallbackSource
    }

    /// Switch to the synthetic input. Returns `true` if this call switched;
    /// repeated calls are no-ops.
    pub fn trip(&mut self, pipeline: &dyn MediaPipeline) -> Result<bool> {
        if self.is_failed_over() {
            return Ok(false);
        }
        pipeline.select_input(ActiveBranch::FallbackSource)?;
        self.active = ActiveBranch::FallbackSource;
        self.status.set_default(true);
        log::warn!("no live frame within the pull timeout, switched to the fallback source");
        Ok(true)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::backend::{EncodedBuffer, FlowError, FlowResult};
    use std::sync::Mutex;

    /// Pipeline double recording every call.
    #[derive(Default)]
    pub(crate) struct RecordingPipeline {
        pub pushed: Mutex<Vec<(u64, Vec<u8>)>>,
        pub selected: Mutex<Vec<ActiveBranch>>,
        pub push_error: Mutex<Option<FlowError>>,
    }

    impl MediaPipeline for RecordingPipeline {
        fn play(&self) -> Result<()> {
            Ok(())
        }

        fn halt(&self) -> Result<()> {
            Ok(())
        }

        fn push_buffer(&self, buffer: EncodedBuffer) -> FlowResult {
            if let Some(err) = *self.push_error.lock().unwrap() {
                return Err(err);
            }
            self.pushed
                .lock()
                .unwrap()
                .push((buffer.pts_ns, buffer.payload));
            Ok(())
        }

        fn end_of_stream(&self) -> FlowResult {
            Ok(())
        }

        fn select_input(&self, branch: ActiveBranch) -> Result<()> {
            self.selected.lock().unwrap().push(branch);
            Ok(())
        }

        fn disconnect_demand(&self) {}
    }

    #[test]
    fn live_mode_starts_on_live_source() {
        let watchdog = FailoverWatchdog::new(TopologyMode::Live, Arc::new(StreamStatus::new()));
        assert_eq!(watchdog.active(), ActiveBranch::LiveSource);
        assert!(!watchdog.is_failed_over());
    }

    #[test]
    fn trip_switches_once_and_sets_default() -> Result<()> {
        let status = Arc::new(StreamStatus::new());
        let pipeline = RecordingPipeline::default();
        let mut watchdog = FailoverWatchdog::new(TopologyMode::Live, Arc::clone(&status));

        assert!(watchdog.trip(&pipeline)?);
        assert!(!watchdog.trip(&pipeline)?);

        assert_eq!(watchdog.active(), ActiveBranch::FallbackSource);
        assert!(status.is_default());
        assert_eq!(
            *pipeline.selected.lock().unwrap(),
            vec![ActiveBranch::FallbackSource]
        );
        Ok(())
    }

    #[test]
    fn default_mode_never_selects() -> Result<()> {
        let pipeline = RecordingPipeline::default();
        let mut watchdog =
            FailoverWatchdog::new(TopologyMode::Default, Arc::new(StreamStatus::new()));
        assert!(!watchdog.trip(&pipeline)?);
        assert!(pipeline.selected.lock().unwrap().is_empty());
        Ok(())
    }
}
