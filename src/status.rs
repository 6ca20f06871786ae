//! Stream status flags shared between the execution thread and observers.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::lifecycle::PipelineState;

#[derive(Debug, Default)]
pub struct StreamStatus {
    playing: AtomicBool,
    default: AtomicBool,
    error_detected: AtomicBool,
}

impl StreamStatus {
    pub fn new() -> Self {
        Self::default()
    }

    /// True while the execution loop runs with the graph playing.
    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    /// True when the synthetic pattern is on air, either because the
    /// topology has no live branch or because failover happened.
    pub fn is_default(&self) -> bool {
        self.default.load(Ordering::SeqCst)
    }

    /// Sticky until the next build.
    pub fn is_error_detected(&self) -> bool {
        self.error_detected.load(Ordering::SeqCst)
    }

    pub(crate) fn set_playing(&self, value: bool) {
        self.playing.store(value, Ordering::SeqCst);
    }

    pub(crate) fn set_default(&self, value: bool) {
        self.default.store(value, Ordering::SeqCst);
    }

    pub(crate) fn set_error_detected(&self, value: bool) {
        self.error_detected.store(value, Ordering::SeqCst);
    }

    pub(crate) fn reset(&self, default: bool) {
        self.set_playing(false);
        self.set_default(default);
        self.set_error_detected(false);
    }
}

/// Point-in-time view published by the owning node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    pub playing: bool,
    pub default: bool,
    pub error_detected: bool,
    pub state: PipelineState,
}

impl StatusSnapshot {
    pub fn capture(status: &StreamStatus, state: PipelineState) -> Self {
        Self {
            playing: status.is_playing(),
            default: status.is_default(),
            error_detected: status.is_error_detected(),
            state,
        }
    }
}
