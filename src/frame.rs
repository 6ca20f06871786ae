//! Encoded frame ingestion.
//!
//! - `Frame`: one encoded access unit with its producer timestamp. Not `Clone`;
//!   a frame moves from the producer into the queue and out to the pipeline once.
//! - `FrameQueue`: bounded FIFO shared by producers and the pipeline thread.
//! - `FrameSender`: cloneable producer handle exposing `submit_frame`.
//!
//! Producers never block. When the queue is full the oldest frame is evicted,
//! the same policy a pre-roll ring buffer uses.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Default bound on queued frames (about five seconds at 25 fps).
pub const DEFAULT_QUEUE_CAPACITY: usize = 120;

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// Encoded frame as delivered by the capture side.
///
/// There is no `Clone` impl: duplicating a frame would let the same access
/// unit reach the pipeline twice.
#[derive(Debug)]
pub struct Frame {
    timestamp_ns: u64,
    payload: Vec<u8>,
}

impl Frame {
    pub fn new(timestamp_ns: u64, payload: Vec<u8>) -> Self {
        Self {
            timestamp_ns,
            payload,
        }
    }

    /// Monotonic capture timestamp in nanoseconds.
    pub fn timestamp_ns(&self) -> u64 {
        self.timestamp_ns
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Consume the frame, yielding its timestamp and payload.
    pub fn into_parts(self) -> (u64, Vec<u8>) {
        (self.timestamp_ns, self.payload)
    }
}

// ----------------------------------------------------------------------------
// FrameQueue
// ----------------------------------------------------------------------------

/// Result of a bounded wait on the queue.
#[derive(Debug)]
pub enum PopOutcome {
    Frame(Frame),
    /// No frame arrived before the deadline.
    Timeout,
    /// The queue was closed; the consumer should shut down.
    Closed,
}

/// Result of a push. Producers are never told to slow down.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// The frame was queued after evicting the oldest one.
    Evicted,
    /// The queue is closed and the frame was discarded.
    Discarded,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub queued: usize,
    pub capacity: usize,
    pub pushed: u64,
    pub evicted: u64,
    pub discarded: u64,
}

struct QueueState {
    frames: VecDeque<Frame>,
    closed: bool,
    pushed: u64,
    evicted: u64,
    discarded: u64,
}

/// Bounded FIFO of encoded frames guarded by one mutex and one condition variable.
///
/// Any number of producers may push. A single consumer (the pipeline thread)
/// pops with a timeout. Pop order equals push order.
pub struct FrameQueue {
    state: Mutex<QueueState>,
    available: Condvar,
    capacity: usize,
}

impl FrameQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(QueueState {
                frames: VecDeque::with_capacity(capacity),
                closed: false,
                pushed: 0,
                evicted: 0,
                discarded: 0,
            }),
            available: Condvar::new(),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        // A panicking producer cannot leave the deque half-updated, so the
        // state stays usable after poisoning.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a frame and wake one waiter. Never blocks on the consumer.
    pub fn push(&self, frame: Frame) -> PushOutcome {
        let mut state = self.lock();
        if state.closed {
            state.discarded += 1;
            return PushOutcome::Discarded;
        }

        let mut outcome = PushOutcome::Queued;
        while state.frames.len() >= self.capacity {
            state.frames.pop_front();
            state.evicted += 1;
            outcome = PushOutcome::Evicted;
        }
        state.frames.push_back(frame);
        state.pushed += 1;
        drop(state);

        self.available.notify_one();
        outcome
    }

    /// Wait up to `timeout` for the next frame.
    ///
    /// Returns `Closed` as soon as the queue is closed, even if frames remain.
    pub fn try_pop_timeout(&self, timeout: Duration) -> PopOutcome {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if state.closed {
                return PopOutcome::Closed;
            }
            if let Some(frame) = state.frames.pop_front() {
                return PopOutcome::Frame(frame);
            }
            let now = Instant::now();
            if now >= deadline {
                return PopOutcome::Timeout;
            }
            let (guard, _) = self
                .available
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            state = guard;
        }
    }

    /// Close the queue and wake every waiter with `Closed`.
    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        state.frames.clear();
        drop(state);
        self.available.notify_all();
    }

    /// Reopen an emptied queue for a freshly built pipeline.
    pub fn reset(&self) {
        let mut state = self.lock();
        state.frames.clear();
        state.closed = false;
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().frames.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.lock();
        QueueStats {
            queued: state.frames.len(),
            capacity: self.capacity,
            pushed: state.pushed,
            evicted: state.evicted,
            discarded: state.discarded,
        }
    }
}

impl Default for FrameQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

// ----------------------------------------------------------------------------
// FrameSender: producer handle
// ----------------------------------------------------------------------------

/// Cloneable handle given to frame producers.
#[derive(Clone)]
pub struct FrameSender {
    queue: Arc<FrameQueue>,
}

impl FrameSender {
    pub(crate) fn new(queue: Arc<FrameQueue>) -> Self {
        Self { queue }
    }

    /// Hand one encoded frame to the pipeline. Never blocks and returns nothing;
    /// frames that cannot be queued are counted in the queue statistics.
    pub fn submit_frame(&self, timestamp_ns: u64, payload: Vec<u8>) {
        match self.queue.push(Frame::new(timestamp_ns, payload)) {
            PushOutcome::Queued => {}
            PushOutcome::Evicted => {
                log::debug!("frame queue full, evicted oldest frame");
            }
            PushOutcome::Discarded => {
                log::trace!("frame queue closed, discarded frame at {}", timestamp_ns);
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn frame(ts: u64) -> Frame {
        Frame::new(ts, ts.to_be_bytes().to_vec())
    }

    fn pop_ts(queue: &FrameQueue) -> Option<u64> {
        match queue.try_pop_timeout(Duration::from_millis(10)) {
            PopOutcome::Frame(f) => Some(f.timestamp_ns()),
            _ => None,
        }
    }

    #[test]
    fn pops_in_push_order() {
        let queue = FrameQueue::new(8);
        for ts in [1000, 1033, 1066] {
            assert_eq!(queue.push(frame(ts)), PushOutcome::Queued);
        }
        assert_eq!(pop_ts(&queue), Some(1000));
        assert_eq!(pop_ts(&queue), Some(1033));
        assert_eq!(pop_ts(&queue), Some(1066));
        assert_eq!(pop_ts(&queue), None);
    }

    #[test]
    fn empty_queue_times_out() {
        let queue = FrameQueue::new(4);
        let started = Instant::now();
        assert!(matches!(
            queue.try_pop_timeout(Duration::from_millis(50)),
            PopOutcome::Timeout
        ));
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn full_queue_evicts_oldest() {
        let queue = FrameQueue::new(2);
        queue.push(frame(1));
        queue.push(frame(2));
        assert_eq!(queue.push(frame(3)), PushOutcome::Evicted);

        assert_eq!(queue.len(), 2);
        assert_eq!(pop_ts(&queue), Some(2));
        assert_eq!(pop_ts(&queue), Some(3));

        let stats = queue.stats();
        assert_eq!(stats.pushed, 3);
        assert_eq!(stats.evicted, 1);
    }

    #[test]
    fn close_wakes_blocked_consumer() {
        let queue = Arc::new(FrameQueue::new(4));
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                let started = Instant::now();
                let outcome = queue.try_pop_timeout(Duration::from_secs(10));
                (matches!(outcome, PopOutcome::Closed), started.elapsed())
            })
        };
        thread::sleep(Duration::from_millis(50));
        queue.close();

        let (closed, waited) = consumer.join().unwrap();
        assert!(closed);
        assert!(waited < Duration::from_secs(5));
    }

    #[test]
    fn closed_queue_discards_pushes_until_reset() {
        let queue = FrameQueue::new(4);
        queue.close();
        assert_eq!(queue.push(frame(1)), PushOutcome::Discarded);
        assert!(matches!(
            queue.try_pop_timeout(Duration::from_millis(1)),
            PopOutcome::Closed
        ));

        queue.reset();
        assert!(!queue.is_closed());
        queue.push(frame(2));
        assert_eq!(pop_ts(&queue), Some(2));
        assert_eq!(queue.stats().discarded, 1);
    }

    #[test]
    fn sender_feeds_queue_from_another_thread() {
        let queue = Arc::new(FrameQueue::new(16));
        let sender = FrameSender::new(Arc::clone(&queue));
        let producer = thread::spawn(move || {
            for ts in 0..10u64 {
                sender.submit_frame(ts, vec![ts as u8]);
            }
        });
        producer.join().unwrap();

        let mut seen = Vec::new();
        while let Some(ts) = pop_ts(&queue) {
            seen.push(ts);
        }
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn frame_into_parts_returns_payload() {
        let f = Frame::new(42, b"nal".to_vec());
        assert_eq!(f.len(), 3);
        assert!(!f.is_empty());
        let (ts, payload) = f.into_parts();
        assert_eq!(ts, 42);
        assert_eq!(payload, b"nal");
    }
}
