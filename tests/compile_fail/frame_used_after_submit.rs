// Pushing moves the frame into the queue.
use failover_streamer::{Frame, FrameQueue};

fn main() {
    let queue = FrameQueue::new(4);
    let frame = Frame::new(0, vec![1]);
    queue.push(frame);
    let _len = frame.len();
}
