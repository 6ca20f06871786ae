// A frame is delivered at most once: it cannot be duplicated.
use failover_streamer::Frame;

fn assert_clone<T: Clone>() {}

fn main() {
    assert_clone::<Frame>();
}
