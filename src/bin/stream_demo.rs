//! stream_demo - run the failover pipeline on the simulated backend.
//!
//! A synthetic producer submits frames for a while and then goes silent. The
//! demo logs delivered presentation times, the switch to the fallback input
//! and the final status.

use anyhow::{bail, Result};
use clap::Parser;
use std::time::{Duration, Instant};

use failover_streamer::{
    BuildParams, ControllerSettings, EncoderProfile, SimulatedBackend, StreamController,
    TopologyMode,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Demonstrate live-to-fallback failover")]
struct Args {
    /// Frames the producer submits before going silent.
    #[arg(long, default_value_t = 50)]
    frames: u32,

    #[arg(long, default_value_t = 25)]
    fps: u32,

    #[arg(long, default_value = "H264")]
    encoding: String,

    #[arg(long, default_value = "udp://127.0.0.1:5600")]
    address: String,

    /// Pull timeout before switching to the fallback input.
    #[arg(long, default_value_t = 500)]
    pull_timeout_ms: u64,

    /// How long to keep streaming after the producer stops.
    #[arg(long, default_value_t = 2)]
    linger_secs: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    if args.fps == 0 {
        bail!("--fps must be greater than zero");
    }

    let backend = SimulatedBackend::new();
    let probe = backend.probe();
    let mut controller = StreamController::new(
        Box::new(backend),
        ControllerSettings {
            pull_timeout: Duration::from_millis(args.pull_timeout_ms),
            ..ControllerSettings::default()
        },
    );
    controller.build_pipeline(&BuildParams {
        mode: TopologyMode::Live,
        profile: args.encoding.parse::<EncoderProfile>()?,
        width: 640,
        height: 480,
        fps: args.fps,
        bitrate: 1_000_000,
        stream_address: args.address.clone(),
        rtsp_tls_validation: false,
    })?;
    controller.start_pipeline()?;

    let sender = controller.frame_sender();
    let interval = Duration::from_nanos(1_000_000_000 / u64::from(args.fps));
    let frames = args.frames;
    let producer = std::thread::Builder::new()
        .name("demo-producer".to_string())
        .spawn(move || {
            let start = Instant::now();
            for i in 0..frames {
                let ts = start.elapsed().as_nanos() as u64;
                sender.submit_frame(ts, vec![(i % 256) as u8; 1024]);
                std::thread::sleep(interval);
            }
            log::info!("producer went silent after {} frames", frames);
        })?;
    if producer.join().is_err() {
        bail!("producer thread panicked");
    }

    std::thread::sleep(Duration::from_secs(args.linger_secs));
    let status = controller.status();
    controller.stop_stream();

    let pts = probe.live_pts();
    log::info!(
        "live frames delivered: {} (first pts {:?}, last pts {:?})",
        pts.len(),
        pts.first(),
        pts.last()
    );
    log::info!("fallback frames streamed: {}", probe.fallback_frames());
    log::info!("active input at end: {:?}", probe.active_input());
    log::info!("status before stop: {}", serde_json::to_string(&status)?);
    log::info!("queue: {:?}", controller.queue_stats());
    Ok(())
}
