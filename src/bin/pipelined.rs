//! pipelined - frame pipeline daemon
//!
//! Pulls frames from the configured source, runs them through the pipeline
//! and publishes results to an in-memory sink or a JPEG file.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use frame_pipeline::{
    open_source, BackendRegistry, FrameSink, JpegFileSink, MemorySink, Pipeline, PipelineConfig,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Rate-limited frame detection pipeline")]
struct Args {
    /// JSON config file (overrides PIPELINE_CONFIG).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Stop after this many source frames (0 = run until Ctrl-C).
    #[arg(long, default_value_t = 0)]
    frames: u64,

    /// Directory to write latest.jpg into. Without it frames stay in memory.
    #[arg(long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// JPEG quality for --output, 1-100.
    #[arg(long, default_value_t = 85, value_parser = clap::value_parser!(u8).range(1..=100))]
    jpeg_quality: u8,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let cfg = match args.config.as_deref() {
        Some(path) => PipelineConfig::load_from(Some(path))?,
        None => PipelineConfig::load()?,
    };

    let registry = BackendRegistry::standard();
    let backend = registry.select(&cfg.detector)?;

    let sink: Arc<dyn FrameSink> = match &args.output {
        Some(dir) => {
            let sink = JpegFileSink::new(dir)?.with_quality(args.jpeg_quality);
            log::info!("publishing frames to {}", sink.latest_path().display());
            Arc::new(sink)
        }
        None => Arc::new(MemorySink::new()),
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || shutdown.store(true, Ordering::SeqCst))
            .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;
    }

    let mut source = open_source(&cfg.source)?;
    source.connect()?;

    let pipeline = Pipeline::start(cfg.pipeline_options(), backend, sink)?;
    log::info!(
        "pipelined running: source={} detector={} min_interval={}ms warm_up={}s",
        cfg.source.url,
        cfg.detector,
        cfg.gate.min_interval.as_millis(),
        cfg.gate.warm_up.as_secs()
    );

    let frame_period = Duration::from_millis(1000 / u64::from(cfg.source.target_fps.max(1)));
    let mut last_health_log = Instant::now();
    let mut frames_seen = 0u64;

    while !shutdown.load(Ordering::SeqCst) {
        if args.frames > 0 && frames_seen >= args.frames {
            break;
        }
        let started = Instant::now();

        match source.next_frame() {
            Ok(frame) => {
                frames_seen += 1;
                pipeline.on_frame(frame);
            }
            Err(e) => log::warn!("source error: {:#}", e),
        }

        if last_health_log.elapsed() >= Duration::from_secs(5) {
            let source_stats = source.stats();
            let stats = pipeline.stats();
            log::info!(
                "source health={} frames={} outstanding={} url={}",
                source.is_healthy(),
                source_stats.frames_captured,
                source_stats.outstanding(),
                source_stats.url
            );
            log::info!(
                "pipeline admitted={} dropped={} published={} sink_errors={} stale={} decode_errors={} detection_errors={}",
                stats.admitted,
                stats.dropped,
                stats.published,
                stats.sink_errors,
                stats.stale_discarded,
                stats.decode_errors,
                stats.detection_errors
            );
            last_health_log = Instant::now();
        }

        if let Some(remaining) = frame_period.checked_sub(started.elapsed()) {
            std::thread::sleep(remaining);
        }
    }

    log::info!("shutting down after {} frames", frames_seen);
    let stats = pipeline.stats();
    pipeline.shutdown()?;
    log::info!(
        "final: received={} admitted={} published={} outstanding source frames={}",
        stats.received,
        stats.admitted,
        stats.published,
        source.stats().outstanding()
    );
    Ok(())
}
