//! End-to-end coordinator tests.
//!
//! Covers publish ordering under out-of-order completions, exactly-once
//! frame release on every path, and recovery after detector failures.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use frame_pipeline::{
    BoundingBox, ChromaLayout, DecodedImage, Decision, DetectionResult, FrameDecoder,
    FrameReleaser, FrameSink, GateConfig, MemorySink, Pipeline, PipelineOptions, Plane,
    PublishedFrame, RawFrame, ScriptedBackend, ScriptedStep, SharedBackend, StatsSnapshot,
    Timestamp, WarmUpHook,
};

const WAIT: Duration = Duration::from_secs(5);
const WIDTH: u32 = 16;
const HEIGHT: u32 = 16;

#[derive(Default)]
struct ReleaseLog {
    counts: Mutex<HashMap<u64, u32>>,
}

impl ReleaseLog {
    fn count(&self, id: u64) -> u32 {
        self.counts.lock().unwrap().get(&id).copied().unwrap_or(0)
    }
}

impl FrameReleaser for ReleaseLog {
    fn release(&self, frame_id: u64) {
        *self.counts.lock().unwrap().entry(frame_id).or_insert(0) += 1;
    }
}

fn nv21_frame(id: u64, millis: u64, releases: &Arc<ReleaseLog>) -> RawFrame {
    let luma = (WIDTH * HEIGHT) as usize;
    let mut data = vec![128u8; luma + luma / 2];
    data[..luma].fill((id * 20 % 255) as u8);
    RawFrame::from_nv21(id, data, WIDTH, HEIGHT, Timestamp::from_millis(millis))
        .with_releaser(releases.clone())
}

/// Frame whose luma plane is too short for its declared size.
fn truncated_frame(id: u64, millis: u64, releases: &Arc<ReleaseLog>) -> RawFrame {
    let w = WIDTH as usize;
    let chroma = vec![128u8; w * HEIGHT as usize / 2];
    RawFrame::new(
        id,
        Plane::packed(vec![0u8; w * 3], w),
        Plane::shared(chroma.clone().into(), 1, w, 2),
        Plane::shared(chroma.into(), 0, w, 2),
        ChromaLayout::Nv21,
        WIDTH,
        HEIGHT,
        Timestamp::from_millis(millis),
    )
    .with_releaser(releases.clone())
}

fn options(warm_up: Duration) -> PipelineOptions {
    PipelineOptions {
        gate: GateConfig {
            min_interval: Duration::from_millis(100),
            warm_up,
        },
        ..PipelineOptions::default()
    }
}

fn start(
    options: PipelineOptions,
    script: &ScriptedBackend,
) -> Result<(Pipeline, Arc<MemorySink>)> {
    let backend: SharedBackend = Arc::new(Mutex::new(script.clone()));
    let sink = Arc::new(MemorySink::new());
    let pipeline = Pipeline::start(options, backend, sink.clone())?;
    Ok((pipeline, sink))
}

fn wait_for(pipeline: &Pipeline, what: &str, done: impl Fn(&StatsSnapshot) -> bool) {
    let deadline = Instant::now() + WAIT;
    loop {
        let stats = pipeline.stats();
        if done(&stats) {
            return;
        }
        assert!(Instant::now() < deadline, "timed out waiting for {}: {:?}", what, stats);
        std::thread::sleep(Duration::from_millis(5));
    }
}

fn cat_box() -> DetectionResult {
    DetectionResult::from_boxes(vec![
        BoundingBox::new(0.25, 0.25, 0.75, 0.75, "cat", 0.9).unwrap()
    ])
}

fn wait_for_seq(pipeline: &Pipeline, seq: u64) {
    let deadline = Instant::now() + WAIT;
    while pipeline.published().map(|f| f.seq) != Some(seq) {
        assert!(
            Instant::now() < deadline,
            "seq {} never published: {:?}",
            seq,
            pipeline.stats()
        );
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn newer_publish_is_never_replaced_by_older_result() -> Result<()> {
    let releases = Arc::new(ReleaseLog::default());
    let script = ScriptedBackend::with_steps([
        ScriptedStep::respond(cat_box()),
        ScriptedStep::respond(cat_box()),
    ]);
    // The first frame waits out the warm-up, so seq 2 finishes first.
    let (pipeline, sink) = start(options(Duration::from_millis(300)), &script)?;

    assert!(pipeline.on_frame(nv21_frame(1, 0, &releases)).is_admit());
    assert!(pipeline.on_frame(nv21_frame(2, 100, &releases)).is_admit());

    wait_for(&pipeline, "seq 2 published", |s| s.published == 1);
    assert_eq!(pipeline.published().map(|f| f.seq), Some(2));

    // Once due, seq 1 is older than what was already submitted and is skipped.
    wait_for(&pipeline, "seq 1 superseded", |s| s.superseded == 1);
    assert_eq!(pipeline.published().map(|f| f.seq), Some(2));
    assert_eq!(sink.history(), vec![2]);
    assert_eq!(script.calls(), 1);
    assert_eq!(pipeline.stats().stale_discarded, 0);

    pipeline.shutdown()?;
    Ok(())
}

#[test]
fn late_warm_up_frame_does_not_displace_pending_newer_frame() -> Result<()> {
    let releases = Arc::new(ReleaseLog::default());
    let script = ScriptedBackend::with_steps([
        ScriptedStep::respond(cat_box()).after(Duration::from_millis(800)),
        ScriptedStep::respond(cat_box()),
    ]);
    // Seq 1 comes due while the slow first detection is still running and
    // a newer frame is waiting behind it.
    let (pipeline, sink) = start(options(Duration::from_millis(300)), &script)?;

    for (id, millis) in [(1, 0), (2, 100), (3, 200)] {
        assert!(pipeline.on_frame(nv21_frame(id, millis, &releases)).is_admit());
    }

    wait_for_seq(&pipeline, 3);
    let stats = pipeline.stats();
    assert_eq!(stats.stale_discarded, 0);
    assert!(stats.superseded >= 1);
    assert!(!sink.history().contains(&1));
    assert_eq!(sink.history().last(), Some(&3));

    pipeline.shutdown()?;
    Ok(())
}

struct RejectingSink;

impl FrameSink for RejectingSink {
    fn publish(&self, _frame: &PublishedFrame) -> Result<()> {
        Err(anyhow!("display detached"))
    }
}

#[test]
fn sink_failures_are_not_counted_as_published() -> Result<()> {
    let releases = Arc::new(ReleaseLog::default());
    let script = ScriptedBackend::with_steps([ScriptedStep::respond(cat_box())]);
    let backend: SharedBackend = Arc::new(Mutex::new(script.clone()));
    let pipeline = Pipeline::start(options(Duration::ZERO), backend, Arc::new(RejectingSink))?;

    pipeline.on_frame(nv21_frame(1, 0, &releases));
    wait_for(&pipeline, "sink error", |s| s.sink_errors == 1);
    let stats = pipeline.stats();
    assert_eq!(stats.published, 0);
    // The slot still holds the frame; only the sink missed it.
    assert_eq!(pipeline.published().map(|f| f.seq), Some(1));

    pipeline.shutdown()?;
    Ok(())
}

#[test]
fn every_frame_is_released_exactly_once() -> Result<()> {
    let releases = Arc::new(ReleaseLog::default());
    let script = ScriptedBackend::with_steps([
        ScriptedStep::respond(DetectionResult::Empty),
        ScriptedStep::fail("inference failed"),
        ScriptedStep::respond(cat_box()),
    ]);
    let (pipeline, _sink) = start(options(Duration::ZERO), &script)?;

    // Admitted, empty detection.
    pipeline.on_frame(nv21_frame(1, 0, &releases));
    wait_for(&pipeline, "first publish", |s| s.published == 1);

    // Dropped by the gate.
    assert_eq!(pipeline.on_frame(nv21_frame(2, 50, &releases)), Decision::Drop);
    assert_eq!(releases.count(2), 1);

    // Admitted, fails to decode.
    pipeline.on_frame(truncated_frame(3, 100, &releases));
    wait_for(&pipeline, "decode error", |s| s.decode_errors == 1);

    // Admitted, detector fails.
    pipeline.on_frame(nv21_frame(4, 200, &releases));
    wait_for(&pipeline, "detection error", |s| s.detection_errors == 1);

    // Admitted, decorated publish.
    pipeline.on_frame(nv21_frame(5, 300, &releases));
    wait_for(&pipeline, "second publish", |s| s.published == 2);

    pipeline.shutdown()?;
    for id in 1..=5 {
        assert_eq!(releases.count(id), 1, "frame {} release count", id);
    }
    Ok(())
}

#[test]
fn detection_error_does_not_stop_the_pipeline() -> Result<()> {
    let releases = Arc::new(ReleaseLog::default());
    let script = ScriptedBackend::with_steps([
        ScriptedStep::fail("gpu lost"),
        ScriptedStep::respond(cat_box()),
    ]);
    let (pipeline, _sink) = start(options(Duration::ZERO), &script)?;

    pipeline.on_frame(nv21_frame(1, 0, &releases));
    wait_for(&pipeline, "detection error", |s| s.detection_errors == 1);
    assert!(pipeline.published().is_none());

    pipeline.on_frame(nv21_frame(2, 100, &releases));
    wait_for(&pipeline, "publish after error", |s| s.published == 1);
    let published = pipeline.published().unwrap();
    assert_eq!(published.seq, 2);
    assert!(published.decorated);

    pipeline.shutdown()?;
    Ok(())
}

#[test]
fn empty_result_publishes_plain_frame_and_error_keeps_it() -> Result<()> {
    let releases = Arc::new(ReleaseLog::default());
    let script = ScriptedBackend::with_steps([
        ScriptedStep::respond(DetectionResult::Empty),
        ScriptedStep::fail("timeout in driver"),
    ]);
    let (pipeline, _sink) = start(options(Duration::ZERO), &script)?;

    let expected = FrameDecoder::new().decode(&nv21_frame(1, 0, &Arc::default()))?;
    pipeline.on_frame(nv21_frame(1, 0, &releases));
    wait_for(&pipeline, "empty publish", |s| s.published == 1);
    let published = pipeline.published().unwrap();
    assert!(!published.decorated);
    assert_eq!(*published.image, expected);

    pipeline.on_frame(nv21_frame(2, 100, &releases));
    wait_for(&pipeline, "detection error", |s| s.detection_errors == 1);
    assert_eq!(pipeline.published().map(|f| f.seq), Some(1));
    assert_eq!(pipeline.stats().empty_results, 1);

    pipeline.shutdown()?;
    Ok(())
}

#[test]
fn dropped_frames_never_reach_the_detector() -> Result<()> {
    let releases = Arc::new(ReleaseLog::default());
    let script = ScriptedBackend::new();
    let (pipeline, _sink) = start(options(Duration::ZERO), &script)?;

    pipeline.on_frame(nv21_frame(1, 0, &releases));
    for (id, millis) in [(2, 20), (3, 40), (4, 99)] {
        assert_eq!(pipeline.on_frame(nv21_frame(id, millis, &releases)), Decision::Drop);
    }
    wait_for(&pipeline, "publish", |s| s.published == 1);
    assert_eq!(script.calls(), 1);

    let stats = pipeline.stats();
    assert_eq!((stats.received, stats.admitted, stats.dropped), (4, 1, 3));
    pipeline.shutdown()?;
    Ok(())
}

struct CountingHook(Arc<AtomicUsize>);

impl WarmUpHook for CountingHook {
    fn on_warm_up(&mut self, image: &DecodedImage) {
        assert_eq!((image.width(), image.height()), (WIDTH, HEIGHT));
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn warm_up_defers_only_the_first_frame() -> Result<()> {
    let releases = Arc::new(ReleaseLog::default());
    let hook_calls = Arc::new(AtomicUsize::new(0));
    let script = ScriptedBackend::new();
    let backend: SharedBackend = Arc::new(Mutex::new(script.clone()));
    let pipeline = Pipeline::start_with_hook(
        options(Duration::from_secs(30)),
        backend,
        Arc::new(MemorySink::new()),
        Box::new(CountingHook(hook_calls.clone())),
    )?;

    let started = Instant::now();
    pipeline.on_frame(nv21_frame(1, 0, &releases));
    assert!(started.elapsed() < Duration::from_secs(1));

    pipeline.on_frame(nv21_frame(2, 100, &releases));
    wait_for(&pipeline, "seq 2 published", |s| s.published == 1);
    pipeline.on_frame(nv21_frame(3, 200, &releases));
    wait_for(&pipeline, "seq 3 published", |s| s.published == 2);
    assert_eq!(pipeline.published().map(|f| f.seq), Some(3));
    assert_eq!(pipeline.stats().warm_ups, 1);
    assert_eq!(hook_calls.load(Ordering::SeqCst), 1);
    // Released after decode even though its detection is still deferred.
    assert_eq!(releases.count(1), 1);

    let gate = pipeline.gate_state();
    assert!(gate.has_seen_first_frame);
    assert_eq!(gate.last_processed, Some(Timestamp::from_millis(200)));
    assert_eq!(gate.admitted, 3);

    pipeline.shutdown()?;
    assert_eq!(script.calls(), 2);
    Ok(())
}
