//! Pipeline coordinator.
//!
//! Threads:
//! - caller (acquisition): `Pipeline::on_frame` runs the gate and hands
//!   admitted frames to a bounded queue. It never blocks on decode or
//!   detection.
//! - `frame-processor`: decodes, releases the raw frame, and submits the
//!   decoded image to the dispatcher. The first frame is held back for
//!   the warm-up window without stalling later frames.
//! - `frame-publisher`: consumes detection completions, renders overlays
//!   and offers results to the published slot.
//!
//! Every admitted frame gets a sequence number from the gate. The
//! dispatcher never runs a submission older than one it has already
//! accepted, and the published slot only
//! accepts a frame newer than the one it holds, so a slow detection for an
//! older frame can never replace a newer published frame.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};

use crate::decode::FrameDecoder;
use crate::detect::{DetectionResult, SharedBackend};
use crate::dispatch::{
    Completion, DetectionDispatcher, DetectionOutcome, DispatchConfig, SubmitStatus,
};
use crate::display::{FrameSink, PublishedFrame};
use crate::frame::{DecodedImage, RawFrame};
use crate::gate::{Admission, Decision, FrameGate, GateConfig, GateState};
use crate::overlay::{OverlayRenderer, OverlayStyle};

pub const DEFAULT_QUEUE_DEPTH: usize = 2;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PipelineOptions {
    pub gate: GateConfig,
    pub dispatch: DispatchConfig,
    pub overlay: OverlayStyle,
    /// Admitted frames waiting for the processor before new ones are dropped.
    pub queue_depth: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            gate: GateConfig::default(),
            dispatch: DispatchConfig::default(),
            overlay: OverlayStyle::default(),
            queue_depth: DEFAULT_QUEUE_DEPTH,
        }
    }
}

/// Extension point invoked once with the decoded first frame.
pub trait WarmUpHook: Send {
    fn on_warm_up(&mut self, _image: &DecodedImage) {}
}

/// Hook that does nothing.
#[derive(Debug, Default)]
pub struct NoopWarmUp;

impl WarmUpHook for NoopWarmUp {}

// ----------------------------------------------------------------------------
// Stats
// ----------------------------------------------------------------------------

#[derive(Default)]
pub struct PipelineStats {
    received: AtomicU64,
    admitted: AtomicU64,
    dropped: AtomicU64,
    queue_full: AtomicU64,
    warm_ups: AtomicU64,
    decode_errors: AtomicU64,
    detection_errors: AtomicU64,
    empty_results: AtomicU64,
    superseded: AtomicU64,
    stale_discarded: AtomicU64,
    published: AtomicU64,
    sink_errors: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub received: u64,
    pub admitted: u64,
    pub dropped: u64,
    /// Admitted frames dropped because the processing queue was full.
    pub queue_full: u64,
    pub warm_ups: u64,
    pub decode_errors: u64,
    pub detection_errors: u64,
    pub empty_results: u64,
    pub superseded: u64,
    pub stale_discarded: u64,
    /// Frames that reached the sink.
    pub published: u64,
    /// Frames stored in the published slot but rejected by the sink.
    pub sink_errors: u64,
}

impl PipelineStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::SeqCst);
        StatsSnapshot {
            received: load(&self.received),
            admitted: load(&self.admitted),
            dropped: load(&self.dropped),
            queue_full: load(&self.queue_full),
            warm_ups: load(&self.warm_ups),
            decode_errors: load(&self.decode_errors),
            detection_errors: load(&self.detection_errors),
            empty_results: load(&self.empty_results),
            superseded: load(&self.superseded),
            stale_discarded: load(&self.stale_discarded),
            published: load(&self.published),
            sink_errors: load(&self.sink_errors),
        }
    }
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::SeqCst);
}

// ----------------------------------------------------------------------------
// Published slot
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Offer {
    Published,
    /// Rejected: the slot already holds `latest`, which is at least as new.
    Stale { latest: u64 },
}

/// The currently displayed frame.
///
/// Updates and the sink call happen under one lock, so readers never see
/// a half-published frame and the sink sees frames in increasing order.
pub struct PublishedSlot {
    current: Mutex<Option<PublishedFrame>>,
    sink: Arc<dyn FrameSink>,
}

impl PublishedSlot {
    pub fn new(sink: Arc<dyn FrameSink>) -> Self {
        Self {
            current: Mutex::new(None),
            sink,
        }
    }

    /// Publish `frame` unless the slot already holds the same or a newer sequence.
    ///
    /// The slot is updated even if the sink fails; the sink error is returned.
    pub fn offer(&self, frame: PublishedFrame) -> Result<Offer> {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(latest) = current.as_ref().map(|c| c.seq) {
            if frame.seq <= latest {
                return Ok(Offer::Stale { latest });
            }
        }
        let seq = frame.seq;
        *current = Some(frame);
        if let Some(published) = current.as_ref() {
            self.sink
                .publish(published)
                .with_context(|| format!("display sink rejected seq {}", seq))?;
        }
        Ok(Offer::Published)
    }

    pub fn current(&self) -> Option<PublishedFrame> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

// ----------------------------------------------------------------------------
// Pipeline
// ----------------------------------------------------------------------------

struct Job {
    frame: RawFrame,
    admission: Admission,
}

pub struct Pipeline {
    gate: FrameGate,
    jobs: Option<SyncSender<Job>>,
    slot: Arc<PublishedSlot>,
    stats: Arc<PipelineStats>,
    processor: Option<JoinHandle<()>>,
    publisher: Option<JoinHandle<()>>,
}

impl Pipeline {
    pub fn start(
        options: PipelineOptions,
        backend: SharedBackend,
        sink: Arc<dyn FrameSink>,
    ) -> Result<Self> {
        Self::start_with_hook(options, backend, sink, Box::new(NoopWarmUp))
    }

    pub fn start_with_hook(
        options: PipelineOptions,
        backend: SharedBackend,
        sink: Arc<dyn FrameSink>,
        hook: Box<dyn WarmUpHook>,
    ) -> Result<Self> {
        {
            let mut guard = backend
                .lock()
                .map_err(|_| anyhow!("detector backend lock poisoned"))?;
            let name = guard.name();
            guard
                .warm_up()
                .with_context(|| format!("warm up detector backend '{}'", name))?;
            log::info!("pipeline: detector backend '{}' ready", name);
        }

        let (dispatcher, completions) = DetectionDispatcher::spawn(backend, options.dispatch)?;
        let (jobs, job_rx) = mpsc::sync_channel(options.queue_depth.max(1));
        let slot = Arc::new(PublishedSlot::new(sink));
        let stats = Arc::new(PipelineStats::default());

        let processor = {
            let stats = stats.clone();
            std::thread::Builder::new()
                .name("frame-processor".into())
                .spawn(move || {
                    Processor {
                        decoder: FrameDecoder::new(),
                        dispatcher,
                        hook,
                        stats,
                        deferred: None,
                    }
                    .run(job_rx)
                })
                .context("spawn frame processor thread")?
        };

        let publisher = {
            let slot = slot.clone();
            let stats = stats.clone();
            let renderer = OverlayRenderer::new(options.overlay);
            std::thread::Builder::new()
                .name("frame-publisher".into())
                .spawn(move || run_publisher(completions, renderer, slot, stats))
                .context("spawn frame publisher thread")?
        };

        Ok(Self {
            gate: FrameGate::new(options.gate),
            jobs: Some(jobs),
            slot,
            stats,
            processor: Some(processor),
            publisher: Some(publisher),
        })
    }

    /// Handle one frame from the source. Called on the acquisition thread.
    ///
    /// The frame is always released: immediately when dropped, otherwise by
    /// the processor right after decoding.
    pub fn on_frame(&self, frame: RawFrame) -> Decision {
        bump(&self.stats.received);
        let decision = self.gate.admit(frame.timestamp);
        let admission = match decision {
            Decision::Drop => {
                bump(&self.stats.dropped);
                frame.release();
                return decision;
            }
            Decision::Admit(admission) => admission,
        };

        bump(&self.stats.admitted);
        let Some(jobs) = self.jobs.as_ref() else {
            frame.release();
            return decision;
        };
        let job = Job { frame, admission };
        match jobs.try_send(job) {
            Ok(()) => {}
            Err(TrySendError::Full(job)) => {
                bump(&self.stats.queue_full);
                log::warn!(
                    "pipeline: processing queue full, dropping admitted frame seq {}",
                    job.admission.seq
                );
                job.frame.release();
            }
            Err(TrySendError::Disconnected(job)) => {
                log::error!(
                    "pipeline: processor stopped, dropping seq {}",
                    job.admission.seq
                );
                job.frame.release();
            }
        }
        decision
    }

    pub fn published(&self) -> Option<PublishedFrame> {
        self.slot.current()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn gate_state(&self) -> GateState {
        self.gate.state()
    }

    /// Stop accepting frames, finish queued work and join worker threads.
    ///
    /// A frame still waiting out its warm-up is discarded. A backend call
    /// that is stuck past its timeout is abandoned, not waited for.
    pub fn shutdown(mut self) -> Result<()> {
        self.stop()
    }

    fn stop(&mut self) -> Result<()> {
        drop(self.jobs.take());
        let mut result = Ok(());
        if let Some(processor) = self.processor.take() {
            if processor.join().is_err() {
                result = Err(anyhow!("frame processor thread panicked"));
            }
        }
        if let Some(publisher) = self.publisher.take() {
            if publisher.join().is_err() {
                result = Err(anyhow!("frame publisher thread panicked"));
            }
        }
        result
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            log::error!("pipeline: {:#}", err);
        }
    }
}

// ----------------------------------------------------------------------------
// Processor
// ----------------------------------------------------------------------------

struct Deferred {
    seq: u64,
    image: Arc<DecodedImage>,
    due: Instant,
}

struct Processor {
    decoder: FrameDecoder,
    dispatcher: DetectionDispatcher,
    hook: Box<dyn WarmUpHook>,
    stats: Arc<PipelineStats>,
    deferred: Option<Deferred>,
}

impl Processor {
    fn run(mut self, jobs: Receiver<Job>) {
        loop {
            let next = match self.deferred.as_ref() {
                Some(deferred) => {
                    let wait = deferred.due.saturating_duration_since(Instant::now());
                    match jobs.recv_timeout(wait) {
                        Ok(job) => Some(job),
                        Err(RecvTimeoutError::Timeout) => None,
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                None => match jobs.recv() {
                    Ok(job) => Some(job),
                    Err(_) => break,
                },
            };

            self.submit_due_warm_up();
            if let Some(job) = next {
                self.process(job);
            }
        }

        if let Some(deferred) = self.deferred.take() {
            log::debug!(
                "pipeline: discarding warm-up frame seq {} on shutdown",
                deferred.seq
            );
        }
        if let Err(err) = self.dispatcher.shutdown() {
            log::error!("pipeline: {:#}", err);
        }
    }

    fn process(&mut self, job: Job) {
        let Job { frame, admission } = job;
        let seq = admission.seq;
        let decoded = self.decoder.decode(&frame);
        frame.release();

        let image = match decoded {
            Ok(image) => Arc::new(image),
            Err(err) => {
                bump(&self.stats.decode_errors);
                log::warn!("pipeline: dropping seq {}: {}", seq, err);
                return;
            }
        };

        match admission.warm_up {
            Some(delay) => {
                bump(&self.stats.warm_ups);
                self.hook.on_warm_up(&image);
                log::info!(
                    "pipeline: warm-up frame seq {} deferred {} ms",
                    seq,
                    delay.as_millis()
                );
                self.deferred = Some(Deferred {
                    seq,
                    image,
                    due: Instant::now() + delay,
                });
                self.submit_due_warm_up();
            }
            None => self.submit(seq, image),
        }
    }

    fn submit_due_warm_up(&mut self) {
        let due = self
            .deferred
            .as_ref()
            .is_some_and(|deferred| deferred.due <= Instant::now());
        if !due {
            return;
        }
        if let Some(deferred) = self.deferred.take() {
            self.submit(deferred.seq, deferred.image);
        }
    }

    fn submit(&self, seq: u64, image: Arc<DecodedImage>) {
        match self.dispatcher.submit(seq, image) {
            SubmitStatus::Queued => {}
            SubmitStatus::Coalesced { replaced } => {
                log::debug!("pipeline: seq {} replaced pending seq {}", seq, replaced);
            }
            SubmitStatus::Outdated { newest } => {
                log::debug!("pipeline: seq {} skipped, seq {} already submitted", seq, newest);
            }
            SubmitStatus::Closed => {
                log::warn!("pipeline: dispatcher closed, seq {} not submitted", seq);
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Publisher
// ----------------------------------------------------------------------------

fn run_publisher(
    completions: Receiver<Completion>,
    renderer: OverlayRenderer,
    slot: Arc<PublishedSlot>,
    stats: Arc<PipelineStats>,
) {
    for completion in completions {
        let Completion {
            seq,
            image,
            outcome,
        } = completion;

        let frame = match outcome {
            DetectionOutcome::Detected(DetectionResult::Boxes(boxes)) => PublishedFrame {
                seq,
                image: Arc::new(renderer.render(&image, &boxes)),
                decorated: true,
            },
            DetectionOutcome::Detected(DetectionResult::Empty) => {
                bump(&stats.empty_results);
                log::debug!("pipeline: seq {} has no detections", seq);
                PublishedFrame {
                    seq,
                    image,
                    decorated: false,
                }
            }
            DetectionOutcome::Failed(err) => {
                bump(&stats.detection_errors);
                log::warn!("pipeline: detection failed for seq {}: {}", seq, err);
                continue;
            }
            DetectionOutcome::Superseded => {
                bump(&stats.superseded);
                log::debug!("pipeline: seq {} superseded before detection", seq);
                continue;
            }
        };

        match slot.offer(frame) {
            Ok(Offer::Published) => {
                bump(&stats.published);
                log::debug!("pipeline: published seq {}", seq);
            }
            Ok(Offer::Stale { latest }) => {
                bump(&stats.stale_discarded);
                log::debug!(
                    "pipeline: discarding stale seq {} (seq {} already published)",
                    seq,
                    latest
                );
            }
            Err(err) => {
                bump(&stats.sink_errors);
                log::warn!("pipeline: {:#}", err);
            }
        }
    }
}
