//! Asynchronous hand-off of decoded frames to a detector backend.
//!
//! Policy:
//! - At most one detection is in flight.
//! - Submissions made while one is in flight wait in a single pending slot;
//!   a newer submission replaces the pending one, which then completes as
//!   `DetectionOutcome::Superseded`.
//! - "Newer" means a higher sequence number. A submission whose sequence is
//!   not above every one accepted before it completes as `Superseded` at
//!   once and never reaches the backend.
//! - Every submission yields exactly one `Completion` on the result channel,
//!   tagged with the sequence number it was submitted with. A submission
//!   still pending at shutdown is dropped without one.
//! - The backend runs on its own runner thread. If it does not reply within
//!   the timeout the slot is released and the submission fails with
//!   `DetectionError::Timeout`; while the runner is still stuck, further
//!   submissions fail fast with `DetectionError::Busy`.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, SyncSender, TrySendError};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};

use crate::detect::{DetectionResult, SharedBackend};
use crate::error::DetectionError;
use crate::frame::DecodedImage;

pub const DEFAULT_DETECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_MIN_CONFIDENCE: f32 = 0.25;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DispatchConfig {
    pub timeout: Duration,
    /// Boxes below this confidence are discarded before delivery.
    pub min_confidence: f32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_DETECT_TIMEOUT,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum DetectionOutcome {
    Detected(DetectionResult),
    Failed(DetectionError),
    /// Replaced by a newer submission before running.
    Superseded,
}

/// Result of one submission.
#[derive(Clone, Debug)]
pub struct Completion {
    pub seq: u64,
    pub image: Arc<DecodedImage>,
    pub outcome: DetectionOutcome,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmitStatus {
    Queued,
    /// The pending submission with this sequence number was replaced.
    Coalesced { replaced: u64 },
    /// A submission with sequence `newest` was already accepted; this one
    /// completes as superseded.
    Outdated { newest: u64 },
    /// The dispatcher has shut down; no completion will be delivered.
    Closed,
}

struct Submission {
    seq: u64,
    image: Arc<DecodedImage>,
}

#[derive(Default)]
struct SlotState {
    pending: Option<Submission>,
    in_flight: Option<u64>,
    /// Highest sequence number accepted so far.
    newest: Option<u64>,
    closed: bool,
}

#[derive(Default)]
struct Slot {
    state: Mutex<SlotState>,
    ready: Condvar,
}

impl Slot {
    fn lock(&self) -> std::sync::MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct DetectionDispatcher {
    slot: Arc<Slot>,
    completions: Sender<Completion>,
    worker: Option<JoinHandle<()>>,
}

impl DetectionDispatcher {
    /// Start the dispatcher and return it with its result channel.
    pub fn spawn(
        backend: SharedBackend,
        config: DispatchConfig,
    ) -> Result<(Self, Receiver<Completion>)> {
        let (completions, results) = mpsc::channel();
        let runner = BackendRunner::spawn(backend, config.timeout)?;
        let slot = Arc::new(Slot::default());

        let worker_slot = slot.clone();
        let worker_completions = completions.clone();
        let worker = std::thread::Builder::new()
            .name("detect-dispatch".into())
            .spawn(move || run_dispatch(worker_slot, runner, worker_completions, config))
            .context("spawn dispatch thread")?;

        Ok((
            Self {
                slot,
                completions,
                worker: Some(worker),
            },
            results,
        ))
    }

    /// Submit a decoded frame for detection. Never blocks on the backend.
    pub fn submit(&self, seq: u64, image: Arc<DecodedImage>) -> SubmitStatus {
        let (status, superseded) = {
            let mut state = self.slot.lock();
            if state.closed {
                return SubmitStatus::Closed;
            }
            match state.newest {
                Some(newest) if seq <= newest => {
                    log::debug!("dispatch: submission {} is older than {}", seq, newest);
                    (SubmitStatus::Outdated { newest }, Submission { seq, image })
                }
                _ => {
                    state.newest = Some(seq);
                    let replaced = state.pending.replace(Submission { seq, image });
                    self.slot.ready.notify_one();
                    match replaced {
                        None => return SubmitStatus::Queued,
                        Some(old) => {
                            log::debug!("dispatch: submission {} superseded by {}", old.seq, seq);
                            (SubmitStatus::Coalesced { replaced: old.seq }, old)
                        }
                    }
                }
            }
        };

        let _ = self.completions.send(Completion {
            seq: superseded.seq,
            image: superseded.image,
            outcome: DetectionOutcome::Superseded,
        });
        status
    }

    /// Sequence number of the detection currently running, if any.
    pub fn in_flight(&self) -> Option<u64> {
        self.slot.lock().in_flight
    }

    /// Stop accepting work and wait for the running detection to finish or time out.
    pub fn shutdown(mut self) -> Result<()> {
        self.close();
        match self.worker.take() {
            Some(worker) => worker
                .join()
                .map_err(|_| anyhow!("dispatch thread panicked")),
            None => Ok(()),
        }
    }

    fn close(&self) {
        let mut state = self.slot.lock();
        state.closed = true;
        if let Some(pending) = state.pending.take() {
            log::debug!("dispatch: dropping pending submission {} on shutdown", pending.seq);
        }
        self.slot.ready.notify_all();
    }
}

impl Drop for DetectionDispatcher {
    fn drop(&mut self) {
        self.close();
    }
}

fn run_dispatch(
    slot: Arc<Slot>,
    mut runner: BackendRunner,
    completions: Sender<Completion>,
    config: DispatchConfig,
) {
    loop {
        let submission = {
            let mut state = slot.lock();
            loop {
                if state.closed {
                    return;
                }
                if let Some(submission) = state.pending.take() {
                    state.in_flight = Some(submission.seq);
                    break submission;
                }
                state = slot
                    .ready
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        };

        let outcome = match runner.run(&submission.image) {
            Ok(result) => DetectionOutcome::Detected(result.filter_confidence(config.min_confidence)),
            Err(err) => DetectionOutcome::Failed(err),
        };

        slot.lock().in_flight = None;

        let completion = Completion {
            seq: submission.seq,
            image: submission.image,
            outcome,
        };
        if completions.send(completion).is_err() {
            log::debug!("dispatch: result channel closed, stopping");
            return;
        }
    }
}

// ----------------------------------------------------------------------------
// Backend runner thread
// ----------------------------------------------------------------------------

struct RunRequest {
    id: u64,
    image: Arc<DecodedImage>,
}

struct RunReply {
    id: u64,
    result: std::result::Result<DetectionResult, String>,
}

struct BackendRunner {
    requests: SyncSender<RunRequest>,
    replies: Receiver<RunReply>,
    next_id: u64,
    timeout: Duration,
}

impl BackendRunner {
    fn spawn(backend: SharedBackend, timeout: Duration) -> Result<Self> {
        // One queued request at most while the runner is busy.
        let (requests, request_rx) = mpsc::sync_channel::<RunRequest>(1);
        let (reply_tx, replies) = mpsc::channel();

        std::thread::Builder::new()
            .name("detect-backend".into())
            .spawn(move || {
                for request in request_rx {
                    let result = run_backend(&backend, &request.image);
                    let reply = RunReply {
                        id: request.id,
                        result,
                    };
                    if reply_tx.send(reply).is_err() {
                        break;
                    }
                }
            })
            .context("spawn detector backend thread")?;

        Ok(Self {
            requests,
            replies,
            next_id: 0,
            timeout,
        })
    }

    fn run(&mut self, image: &Arc<DecodedImage>) -> Result<DetectionResult, DetectionError> {
        self.next_id += 1;
        let id = self.next_id;
        let request = RunRequest {
            id,
            image: image.clone(),
        };
        match self.requests.try_send(request) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => return Err(DetectionError::Busy),
            Err(TrySendError::Disconnected(_)) => return Err(DetectionError::Disconnected),
        }

        let started = Instant::now();
        let deadline = started + self.timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.replies.recv_timeout(remaining) {
                Ok(reply) if reply.id == id => {
                    return reply.result.map_err(DetectionError::Backend);
                }
                Ok(late) => {
                    log::debug!("dispatch: discarding late backend reply {}", late.id);
                }
                Err(RecvTimeoutError::Timeout) => {
                    return Err(DetectionError::Timeout(started.elapsed()));
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(DetectionError::Disconnected);
                }
            }
        }
    }
}

fn run_backend(
    backend: &SharedBackend,
    image: &DecodedImage,
) -> std::result::Result<DetectionResult, String> {
    let mut guard = backend
        .lock()
        .map_err(|_| "backend lock poisoned".to_string())?;
    match catch_unwind(AssertUnwindSafe(|| guard.detect(image))) {
        Ok(Ok(result)) => Ok(result),
        Ok(Err(err)) => Err(format!("{:#}", err)),
        Err(_) => Err(format!("backend '{}' panicked", guard.name())),
    }
}
