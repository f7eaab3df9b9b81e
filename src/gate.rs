//! Frame admission gate.
//!
//! Runs synchronously on the acquisition thread and decides per frame
//! whether it is processed or dropped. The check, the baseline update and
//! the sequence number assignment happen under one lock, so two concurrent
//! callers can never both be admitted inside the same interval, and
//! sequence numbers follow admission order.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crate::error::GateInconsistency;
use crate::frame::Timestamp;

pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_millis(5_000);
pub const DEFAULT_WARM_UP: Duration = Duration::from_secs(30);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GateConfig {
    /// Minimum spacing between admitted frames.
    pub min_interval: Duration,
    /// Processing delay applied once, to the first frame.
    pub warm_up: Duration,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            min_interval: DEFAULT_MIN_INTERVAL,
            warm_up: DEFAULT_WARM_UP,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GateState {
    pub last_processed: Option<Timestamp>,
    pub has_seen_first_frame: bool,
    /// Frames admitted so far; also the sequence number of the newest one.
    pub admitted: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    Admit(Admission),
    Drop,
}

impl Decision {
    pub fn is_admit(&self) -> bool {
        matches!(self, Decision::Admit(_))
    }
}

/// Details of an admitted frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Admission {
    /// Position in admission order, starting at 1.
    pub seq: u64,
    /// Set only for the first frame: hold its processing back this long.
    pub warm_up: Option<Duration>,
    /// Set when the frame was admitted because the clock went backwards.
    pub inconsistency: Option<GateInconsistency>,
}

impl Admission {
    pub fn is_first_frame(&self) -> bool {
        self.warm_up.is_some()
    }
}

pub struct FrameGate {
    config: GateConfig,
    state: Mutex<GateState>,
}

impl FrameGate {
    pub fn new(config: GateConfig) -> Self {
        Self {
            config,
            state: Mutex::new(GateState::default()),
        }
    }

    /// Decide whether the frame captured at `timestamp` is processed.
    ///
    /// The first frame ever seen is always admitted and carries the warm-up
    /// delay. After that a frame is admitted only when at least
    /// `min_interval` has passed since the last admitted one.
    pub fn admit(&self, timestamp: Timestamp) -> Decision {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        let last = match state.last_processed {
            Some(last) if state.has_seen_first_frame => last,
            _ => {
                state.has_seen_first_frame = true;
                state.last_processed = Some(timestamp);
                state.admitted += 1;
                log::info!(
                    "gate: first frame at {}, processing deferred {} s for warm-up",
                    timestamp,
                    self.config.warm_up.as_secs()
                );
                return Decision::Admit(Admission {
                    seq: state.admitted,
                    warm_up: Some(self.config.warm_up),
                    inconsistency: None,
                });
            }
        };

        let inconsistency = match timestamp.millis_since(last) {
            Some(elapsed) if elapsed >= self.config.min_interval.as_millis() as u64 => None,
            Some(_) => return Decision::Drop,
            None => {
                let inconsistency = GateInconsistency {
                    last_processed: last,
                    received: timestamp,
                };
                log::warn!("gate: {}", inconsistency);
                Some(inconsistency)
            }
        };

        state.last_processed = Some(timestamp);
        state.admitted += 1;
        Decision::Admit(Admission {
            seq: state.admitted,
            warm_up: None,
            inconsistency,
        })
    }

    pub fn state(&self) -> GateState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for FrameGate {
    fn default() -> Self {
        Self::new(GateConfig::default())
    }
}
