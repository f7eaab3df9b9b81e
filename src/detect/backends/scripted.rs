use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{anyhow, Result};

use crate::detect::backend::DetectorBackend;
use crate::detect::result::DetectionResult;
use crate::frame::DecodedImage;

/// One scripted reply.
#[derive(Clone, Debug)]
pub struct ScriptedStep {
    pub delay: Duration,
    pub outcome: std::result::Result<DetectionResult, String>,
}

impl ScriptedStep {
    pub fn respond(result: DetectionResult) -> Self {
        Self {
            delay: Duration::ZERO,
            outcome: Ok(result),
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            delay: Duration::ZERO,
            outcome: Err(message.into()),
        }
    }

    /// Sleep for `delay` before replying.
    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Stub backend replaying scripted replies in order.
///
/// Once the script runs out every call returns `DetectionResult::Empty`,
/// so an unscripted instance behaves as a no-op detector. Clones share the
/// same script and call counter.
#[derive(Clone, Default)]
pub struct ScriptedBackend {
    steps: Arc<Mutex<VecDeque<ScriptedStep>>>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_steps(steps: impl IntoIterator<Item = ScriptedStep>) -> Self {
        let backend = Self::new();
        for step in steps {
            backend.push(step);
        }
        backend
    }

    pub fn push(&self, step: ScriptedStep) {
        self.steps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(step);
    }

    /// Number of `detect` calls started so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl DetectorBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, _image: &DecodedImage) -> Result<DetectionResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self
            .steps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        let Some(step) = step else {
            return Ok(DetectionResult::Empty);
        };
        if !step.delay.is_zero() {
            std::thread::sleep(step.delay);
        }
        step.outcome.map_err(|message| anyhow!(message))
    }
}
