//! Frame sources.
//!
//! - `SyntheticSource`: generated NV21 frames for `stub://` URLs.
//! - `V4l2Source`: local capture devices (feature: ingest-v4l2).
//!
//! Every frame a source hands out carries a releaser that counts returns,
//! so `SourceStats::outstanding` shows frames the pipeline still holds.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;

use crate::frame::{FrameReleaser, RawFrame};

pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

pub use synthetic::SyntheticSource;
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Source;

pub const DEFAULT_SOURCE_URL: &str = "stub://camera";
pub const DEFAULT_SOURCE_WIDTH: u32 = 640;
pub const DEFAULT_SOURCE_HEIGHT: u32 = 480;
pub const DEFAULT_SOURCE_FPS: u32 = 15;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceSettings {
    /// `stub://<name>` or a device path such as `/dev/video0`.
    pub url: String,
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_SOURCE_URL.to_string(),
            width: DEFAULT_SOURCE_WIDTH,
            height: DEFAULT_SOURCE_HEIGHT,
            target_fps: DEFAULT_SOURCE_FPS,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub url: String,
    pub frames_captured: u64,
    pub frames_released: u64,
}

impl SourceStats {
    /// Frames handed out and not yet returned.
    pub fn outstanding(&self) -> u64 {
        self.frames_captured.saturating_sub(self.frames_released)
    }
}

pub trait FrameSource {
    fn connect(&mut self) -> Result<()>;
    fn next_frame(&mut self) -> Result<RawFrame>;
    fn is_healthy(&self) -> bool;
    fn stats(&self) -> SourceStats;
}

/// Open the source named by `settings.url`.
pub fn open_source(settings: &SourceSettings) -> Result<Box<dyn FrameSource>> {
    if settings.url.starts_with("stub://") {
        return Ok(Box::new(SyntheticSource::new(settings.clone())));
    }
    open_device(settings)
}

#[cfg(feature = "ingest-v4l2")]
fn open_device(settings: &SourceSettings) -> Result<Box<dyn FrameSource>> {
    Ok(Box::new(V4l2Source::new(settings.clone())?))
}

#[cfg(not(feature = "ingest-v4l2"))]
fn open_device(settings: &SourceSettings) -> Result<Box<dyn FrameSource>> {
    Err(anyhow::anyhow!(
        "source {} needs a capture device; rebuild with --features ingest-v4l2",
        settings.url
    ))
}

/// Counts frames returned by the pipeline.
#[derive(Debug, Default)]
pub struct ReleaseCounter {
    released: AtomicU64,
}

impl ReleaseCounter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn released(&self) -> u64 {
        self.released.load(Ordering::SeqCst)
    }
}

impl FrameReleaser for ReleaseCounter {
    fn release(&self, frame_id: u64) {
        self.released.fetch_add(1, Ordering::SeqCst);
        log::trace!("ingest: frame {} released", frame_id);
    }
}
