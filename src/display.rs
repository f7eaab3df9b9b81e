//! Display collaborators receiving published frames.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;

use crate::frame::DecodedImage;

/// Frame made visible to the display.
#[derive(Clone, Debug)]
pub struct PublishedFrame {
    /// Admission sequence number of the source frame.
    pub seq: u64,
    pub image: Arc<DecodedImage>,
    /// False when published without an overlay (empty detection).
    pub decorated: bool,
}

/// Receives each published frame.
///
/// Called at most once per completed pipeline cycle, in increasing `seq`
/// order. Implementations must not block for long; the publisher thread
/// waits on them.
pub trait FrameSink: Send + Sync {
    fn publish(&self, frame: &PublishedFrame) -> Result<()>;
}

/// Keeps the latest published frame in memory.
#[derive(Default)]
pub struct MemorySink {
    latest: Mutex<Option<PublishedFrame>>,
    history: Mutex<Vec<u64>>,
    count: AtomicU64,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latest(&self) -> Option<PublishedFrame> {
        self.latest.lock().ok().and_then(|latest| latest.clone())
    }

    /// Sequence numbers in publish order.
    pub fn history(&self) -> Vec<u64> {
        self.history
            .lock()
            .map(|history| history.clone())
            .unwrap_or_default()
    }

    pub fn publish_count(&self) -> u64 {
        self.count.load(Ordering::SeqCst)
    }
}

impl FrameSink for MemorySink {
    fn publish(&self, frame: &PublishedFrame) -> Result<()> {
        *self
            .latest
            .lock()
            .map_err(|_| anyhow!("memory sink lock poisoned"))? = Some(frame.clone());
        self.history
            .lock()
            .map_err(|_| anyhow!("memory sink lock poisoned"))?
            .push(frame.seq);
        self.count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

const DEFAULT_JPEG_QUALITY: u8 = 85;

/// Writes each published frame to `<dir>/latest.jpg`.
///
/// The file is replaced atomically so a viewer never reads a partial image.
pub struct JpegFileSink {
    dir: PathBuf,
    quality: u8,
}

impl JpegFileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("create output directory {}", dir.display()))?;
        Ok(Self {
            dir,
            quality: DEFAULT_JPEG_QUALITY,
        })
    }

    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = quality.clamp(1, 100);
        self
    }

    pub fn latest_path(&self) -> PathBuf {
        self.dir.join("latest.jpg")
    }

    fn write_jpeg(&self, path: &Path, image: &DecodedImage) -> Result<()> {
        let file = File::create(path).with_context(|| format!("create {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        JpegEncoder::new_with_quality(&mut writer, self.quality)
            .encode(
                image.as_rgb_bytes(),
                image.width(),
                image.height(),
                ExtendedColorType::Rgb8,
            )
            .context("encode jpeg")?;
        writer.flush()?;
        writer
            .into_inner()
            .map_err(|err| anyhow!("flush jpeg: {}", err.error()))?
            .sync_all()?;
        Ok(())
    }
}

impl FrameSink for JpegFileSink {
    fn publish(&self, frame: &PublishedFrame) -> Result<()> {
        let path = self.latest_path();
        let tmp_path = path.with_extension("tmp");
        self.write_jpeg(&tmp_path, &frame.image)?;
        fs::rename(&tmp_path, &path)
            .with_context(|| format!("replace {}", path.display()))?;
        log::debug!("jpeg sink: wrote seq {} to {}", frame.seq, path.display());
        Ok(())
    }
}
