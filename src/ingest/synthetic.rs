//! Synthetic frame source for `stub://` URLs.
//!
//! Produces NV21 frames the way phone camera HALs hand them out: a padded
//! luma plane plus one interleaved VU block that the U and V planes both
//! alias. The scene is a dark background with a bright square that moves
//! a little every frame, plus light sensor noise.

use std::sync::Arc;

use anyhow::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{FrameSource, ReleaseCounter, SourceSettings, SourceStats};
use crate::frame::{ChromaLayout, Plane, RawFrame, Timestamp};

/// Bytes of padding at the end of every row.
const ROW_PADDING: usize = 16;
const BACKGROUND_LUMA: u8 = 32;
const SQUARE_LUMA: u8 = 220;
const NOISE: i16 = 3;
const NEUTRAL_CHROMA: u8 = 128;

pub struct SyntheticSource {
    settings: SourceSettings,
    frame_count: u64,
    releases: Arc<ReleaseCounter>,
    rng: StdRng,
    connected: bool,
}

impl SyntheticSource {
    pub fn new(settings: SourceSettings) -> Self {
        Self::with_seed(settings, 0x5eed)
    }

    pub fn with_seed(settings: SourceSettings, seed: u64) -> Self {
        Self {
            settings,
            frame_count: 0,
            releases: ReleaseCounter::new(),
            rng: StdRng::seed_from_u64(seed),
            connected: false,
        }
    }

    /// Source clock for frame `index`, spaced by the target fps.
    fn timestamp(&self, index: u64) -> Timestamp {
        let fps = u64::from(self.settings.target_fps.max(1));
        Timestamp::from_millis(index * 1000 / fps)
    }

    fn square(&self, index: u64) -> (usize, usize, usize) {
        let w = self.settings.width as usize;
        let h = self.settings.height as usize;
        let size = (w.min(h) / 6).max(1);
        let span_x = w.saturating_sub(size).max(1);
        let span_y = h.saturating_sub(size).max(1);
        let step = index as usize * 4;
        (step % span_x, (step / 2) % span_y, size)
    }

    fn luma_plane(&mut self, index: u64) -> Plane {
        let w = self.settings.width as usize;
        let h = self.settings.height as usize;
        let stride = w + ROW_PADDING;
        let (sx, sy, size) = self.square(index);

        let mut data = vec![0u8; stride * h];
        for y in 0..h {
            for x in 0..w {
                let inside = (sx..sx + size).contains(&x) && (sy..sy + size).contains(&y);
                let base = if inside { SQUARE_LUMA } else { BACKGROUND_LUMA };
                let noise = self.rng.gen_range(-NOISE..=NOISE);
                data[y * stride + x] = (i16::from(base) + noise).clamp(0, 255) as u8;
            }
        }
        Plane::new(data, stride, 1)
    }

    /// Interleaved VU block; returns (U plane, V plane).
    fn chroma_planes(&self) -> (Plane, Plane) {
        let cw = (self.settings.width as usize).div_ceil(2);
        let ch = (self.settings.height as usize).div_ceil(2);
        let stride = cw * 2 + ROW_PADDING;
        let data: Arc<[u8]> = vec![NEUTRAL_CHROMA; stride * ch].into();
        (
            Plane::shared(data.clone(), 1, stride, 2),
            Plane::shared(data, 0, stride, 2),
        )
    }
}

impl FrameSource for SyntheticSource {
    fn connect(&mut self) -> Result<()> {
        self.connected = true;
        log::info!(
            "SyntheticSource: connected to {} ({}x{} @ {} fps)",
            self.settings.url,
            self.settings.width,
            self.settings.height,
            self.settings.target_fps
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<RawFrame> {
        let index = self.frame_count;
        self.frame_count += 1;

        let y = self.luma_plane(index);
        let (u, v) = self.chroma_planes();
        let frame = RawFrame::new(
            index,
            y,
            u,
            v,
            ChromaLayout::Nv21,
            self.settings.width,
            self.settings.height,
            self.timestamp(index),
        )
        .with_rotation(90)
        .with_releaser(self.releases.clone());
        Ok(frame)
    }

    fn is_healthy(&self) -> bool {
        self.connected
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            url: self.settings.url.clone(),
            frames_captured: self.frame_count,
            frames_released: self.releases.released(),
        }
    }
}
