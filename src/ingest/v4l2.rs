//! V4L2 capture source (feature: ingest-v4l2).
//!
//! Requests NV12 from the device and wraps each captured buffer as a
//! semi-planar `RawFrame`. Mmap buffers are recycled by the driver, so the
//! frame owns a copy; the copy is released like any other frame.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use ouroboros::self_referencing;

use super::{FrameSource, ReleaseCounter, SourceSettings, SourceStats};
use crate::frame::{ChromaLayout, Plane, RawFrame, Timestamp};

pub struct V4l2Source {
    settings: SourceSettings,
    state: Option<V4l2State>,
    releases: Arc<ReleaseCounter>,
    frame_count: u64,
    started_at: Instant,
    last_frame_at: Option<Instant>,
    last_error: Option<String>,
    active_width: u32,
    active_height: u32,
    row_stride: usize,
}

#[self_referencing]
struct V4l2State {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Source {
    pub fn new(settings: SourceSettings) -> Result<Self> {
        Ok(Self {
            active_width: settings.width,
            active_height: settings.height,
            row_stride: settings.width as usize,
            settings,
            state: None,
            releases: ReleaseCounter::new(),
            frame_count: 0,
            started_at: Instant::now(),
            last_frame_at: None,
            last_error: None,
        })
    }

    fn health_grace(&self) -> Duration {
        let base_ms = if self.settings.target_fps == 0 {
            2_000
        } else {
            (1000 / self.settings.target_fps).saturating_mul(6)
        };
        Duration::from_millis(u64::from(base_ms.max(2_000)))
    }
}

impl FrameSource for V4l2Source {
    fn connect(&mut self) -> Result<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(&self.settings.url)
            .with_context(|| format!("open v4l2 device {}", self.settings.url))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = self.settings.width;
        format.height = self.settings.height;
        format.fourcc = v4l::FourCC::new(b"NV12");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "V4l2Source: failed to set format on {}: {}",
                    self.settings.url,
                    err
                );
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };
        if format.fourcc != v4l::FourCC::new(b"NV12") {
            return Err(anyhow!(
                "v4l2 device {} does not support NV12 (got {})",
                self.settings.url,
                format.fourcc
            ));
        }

        if self.settings.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.settings.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!(
                    "V4l2Source: failed to set fps on {}: {}",
                    self.settings.url,
                    err
                );
            }
        }

        self.active_width = format.width;
        self.active_height = format.height;
        self.row_stride = (format.stride as usize).max(format.width as usize);
        self.last_error = None;

        let state = V4l2StateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()
        .map_err(|err| {
            self.last_error = Some(err.to_string());
            err
        })?;
        self.state = Some(state);
        self.started_at = Instant::now();

        log::info!(
            "V4l2Source: connected to {} ({}x{}, stride {})",
            self.settings.url,
            self.active_width,
            self.active_height,
            self.row_stride
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<RawFrame> {
        use v4l::io::traits::CaptureStream;

        let state = self.state.as_mut().context("v4l2 device not connected")?;
        let data: Arc<[u8]> = state
            .with_mut(|fields| fields.stream.next().map(|(buf, _meta)| Arc::from(buf)))
            .map_err(|err| {
                self.last_error = Some(err.to_string());
                anyhow::Error::new(err).context("capture v4l2 frame")
            })?;

        let id = self.frame_count;
        self.frame_count += 1;
        let now = Instant::now();
        self.last_frame_at = Some(now);
        let timestamp =
            Timestamp::from_millis(now.duration_since(self.started_at).as_millis() as u64);

        // NV12: luma rows, then interleaved UV rows, both at the device stride.
        let stride = self.row_stride;
        let uv_offset = stride * self.active_height as usize;
        let frame = RawFrame::new(
            id,
            Plane::shared(data.clone(), 0, stride, 1),
            Plane::shared(data.clone(), uv_offset, stride, 2),
            Plane::shared(data, uv_offset + 1, stride, 2),
            ChromaLayout::Nv12,
            self.active_width,
            self.active_height,
            timestamp,
        )
        .with_releaser(self.releases.clone());
        Ok(frame)
    }

    fn is_healthy(&self) -> bool {
        if self.last_error.is_some() {
            return false;
        }
        let Some(last_frame_at) = self.last_frame_at else {
            return true;
        };
        last_frame_at.elapsed() <= self.health_grace()
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            url: self.settings.url.clone(),
            frames_captured: self.frame_count,
            frames_released: self.releases.released(),
        }
    }
}
