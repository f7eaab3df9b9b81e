//! Frame types flowing through the pipeline.
//!
//! - `RawFrame`: planar camera frame owned by the source until released.
//! - `DecodedImage`: interleaved RGB image produced by the decoder.
//! - `Timestamp`: capture time in milliseconds on the source clock.
//!
//! A `RawFrame` is released back to its source exactly once: either by an
//! explicit `RawFrame::release()` or when the frame is dropped.

use std::fmt;
use std::sync::Arc;

use image::RgbImage;

// ----------------------------------------------------------------------------
// Timestamp
// ----------------------------------------------------------------------------

/// Capture timestamp in milliseconds on the source clock.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    pub const fn as_millis(self) -> u64 {
        self.0
    }

    /// Milliseconds elapsed since `earlier`, or `None` if `earlier` is in the future.
    pub fn millis_since(self, earlier: Timestamp) -> Option<u64> {
        self.0.checked_sub(earlier.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

// ----------------------------------------------------------------------------
// RawFrame
// ----------------------------------------------------------------------------

/// How chroma samples are laid out across the U and V planes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChromaLayout {
    /// Semi-planar, interleaved V then U (Android camera default).
    Nv21,
    /// Semi-planar, interleaved U then V.
    Nv12,
    /// Fully planar U and V.
    I420,
}

/// One pixel plane of a raw frame.
///
/// Rows may be padded (`row_stride` > samples per row) and samples may be
/// spaced out (`pixel_stride` > 1, as with interleaved chroma). Several
/// planes may share one buffer at different offsets.
#[derive(Clone, Debug)]
pub struct Plane {
    pub data: Arc<[u8]>,
    pub offset: usize,
    pub row_stride: usize,
    pub pixel_stride: usize,
}

impl Plane {
    pub fn new(data: impl Into<Arc<[u8]>>, row_stride: usize, pixel_stride: usize) -> Self {
        Self {
            data: data.into(),
            offset: 0,
            row_stride,
            pixel_stride,
        }
    }

    /// Tightly packed plane (`pixel_stride` 1, no row padding).
    pub fn packed(data: impl Into<Arc<[u8]>>, width: usize) -> Self {
        Self::new(data, width, 1)
    }

    /// Plane starting `offset` bytes into a shared buffer.
    pub fn shared(data: Arc<[u8]>, offset: usize, row_stride: usize, pixel_stride: usize) -> Self {
        Self {
            data,
            offset,
            row_stride,
            pixel_stride,
        }
    }

    /// Bytes addressable by this plane.
    pub fn bytes(&self) -> &[u8] {
        self.data.get(self.offset..).unwrap_or(&[])
    }
}

/// Receives frames handed back by the pipeline.
pub trait FrameReleaser: Send + Sync {
    fn release(&self, frame_id: u64);
}

/// Raw planar frame from a video source.
///
/// Not `Clone`: there is exactly one owner, and dropping it returns the
/// frame to the source.
pub struct RawFrame {
    id: u64,
    planes: [Plane; 3],
    layout: ChromaLayout,
    pub width: u32,
    pub height: u32,
    pub rotation_degrees: u32,
    pub timestamp: Timestamp,
    releaser: Option<Arc<dyn FrameReleaser>>,
}

impl RawFrame {
    /// Create a raw frame from Y, U and V planes.
    ///
    /// For semi-planar layouts the U and V planes may alias the same buffer
    /// at different offsets, matching what camera HALs hand out.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: u64,
        y: Plane,
        u: Plane,
        v: Plane,
        layout: ChromaLayout,
        width: u32,
        height: u32,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            id,
            planes: [y, u, v],
            layout,
            width,
            height,
            rotation_degrees: 0,
            timestamp,
            releaser: None,
        }
    }

    /// Wrap a contiguous NV21 buffer (Y plane followed by interleaved VU).
    pub fn from_nv21(
        id: u64,
        data: impl Into<Arc<[u8]>>,
        width: u32,
        height: u32,
        timestamp: Timestamp,
    ) -> Self {
        Self::from_semi_planar(id, data.into(), ChromaLayout::Nv21, width, height, timestamp)
    }

    /// Wrap a contiguous NV12 buffer (Y plane followed by interleaved UV).
    pub fn from_nv12(
        id: u64,
        data: impl Into<Arc<[u8]>>,
        width: u32,
        height: u32,
        timestamp: Timestamp,
    ) -> Self {
        Self::from_semi_planar(id, data.into(), ChromaLayout::Nv12, width, height, timestamp)
    }

    // Chroma planes alias the interleaved block with a pixel stride of 2.
    fn from_semi_planar(
        id: u64,
        data: Arc<[u8]>,
        layout: ChromaLayout,
        width: u32,
        height: u32,
        timestamp: Timestamp,
    ) -> Self {
        let w = width as usize;
        let luma = w * height as usize;
        let chroma_row = w.div_ceil(2) * 2;
        let (u_offset, v_offset) = match layout {
            ChromaLayout::Nv12 => (luma, luma + 1),
            ChromaLayout::Nv21 | ChromaLayout::I420 => (luma + 1, luma),
        };
        Self::new(
            id,
            Plane::shared(data.clone(), 0, w, 1),
            Plane::shared(data.clone(), u_offset, chroma_row, 2),
            Plane::shared(data, v_offset, chroma_row, 2),
            layout,
            width,
            height,
            timestamp,
        )
    }

    pub fn with_rotation(mut self, degrees: u32) -> Self {
        self.rotation_degrees = degrees % 360;
        self
    }

    pub fn with_releaser(mut self, releaser: Arc<dyn FrameReleaser>) -> Self {
        self.releaser = Some(releaser);
        self
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn layout(&self) -> ChromaLayout {
        self.layout
    }

    pub fn y_plane(&self) -> &Plane {
        &self.planes[0]
    }

    pub fn u_plane(&self) -> &Plane {
        &self.planes[1]
    }

    pub fn v_plane(&self) -> &Plane {
        &self.planes[2]
    }

    /// Hand the frame back to its source now.
    pub fn release(mut self) {
        self.release_once();
    }

    fn release_once(&mut self) {
        if let Some(releaser) = self.releaser.take() {
            releaser.release(self.id);
        }
    }
}

impl Drop for RawFrame {
    fn drop(&mut self) {
        self.release_once();
    }
}

impl fmt::Debug for RawFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawFrame")
            .field("id", &self.id)
            .field("layout", &self.layout)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("rotation_degrees", &self.rotation_degrees)
            .field("timestamp", &self.timestamp)
            .finish_non_exhaustive()
    }
}

// ----------------------------------------------------------------------------
// DecodedImage
// ----------------------------------------------------------------------------

/// Interleaved RGB image produced by `FrameDecoder`.
///
/// Rotation metadata is carried for the display layer; nothing in the
/// pipeline applies it.
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedImage {
    pixels: RgbImage,
    pub timestamp: Timestamp,
    pub rotation_degrees: u32,
}

impl DecodedImage {
    pub fn new(pixels: RgbImage, timestamp: Timestamp, rotation_degrees: u32) -> Self {
        Self {
            pixels,
            timestamp,
            rotation_degrees,
        }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn pixels(&self) -> &RgbImage {
        &self.pixels
    }

    pub(crate) fn pixels_mut(&mut self) -> &mut RgbImage {
        &mut self.pixels
    }

    /// Raw interleaved RGB bytes, row-major.
    pub fn as_rgb_bytes(&self) -> &[u8] {
        self.pixels.as_raw()
    }
}
