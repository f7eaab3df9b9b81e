//! Planar camera frame to RGB conversion.
//!
//! Two steps, both pure:
//! 1. `pack_nv21` gathers the Y, U and V planes (any stride, any chroma
//!    layout) into one contiguous NV21 buffer.
//! 2. `nv21_to_rgb` transcodes that buffer to interleaved RGB (BT.601).
//!
//! Rotation metadata is copied onto the output untouched.

use image::RgbImage;

use crate::error::DecodeError;
use crate::frame::{DecodedImage, Plane, RawFrame};

/// Stateless frame decoder.
#[derive(Clone, Copy, Debug, Default)]
pub struct FrameDecoder;

impl FrameDecoder {
    pub fn new() -> Self {
        Self
    }

    /// Decode a raw frame. Identical input bytes always yield identical output.
    pub fn decode(&self, frame: &RawFrame) -> Result<DecodedImage, DecodeError> {
        let nv21 = pack_nv21(frame)?;
        let pixels = nv21_to_rgb(&nv21, frame.width, frame.height)?;
        Ok(DecodedImage::new(
            pixels,
            frame.timestamp,
            frame.rotation_degrees,
        ))
    }
}

/// Chroma plane dimensions for 4:2:0 subsampling (odd sizes round up).
fn chroma_dims(width: usize, height: usize) -> (usize, usize) {
    (width.div_ceil(2), height.div_ceil(2))
}

fn checked_dims(width: u32, height: u32) -> Result<(usize, usize, usize), DecodeError> {
    if width == 0 || height == 0 {
        return Err(DecodeError::ZeroDimension { width, height });
    }
    let w = width as usize;
    let h = height as usize;
    let (cw, ch) = chroma_dims(w, h);
    let total = w
        .checked_mul(h)
        .and_then(|luma| cw.checked_mul(ch)?.checked_mul(2)?.checked_add(luma))
        .ok_or(DecodeError::DimensionOverflow { width, height })?;
    Ok((w, h, total))
}

/// Validate that `plane` can address `cols` x `rows` samples.
fn check_plane(
    name: &'static str,
    plane: &Plane,
    cols: usize,
    rows: usize,
) -> Result<(), DecodeError> {
    let invalid = DecodeError::InvalidStride {
        plane: name,
        row_stride: plane.row_stride,
        pixel_stride: plane.pixel_stride,
    };
    if plane.pixel_stride == 0 {
        return Err(invalid);
    }
    let row_span = (cols - 1)
        .checked_mul(plane.pixel_stride)
        .and_then(|v| v.checked_add(1))
        .ok_or_else(|| invalid.clone())?;
    if plane.row_stride < row_span {
        return Err(invalid);
    }
    let expected = (rows - 1)
        .checked_mul(plane.row_stride)
        .and_then(|v| v.checked_add(row_span))
        .ok_or(invalid)?;
    let actual = plane.bytes().len();
    if actual < expected {
        return Err(DecodeError::PlaneTooSmall {
            plane: name,
            expected,
            actual,
        });
    }
    Ok(())
}

/// Pack the frame's planes into a contiguous NV21 buffer.
///
/// Row padding and chroma pixel strides are removed; the result is
/// `width * height` luma bytes followed by interleaved V/U pairs.
pub fn pack_nv21(frame: &RawFrame) -> Result<Vec<u8>, DecodeError> {
    let (w, h, total) = checked_dims(frame.width, frame.height)?;
    let (cw, ch) = chroma_dims(w, h);

    let y = frame.y_plane();
    let u = frame.u_plane();
    let v = frame.v_plane();
    check_plane("Y", y, w, h)?;
    check_plane("U", u, cw, ch)?;
    check_plane("V", v, cw, ch)?;

    let mut out = Vec::with_capacity(total);

    let y_bytes = y.bytes();
    for row in 0..h {
        let start = row * y.row_stride;
        if y.pixel_stride == 1 {
            out.extend_from_slice(&y_bytes[start..start + w]);
        } else {
            out.extend((0..w).map(|col| y_bytes[start + col * y.pixel_stride]));
        }
    }

    let u_bytes = u.bytes();
    let v_bytes = v.bytes();
    for row in 0..ch {
        for col in 0..cw {
            out.push(v_bytes[row * v.row_stride + col * v.pixel_stride]);
            out.push(u_bytes[row * u.row_stride + col * u.pixel_stride]);
        }
    }

    Ok(out)
}

/// Transcode a packed NV21 buffer to RGB.
pub fn nv21_to_rgb(nv21: &[u8], width: u32, height: u32) -> Result<RgbImage, DecodeError> {
    let (w, h, expected) = checked_dims(width, height)?;
    if nv21.len() != expected {
        return Err(DecodeError::BufferMismatch {
            expected,
            actual: nv21.len(),
        });
    }
    let (cw, _) = chroma_dims(w, h);
    let luma = w * h;

    let mut rgb = vec![0u8; luma * 3];
    for j in 0..h {
        for i in 0..w {
            let y = nv21[j * w + i] as f32;
            let vu_index = luma + ((j / 2) * cw + i / 2) * 2;
            let v = nv21[vu_index] as f32 - 128.0;
            let u = nv21[vu_index + 1] as f32 - 128.0;

            let r = y + 1.402_f32 * v;
            let g = y - 0.344_136_f32 * u - 0.714_136_f32 * v;
            let b = y + 1.772_f32 * u;

            let offset = (j * w + i) * 3;
            rgb[offset] = clamp_to_u8(r);
            rgb[offset + 1] = clamp_to_u8(g);
            rgb[offset + 2] = clamp_to_u8(b);
        }
    }

    RgbImage::from_raw(width, height, rgb).ok_or(DecodeError::DimensionOverflow { width, height })
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{ChromaLayout, Timestamp};

    fn ts() -> Timestamp {
        Timestamp::from_millis(0)
    }

    #[test]
    fn neutral_chroma_produces_gray() {
        let mut nv21 = vec![128u8; 4];
        nv21.extend_from_slice(&[128, 128]);
        let frame = RawFrame::from_nv21(1, nv21, 2, 2, ts());

        let image = FrameDecoder::new().decode(&frame).unwrap();
        assert_eq!(image.as_rgb_bytes(), &[128u8; 12][..]);
    }

    #[test]
    fn nv21_orders_v_before_u() {
        // V high, U low: strongly red.
        let nv21 = vec![128, 128, 128, 128, 255, 0];
        let frame = RawFrame::from_nv21(1, nv21.clone(), 2, 2, ts());
        let image = FrameDecoder::new().decode(&frame).unwrap();
        let px = image.pixels().get_pixel(0, 0);
        assert!(px[0] > 200 && px[2] < 50, "got {:?}", px);

        // Same bytes read as NV12 swap the meaning: strongly blue.
        let frame = RawFrame::from_nv12(2, nv21, 2, 2, ts());
        let image = FrameDecoder::new().decode(&frame).unwrap();
        let px = image.pixels().get_pixel(0, 0);
        assert!(px[2] > 200 && px[0] < 50, "got {:?}", px);
    }

    #[test]
    fn padded_planes_match_packed_planes() {
        // 4x2 frame, Y rows padded to 8 bytes, I420 chroma padded to 4 bytes.
        let luma = [10u8, 60, 110, 160, 20, 70, 120, 170];
        let mut y_padded = Vec::new();
        for row in luma.chunks(4) {
            y_padded.extend_from_slice(row);
            y_padded.extend_from_slice(&[0xEE; 4]);
        }
        let padded = RawFrame::new(
            1,
            Plane::new(y_padded, 8, 1),
            Plane::new(vec![90, 140, 0xEE, 0xEE], 4, 1),
            Plane::new(vec![200, 30, 0xEE, 0xEE], 4, 1),
            ChromaLayout::I420,
            4,
            2,
            ts(),
        );

        let mut nv21 = luma.to_vec();
        nv21.extend_from_slice(&[200, 90, 30, 140]);
        let packed = RawFrame::from_nv21(2, nv21.clone(), 4, 2, ts());

        assert_eq!(pack_nv21(&padded).unwrap(), nv21);
        let decoder = FrameDecoder::new();
        assert_eq!(
            decoder.decode(&padded).unwrap().as_rgb_bytes(),
            decoder.decode(&packed).unwrap().as_rgb_bytes()
        );
    }

    #[test]
    fn odd_dimensions_round_chroma_up() {
        // 3x3 frame needs 2x2 chroma samples.
        let mut nv21 = vec![100u8; 9];
        nv21.extend_from_slice(&[128u8; 8]);
        let frame = RawFrame::from_nv21(1, nv21, 3, 3, ts());
        let image = FrameDecoder::new().decode(&frame).unwrap();
        assert_eq!((image.width(), image.height()), (3, 3));
    }

    #[test]
    fn short_plane_is_a_decode_error() {
        let frame = RawFrame::from_nv21(1, vec![0u8; 5], 2, 2, ts());
        let err = FrameDecoder::new().decode(&frame).unwrap_err();
        assert!(matches!(err, DecodeError::PlaneTooSmall { .. }), "{}", err);
    }

    #[test]
    fn zero_dimension_is_a_decode_error() {
        let frame = RawFrame::from_nv21(1, vec![0u8; 6], 0, 2, ts());
        assert_eq!(
            FrameDecoder::new().decode(&frame).unwrap_err(),
            DecodeError::ZeroDimension {
                width: 0,
                height: 2
            }
        );
    }

    #[test]
    fn row_stride_narrower_than_row_is_rejected() {
        let frame = RawFrame::new(
            1,
            Plane::new(vec![0u8; 16], 2, 1),
            Plane::packed(vec![128u8; 4], 2),
            Plane::packed(vec![128u8; 4], 2),
            ChromaLayout::I420,
            4,
            4,
            ts(),
        );
        let err = pack_nv21(&frame).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidStride { plane: "Y", .. }));
    }

    #[test]
    fn decode_is_deterministic() {
        let data: Vec<u8> = (0..(16 * 8 + 2 * 8 * 4)).map(|i| (i * 37 % 251) as u8).collect();
        let a = RawFrame::from_nv21(1, data.clone(), 16, 8, ts());
        let b = RawFrame::from_nv21(2, data, 16, 8, ts());
        let decoder = FrameDecoder::new();
        assert_eq!(decoder.decode(&a).unwrap(), decoder.decode(&b).unwrap());
    }

    #[test]
    fn rotation_passes_through() {
        let mut nv21 = vec![128u8; 4];
        nv21.extend_from_slice(&[128, 128]);
        let frame = RawFrame::from_nv21(1, nv21, 2, 2, ts()).with_rotation(90);
        let image = FrameDecoder::new().decode(&frame).unwrap();
        assert_eq!(image.rotation_degrees, 90);
    }
}
