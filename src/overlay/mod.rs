//! Box and label drawing onto decoded frames.
//!
//! Rendering always works on a copy: the input image is never touched, so a
//! frame that is still being displayed can be decorated safely.

pub mod font;

use image::{Rgb, RgbImage};

use crate::detect::BoundingBox;
use crate::frame::DecodedImage;

pub const DEFAULT_STROKE_WIDTH: u32 = 8;
pub const DEFAULT_LABEL_SCALE: u32 = 4;
pub const DEFAULT_BOX_COLOR: [u8; 3] = [255, 0, 255];
pub const DEFAULT_LABEL_COLOR: [u8; 3] = [0, 255, 0];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OverlayStyle {
    pub stroke_width: u32,
    pub box_color: [u8; 3],
    pub label_color: [u8; 3],
    /// Pixel size of one font cell; 1 draws 5x7 glyphs.
    pub label_scale: u32,
    /// Append " NN%" to the class name.
    pub show_confidence: bool,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            stroke_width: DEFAULT_STROKE_WIDTH,
            box_color: DEFAULT_BOX_COLOR,
            label_color: DEFAULT_LABEL_COLOR,
            label_scale: DEFAULT_LABEL_SCALE,
            show_confidence: false,
        }
    }
}

/// Inclusive pixel rectangle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PixelRect {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

/// Map a normalized box onto a `width` x `height` image.
///
/// Coordinates are scaled, rounded and clamped into the image. Returns
/// `None` for an empty image or a box that does not survive clamping.
pub fn to_pixel_rect(bbox: &BoundingBox, width: u32, height: u32) -> Option<PixelRect> {
    if width == 0 || height == 0 || !bbox.is_valid() {
        return None;
    }
    let scale = |value: f32, extent: u32| -> u32 {
        let max = (extent - 1) as f32;
        (value * extent as f32).round().clamp(0.0, max) as u32
    };
    let rect = PixelRect {
        left: scale(bbox.x1, width),
        top: scale(bbox.y1, height),
        right: scale(bbox.x2, width),
        bottom: scale(bbox.y2, height),
    };
    (rect.left <= rect.right && rect.top <= rect.bottom).then_some(rect)
}

#[derive(Clone, Debug, Default)]
pub struct OverlayRenderer {
    style: OverlayStyle,
}

impl OverlayRenderer {
    pub fn new(style: OverlayStyle) -> Self {
        Self { style }
    }

    /// Draw `boxes` onto a copy of `image`, in input order.
    ///
    /// Later boxes paint over earlier ones where they overlap. An empty
    /// slice yields a pixel-identical copy.
    pub fn render(&self, image: &DecodedImage, boxes: &[BoundingBox]) -> DecodedImage {
        let mut out = image.clone();
        let (width, height) = (out.width(), out.height());
        let canvas = out.pixels_mut();
        for bbox in boxes {
            let Some(rect) = to_pixel_rect(bbox, width, height) else {
                log::debug!("overlay: skipping box outside {}x{}", width, height);
                continue;
            };
            draw_rect(canvas, rect, self.style.stroke_width, Rgb(self.style.box_color));
            let label = self.label_for(bbox);
            draw_label(
                canvas,
                &label,
                rect.left,
                rect.bottom,
                self.style.label_scale,
                Rgb(self.style.label_color),
            );
        }
        out
    }

    fn label_for(&self, bbox: &BoundingBox) -> String {
        if self.style.show_confidence {
            format!("{} {:.0}%", bbox.class_name, bbox.confidence * 100.0)
        } else {
            bbox.class_name.clone()
        }
    }
}

/// Stroke grows inward from the rectangle edge.
fn draw_rect(canvas: &mut RgbImage, rect: PixelRect, thickness: u32, color: Rgb<u8>) {
    let thickness = thickness.max(1);
    for t in 0..thickness {
        let (left, top) = (rect.left + t, rect.top + t);
        let (Some(right), Some(bottom)) = (rect.right.checked_sub(t), rect.bottom.checked_sub(t))
        else {
            break;
        };
        if left > right || top > bottom {
            break;
        }
        for x in left..=right {
            canvas.put_pixel(x, top, color);
            canvas.put_pixel(x, bottom, color);
        }
        for y in top..=bottom {
            canvas.put_pixel(left, y, color);
            canvas.put_pixel(right, y, color);
        }
    }
}

/// Draw `text` with its baseline at `baseline_y`, starting at `x`.
///
/// Glyphs that fall partly outside the canvas are clipped.
fn draw_label(canvas: &mut RgbImage, text: &str, x: u32, baseline_y: u32, scale: u32, color: Rgb<u8>) {
    let scale = scale.max(1);
    let glyph_height = font::GLYPH_HEIGHT * scale;
    let top = i64::from(baseline_y) - i64::from(glyph_height) + 1;
    let mut cursor = i64::from(x);
    for ch in text.chars() {
        if let Some(rows) = font::glyph(ch) {
            draw_glyph(canvas, &rows, cursor, top, scale, color);
        }
        cursor += i64::from(font::GLYPH_ADVANCE * scale);
        if cursor >= i64::from(canvas.width()) {
            break;
        }
    }
}

fn draw_glyph(canvas: &mut RgbImage, rows: &[u8; 7], x: i64, y: i64, scale: u32, color: Rgb<u8>) {
    for (row, bits) in rows.iter().enumerate() {
        for col in 0..font::GLYPH_WIDTH {
            if bits & (1 << (font::GLYPH_WIDTH - 1 - col)) == 0 {
                continue;
            }
            let px = x + i64::from(col * scale);
            let py = y + row as i64 * i64::from(scale);
            fill_rect(canvas, px, py, scale, scale, color);
        }
    }
}

fn fill_rect(canvas: &mut RgbImage, x: i64, y: i64, w: u32, h: u32, color: Rgb<u8>) {
    let (cw, ch) = (i64::from(canvas.width()), i64::from(canvas.height()));
    let x0 = x.clamp(0, cw);
    let y0 = y.clamp(0, ch);
    let x1 = (x + i64::from(w)).clamp(0, cw);
    let y1 = (y + i64::from(h)).clamp(0, ch);
    for py in y0..y1 {
        for px in x0..x1 {
            canvas.put_pixel(px as u32, py as u32, color);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Timestamp;

    const GREY: Rgb<u8> = Rgb([40, 40, 40]);

    fn blank(width: u32, height: u32) -> DecodedImage {
        DecodedImage::new(
            RgbImage::from_pixel(width, height, GREY),
            Timestamp::from_millis(7),
            90,
        )
    }

    fn bbox(x1: f32, y1: f32, x2: f32, y2: f32, name: &str) -> BoundingBox {
        BoundingBox::new(x1, y1, x2, y2, name, 0.9).unwrap()
    }

    #[test]
    fn no_boxes_returns_identical_copy() {
        let image = blank(64, 48);
        let rendered = OverlayRenderer::default().render(&image, &[]);
        assert_eq!(rendered, image);
    }

    #[test]
    fn box_corners_land_on_scaled_pixels() {
        let image = blank(1000, 1000);
        let boxes = [bbox(0.1, 0.1, 0.5, 0.5, "cat")];
        let style = OverlayStyle::default();
        let rendered = OverlayRenderer::new(style).render(&image, &boxes);

        let box_color = Rgb(style.box_color);
        assert_eq!(*rendered.pixels().get_pixel(100, 100), box_color);
        assert_eq!(*rendered.pixels().get_pixel(500, 100), box_color);
        assert_eq!(*rendered.pixels().get_pixel(100, 300), box_color);
        assert_eq!(*rendered.pixels().get_pixel(300, 100 + style.stroke_width - 1), box_color);
        // Label sits on the left edge above the bottom line, so check the
        // right side of the bottom edge.
        assert_eq!(*rendered.pixels().get_pixel(500, 500), box_color);
        assert_eq!(*rendered.pixels().get_pixel(300, 300), GREY);
        assert_eq!(*rendered.pixels().get_pixel(99, 99), GREY);
        assert_eq!(*rendered.pixels().get_pixel(300, 100 + style.stroke_width), GREY);
    }

    #[test]
    fn input_image_is_not_modified() {
        let image = blank(100, 100);
        let before = image.clone();
        let rendered = OverlayRenderer::default().render(&image, &[bbox(0.0, 0.0, 1.0, 1.0, "a")]);
        assert_eq!(image, before);
        assert_ne!(rendered, image);
        assert_eq!(rendered.timestamp, image.timestamp);
        assert_eq!(rendered.rotation_degrees, 90);
    }

    #[test]
    fn label_is_drawn_above_bottom_left_corner() {
        let style = OverlayStyle {
            stroke_width: 1,
            label_scale: 1,
            ..OverlayStyle::default()
        };
        let image = blank(100, 100);
        // 'I' has a full top row at columns 1..=3.
        let rendered = OverlayRenderer::new(style).render(&image, &[bbox(0.2, 0.2, 0.8, 0.8, "I")]);
        let label = Rgb(style.label_color);
        // Bottom edge at y = 80, so the glyph spans rows 74..=80.
        assert_eq!(*rendered.pixels().get_pixel(22, 74), label);
        assert_eq!(*rendered.pixels().get_pixel(22, 73), GREY);
    }

    #[test]
    fn later_boxes_paint_over_earlier_ones() {
        let style = OverlayStyle {
            stroke_width: 2,
            ..OverlayStyle::default()
        };
        let image = blank(100, 100);
        let boxes = [bbox(0.1, 0.1, 0.9, 0.9, "a"), bbox(0.1, 0.1, 0.5, 0.5, "b")];
        let rendered = OverlayRenderer::new(style).render(&image, &boxes);
        // The second label covers the first box's left edge: 'B' has its
        // top-left cell set, at rows 23..=26 for a baseline of 50.
        assert_eq!(*rendered.pixels().get_pixel(10, 23), Rgb(style.label_color));
        assert_eq!(*rendered.pixels().get_pixel(10, 60), Rgb(style.box_color));
    }

    #[test]
    fn pixel_rect_clamps_to_image() {
        let rect = to_pixel_rect(&bbox(0.0, 0.0, 1.0, 1.0, "full"), 640, 480).unwrap();
        assert_eq!(
            rect,
            PixelRect {
                left: 0,
                top: 0,
                right: 639,
                bottom: 479
            }
        );
        assert!(to_pixel_rect(&bbox(0.0, 0.0, 1.0, 1.0, "x"), 0, 10).is_none());
    }

    #[test]
    fn confidence_suffix_is_optional() {
        let renderer = OverlayRenderer::new(OverlayStyle {
            show_confidence: true,
            ..OverlayStyle::default()
        });
        assert_eq!(renderer.label_for(&bbox(0.1, 0.1, 0.2, 0.2, "dog")), "dog 90%");
        assert_eq!(
            OverlayRenderer::default().label_for(&bbox(0.1, 0.1, 0.2, 0.2, "dog")),
            "dog"
        );
    }
}
