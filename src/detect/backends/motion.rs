use anyhow::Result;
use sha2::{Digest, Sha256};

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{BoundingBox, DetectionResult};
use crate::frame::DecodedImage;

const DEFAULT_CELL_SIZE: u32 = 8;
const DEFAULT_DIFF_THRESHOLD: u8 = 24;

/// CPU frame-difference detector.
///
/// Splits the frame into square cells, compares each cell's mean luma with
/// the previous frame and reports one `motion` box around all changed
/// cells. The first frame (or a size change) only primes the reference.
pub struct MotionBackend {
    cell_size: u32,
    diff_threshold: u8,
    last_hash: Option<[u8; 32]>,
    reference: Option<CellGrid>,
}

struct CellGrid {
    cols: u32,
    rows: u32,
    width: u32,
    height: u32,
    means: Vec<u8>,
}

impl MotionBackend {
    pub fn new() -> Self {
        Self {
            cell_size: DEFAULT_CELL_SIZE,
            diff_threshold: DEFAULT_DIFF_THRESHOLD,
            last_hash: None,
            reference: None,
        }
    }

    fn grid(&self, image: &DecodedImage) -> CellGrid {
        let (width, height) = (image.width(), image.height());
        let cols = width.div_ceil(self.cell_size);
        let rows = height.div_ceil(self.cell_size);
        let mut sums = vec![0u64; (cols * rows) as usize];
        let mut counts = vec![0u64; (cols * rows) as usize];
        for (x, y, px) in image.pixels().enumerate_pixels() {
            let luma = (299 * px[0] as u64 + 587 * px[1] as u64 + 114 * px[2] as u64) / 1000;
            let cell = ((y / self.cell_size) * cols + x / self.cell_size) as usize;
            sums[cell] += luma;
            counts[cell] += 1;
        }
        let means = sums
            .iter()
            .zip(&counts)
            .map(|(sum, count)| (sum / (*count).max(1)) as u8)
            .collect();
        CellGrid {
            cols,
            rows,
            width,
            height,
            means,
        }
    }
}

impl Default for MotionBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectorBackend for MotionBackend {
    fn name(&self) -> &'static str {
        "motion"
    }

    fn detect(&mut self, image: &DecodedImage) -> Result<DetectionResult> {
        let current_hash: [u8; 32] = Sha256::digest(image.as_rgb_bytes()).into();
        if self.last_hash == Some(current_hash) {
            return Ok(DetectionResult::Empty);
        }
        self.last_hash = Some(current_hash);

        let grid = self.grid(image);
        let previous = self.reference.replace(grid);
        let (Some(reference), Some(grid)) = (previous, self.reference.as_ref()) else {
            return Ok(DetectionResult::Empty);
        };
        if reference.cols != grid.cols || reference.rows != grid.rows {
            return Ok(DetectionResult::Empty);
        }

        let mut bounds: Option<(u32, u32, u32, u32)> = None;
        let mut changed = 0u32;
        for row in 0..grid.rows {
            for col in 0..grid.cols {
                let idx = (row * grid.cols + col) as usize;
                if grid.means[idx].abs_diff(reference.means[idx]) < self.diff_threshold {
                    continue;
                }
                changed += 1;
                bounds = Some(match bounds {
                    None => (col, row, col, row),
                    Some((c0, r0, c1, r1)) => (c0.min(col), r0.min(row), c1.max(col), r1.max(row)),
                });
            }
        }

        let Some((c0, r0, c1, r1)) = bounds else {
            return Ok(DetectionResult::Empty);
        };
        let cell = self.cell_size as f32;
        let (w, h) = (grid.width as f32, grid.height as f32);
        let region_cells = ((c1 - c0 + 1) * (r1 - r0 + 1)) as f32;
        let bbox = BoundingBox::new(
            c0 as f32 * cell / w,
            r0 as f32 * cell / h,
            ((c1 + 1) as f32 * cell).min(w) / w,
            ((r1 + 1) as f32 * cell).min(h) / h,
            "motion",
            changed as f32 / region_cells,
        );
        Ok(DetectionResult::from_boxes(bbox.into_iter().collect()))
    }
}
