//! Recoverable pipeline errors.
//!
//! None of these escape `Pipeline::on_frame` or stop a worker; the
//! coordinator logs them, counts them and moves on to the next frame.

use std::fmt;
use std::time::Duration;

use crate::frame::Timestamp;

/// Plane data inconsistent with the declared frame geometry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DecodeError {
    ZeroDimension { width: u32, height: u32 },
    DimensionOverflow { width: u32, height: u32 },
    InvalidStride { plane: &'static str, row_stride: usize, pixel_stride: usize },
    PlaneTooSmall { plane: &'static str, expected: usize, actual: usize },
    BufferMismatch { expected: usize, actual: usize },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroDimension { width, height } => {
                write!(f, "frame has zero dimension ({}x{})", width, height)
            }
            Self::DimensionOverflow { width, height } => {
                write!(f, "frame dimensions overflow ({}x{})", width, height)
            }
            Self::InvalidStride {
                plane,
                row_stride,
                pixel_stride,
            } => write!(
                f,
                "{} plane has invalid stride (row_stride={}, pixel_stride={})",
                plane, row_stride, pixel_stride
            ),
            Self::PlaneTooSmall {
                plane,
                expected,
                actual,
            } => write!(
                f,
                "{} plane too small: expected at least {} bytes, got {}",
                plane, expected, actual
            ),
            Self::BufferMismatch { expected, actual } => write!(
                f,
                "NV21 buffer length mismatch: expected {}, got {}",
                expected, actual
            ),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Detection did not produce a result for a submission.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DetectionError {
    /// The backend returned an error.
    Backend(String),
    /// No result within the configured bound; the in-flight slot was released.
    Timeout(Duration),
    /// The backend is still stuck on an earlier, timed-out request.
    Busy,
    /// The backend runner thread is gone.
    Disconnected,
}

impl fmt::Display for DetectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Backend(message) => write!(f, "detector backend failed: {}", message),
            Self::Timeout(elapsed) => {
                write!(f, "detector timed out after {} ms", elapsed.as_millis())
            }
            Self::Busy => write!(f, "detector backend busy with a timed-out request"),
            Self::Disconnected => write!(f, "detector backend runner disconnected"),
        }
    }
}

impl std::error::Error for DetectionError {}

/// Frame timestamp went backwards relative to the gate baseline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GateInconsistency {
    pub last_processed: Timestamp,
    pub received: Timestamp,
}

impl fmt::Display for GateInconsistency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "timestamp went backwards (last processed {}, received {}); resetting baseline",
            self.last_processed, self.received
        )
    }
}

impl std::error::Error for GateInconsistency {}
