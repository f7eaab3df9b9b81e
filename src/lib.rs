//! Frame Pipeline
//!
//! Rate-limited camera frame processing: frames from a video source pass a
//! cadence gate, are decoded to RGB, run through an object detector off the
//! acquisition thread, decorated with boxes and labels, and published to a
//! display.
//!
//! # Architecture
//!
//! ```text
//! source ─▶ FrameGate ─▶ FrameDecoder ─▶ DetectionDispatcher ─▶ OverlayRenderer ─▶ PublishedSlot ─▶ FrameSink
//!  (acquisition thread)   (frame-processor)   (detect-dispatch)        (frame-publisher)
//! ```
//!
//! The pipeline holds to these rules:
//!
//! 1. **Cadence**: at most one frame per `min_interval` is processed; the
//!    first frame is processed only after a warm-up window.
//! 2. **Prompt release**: every raw frame is returned to its source exactly
//!    once, right after decoding or immediately when dropped.
//! 3. **One detection in flight**: newer submissions coalesce into a single
//!    pending slot.
//! 4. **No regression**: a published frame is never replaced by the result
//!    of an older frame.
//! 5. **Recoverable errors**: decode and detection failures are logged and
//!    counted, never propagated out of `Pipeline::on_frame`.
//!
//! # Module Structure
//!
//! - `frame`: raw and decoded frame types
//! - `gate`, `decode`, `dispatch`, `overlay`: the pipeline stages
//! - `pipeline`: coordinator, published slot and stats
//! - `detect`: detector backends and registry
//! - `ingest`, `display`: source and display collaborators
//! - `config`: file and env configuration

pub mod config;
pub mod decode;
pub mod detect;
pub mod display;
pub mod dispatch;
pub mod error;
pub mod frame;
pub mod gate;
pub mod ingest;
pub mod overlay;
pub mod pipeline;

pub use config::PipelineConfig;
pub use decode::FrameDecoder;
pub use detect::{
    BackendRegistry, BoundingBox, DetectionResult, DetectorBackend, MotionBackend,
    ScriptedBackend, ScriptedStep, SharedBackend,
};
pub use display::{FrameSink, JpegFileSink, MemorySink, PublishedFrame};
pub use dispatch::{
    Completion, DetectionDispatcher, DetectionOutcome, DispatchConfig, SubmitStatus,
};
pub use error::{DecodeError, DetectionError, GateInconsistency};
pub use frame::{ChromaLayout, DecodedImage, FrameReleaser, Plane, RawFrame, Timestamp};
pub use gate::{Decision, FrameGate, GateConfig, GateState};
pub use ingest::{open_source, FrameSource, SourceSettings, SourceStats, SyntheticSource};
#[cfg(feature = "ingest-v4l2")]
pub use ingest::V4l2Source;
pub use overlay::{OverlayRenderer, OverlayStyle};
pub use pipeline::{
    Offer, Pipeline, PipelineOptions, PipelineStats, PublishedSlot, StatsSnapshot, WarmUpHook,
};
