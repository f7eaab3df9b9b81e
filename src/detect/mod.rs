mod backend;
pub mod backends;
mod registry;
mod result;

pub use backend::DetectorBackend;
pub use backends::{MotionBackend, ScriptedBackend, ScriptedStep};
pub use registry::{BackendRegistry, SharedBackend};
pub use result::{BoundingBox, DetectionResult};
