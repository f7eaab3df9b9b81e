pub mod motion;
pub mod scripted;

pub use motion::MotionBackend;
pub use scripted::{ScriptedBackend, ScriptedStep};
