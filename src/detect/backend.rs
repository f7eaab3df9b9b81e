use anyhow::Result;

use crate::detect::result::DetectionResult;
use crate::frame::DecodedImage;

/// Detector backend trait.
///
/// Backends are stateless between calls apart from internal model state,
/// and must accept a new call as soon as the previous one returns.
/// Model and label loading belong to the backend's constructor.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a decoded frame.
    ///
    /// An empty result is `Ok(DetectionResult::Empty)`; `Err` means the
    /// backend failed and no result exists for this frame.
    fn detect(&mut self, image: &DecodedImage) -> Result<DetectionResult>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
