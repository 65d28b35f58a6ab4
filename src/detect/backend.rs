use anyhow::Result;
use image::RgbImage;

use crate::detect::result::Detection;

/// Object detector backend.
///
/// A backend is invoked at most once per processed frame by the detection stage.
/// Calls are synchronous and may be slow; there is no timeout.
///
/// Errors are reported to the caller, which degrades them to an empty detection
/// list for that frame. Backends must not panic on malformed input.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a full frame. Boxes are in frame pixel coordinates.
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<Detection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
