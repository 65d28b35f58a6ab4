//! Object detection seam.
//!
//! The detection stage consumes detectors through `DetectorBackend` and never
//! depends on a concrete engine.

mod backend;
mod backends;
mod result;

use anyhow::{anyhow, Result};

pub use backend::DetectorBackend;
pub use backends::StubBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use result::{is_vehicle, BoundingBox, Detection, VEHICLE_LABELS};

use crate::config::DetectorSettings;

/// Build the backend named in the configuration.
pub fn backend_from_settings(settings: &DetectorSettings) -> Result<Box<dyn DetectorBackend>> {
    match settings.backend.as_str() {
        "stub" => Ok(Box::new(StubBackend::new())),
        #[cfg(feature = "backend-tract")]
        "tract" => {
            let path = settings
                .model_path
                .as_ref()
                .ok_or_else(|| anyhow!("detector backend 'tract' requires model_path"))?;
            let backend = TractBackend::new(path, settings.input_size)?
                .with_thresholds(settings.confidence, settings.nms_iou);
            Ok(Box::new(backend))
        }
        #[cfg(not(feature = "backend-tract"))]
        "tract" => Err(anyhow!(
            "detector backend 'tract' requires the backend-tract feature"
        )),
        other => Err(anyhow!("unknown detector backend '{}'", other)),
    }
}
