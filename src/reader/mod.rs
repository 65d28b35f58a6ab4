//! Downstream plate reading.
//!
//! Consumes the crop/sidecar pairs written by the capture pipeline, runs OCR
//! on crops that contain vehicles and feeds the results to the ROI's plate
//! analyser. The sidecar's existence marks a pair as complete; both files are
//! deleted once processed.

mod ocr;
mod poller;

pub use ocr::{AlprCommand, PlateOcr};
pub use poller::{plate_digest, PlateReader};
