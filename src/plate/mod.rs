//! Plate text normalization and multi-frame plate confirmation.
//!
//! OCR output for one ROI flows through [`RoiPlateAnalyser`], which keeps the
//! most recent per-frame guesses in a ring [`Block`] and reports a plate once
//! enough consistent sightings accumulate within a scan window.

mod analyser;
mod block;
pub mod normalize;
mod reading;

pub use analyser::{
    PlateRecord, RoiPlateAnalyser, BLOCK_SIZE, MIN_IOD, MIN_PLATE_FREQUENCY, MIN_PLATE_WIDTH_PX,
    REDETECTION_DELAY_SECS,
};
pub use block::Block;
pub use normalize::{
    alternate_representation, deduplicate_by_edit_distance, levenshtein, obfuscate_plate,
    valid_plates,
};
pub use reading::{
    is_unknown_vehicle, unknown_vehicle_id, DetectedPlate, FrameObservation, OcrReading, PlateRead,
    Point,
};
