//! platewatch: motion-triggered vehicle capture and license-plate clustering
//!
//! Continuous video from a fixed camera is reduced to a small number of
//! confident plate identifications in two independently running stages.
//!
//! # Architecture
//!
//! 1. **Capture** (`capture`): frames from a `FrameSource` pass a perceptual
//!    hash `MotionGate` per ROI. Closed batches go through a bounded
//!    `FrameCache` (drop when full) to the detection stage, which thins them
//!    with a backlog-driven `SkipPattern`, runs the detector and tracker, and
//!    writes one JPEG crop plus JSON sidecar per ROI and frame.
//! 2. **Reading** (`reader`): a poller consumes completed crop/sidecar pairs,
//!    runs OCR on crops containing vehicles, and feeds one
//!    `RoiPlateAnalyser` per ROI, which clusters noisy per-frame readings
//!    into plate-detection events.
//!
//! # Module Structure
//!
//! - `frame`: `Frame`, `FrameBatch`, `FrameCache`
//! - `ingest`: frame sources (image directories, `stub://` synthetic scenes)
//! - `geometry`: ROI mask and per-ROI perspective warp
//! - `motion`: DCT perceptual hash and the motion gate
//! - `skip`: skip rate and discard pattern
//! - `detect`, `track`: detector seam, IoU tracker, track/detection matching
//! - `artifact`: crop/sidecar naming and writing
//! - `plate`: plate normalization and temporal clustering
//! - `config`: file + environment configuration

pub mod artifact;
pub mod capture;
pub mod config;
pub mod detect;
pub mod frame;
pub mod geometry;
pub mod ingest;
pub mod motion;
pub mod plate;
pub mod reader;
pub mod skip;
pub mod track;

pub use artifact::{ArtifactName, ArtifactWriter, FrameMetadata, RoiObject};
pub use capture::{CaptureHandle, CaptureProcessor, CaptureStats};
pub use config::PipelineConfig;
pub use detect::{BoundingBox, Detection, DetectorBackend, StubBackend};
pub use frame::{Frame, FrameBatch, FrameCache};
pub use geometry::{RoiMask, Warp};
pub use ingest::{source_from_settings, FrameSource, ImageDirSource, SyntheticSource};
pub use motion::{MotionGate, PerceptualHash};
pub use plate::{DetectedPlate, FrameObservation, OcrReading, RoiPlateAnalyser};
pub use reader::{plate_digest, AlprCommand, PlateOcr, PlateReader};
pub use skip::{skip_rate, SkipPattern};
pub use track::{IouTracker, Track, TrackId, Tracker};
