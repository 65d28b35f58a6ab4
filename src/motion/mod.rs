//! Motion gating: per-ROI perceptual hashes and the batch-forming gate.

mod gate;
mod phash;

pub use gate::MotionGate;
pub use phash::PerceptualHash;
