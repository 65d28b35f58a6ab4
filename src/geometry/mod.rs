//! Static camera geometry: ROI masks and per-ROI perspective warps.

mod roi;
mod warp;

pub use roi::{Roi, RoiMask};
pub use warp::{Homography, Warp};
