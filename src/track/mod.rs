//! Multi-object tracking and detection/track association.

mod matcher;
mod tracker;

pub use matcher::{match_threshold, match_tracks};
pub use tracker::{IouTracker, Track, TrackId, Tracker, TrackerConfig};
