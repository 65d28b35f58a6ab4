use anyhow::Result;

use crate::detect::{BoundingBox, Detection};

/// Identity assigned by a tracker. Persistent across `update` calls.
pub type TrackId = u32;

/// Tracker output for one frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Track {
    pub id: TrackId,
    pub bbox: BoundingBox,
}

/// Multi-object tracker for one camera.
///
/// Must be called for every processed frame, including frames without detections,
/// so that stale tracks age out.
pub trait Tracker: Send {
    fn update(&mut self, detections: &[Detection]) -> Result<Vec<Track>>;
}

#[derive(Clone, Debug)]
pub struct TrackerConfig {
    /// Calls a track survives without a matching detection.
    pub max_age: u32,
    /// Consecutive matches before a track is reported.
    pub min_hits: u32,
    /// Minimum IoU for associating a detection with a track.
    pub iou_threshold: f32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            max_age: 5,
            min_hits: 3,
            iou_threshold: 0.3,
        }
    }
}

#[derive(Clone, Debug)]
struct TrackState {
    id: TrackId,
    bbox: BoundingBox,
    velocity: (f32, f32),
    hits: u32,
    hit_streak: u32,
    time_since_update: u32,
}

impl TrackState {
    fn predicted(&self) -> BoundingBox {
        let (vx, vy) = self.velocity;
        BoundingBox::new(
            self.bbox.x1 + vx,
            self.bbox.y1 + vy,
            self.bbox.x2 + vx,
            self.bbox.y2 + vy,
        )
    }

    fn correct(&mut self, bbox: BoundingBox) {
        let steps = (self.time_since_update + 1) as f32;
        let cx_prev = (self.bbox.x1 + self.bbox.x2) / 2.0;
        let cy_prev = (self.bbox.y1 + self.bbox.y2) / 2.0;
        let cx = (bbox.x1 + bbox.x2) / 2.0;
        let cy = (bbox.y1 + bbox.y2) / 2.0;
        self.velocity = ((cx - cx_prev) / steps, (cy - cy_prev) / steps);
        self.bbox = bbox;
        self.hits += 1;
        self.hit_streak += 1;
        self.time_since_update = 0;
    }
}

/// SORT-style tracker with greedy IoU association and constant-velocity prediction.
pub struct IouTracker {
    config: TrackerConfig,
    tracks: Vec<TrackState>,
    next_id: TrackId,
    frame_count: u64,
}

impl IouTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            tracks: Vec::new(),
            next_id: 1,
            frame_count: 0,
        }
    }

    /// Number of live (reported or pending) tracks.
    pub fn live_tracks(&self) -> usize {
        self.tracks.len()
    }

    fn associate(&self, detections: &[Detection]) -> (Vec<(usize, usize)>, Vec<usize>) {
        let predicted: Vec<BoundingBox> = self.tracks.iter().map(TrackState::predicted).collect();
        let mut pairs = Vec::new();
        for (t, pred) in predicted.iter().enumerate() {
            for (d, det) in detections.iter().enumerate() {
                let iou = pred.iou(&det.bbox);
                if iou >= self.config.iou_threshold {
                    pairs.push((iou, t, d));
                }
            }
        }
        pairs.sort_by(|a, b| b.0.total_cmp(&a.0));

        let mut track_used = vec![false; self.tracks.len()];
        let mut det_used = vec![false; detections.len()];
        let mut matches = Vec::new();
        for (_, t, d) in pairs {
            if track_used[t] || det_used[d] {
                continue;
            }
            track_used[t] = true;
            det_used[d] = true;
            matches.push((t, d));
        }
        let unmatched = (0..detections.len()).filter(|d| !det_used[*d]).collect();
        (matches, unmatched)
    }
}

impl Default for IouTracker {
    fn default() -> Self {
        Self::new(TrackerConfig::default())
    }
}

impl Tracker for IouTracker {
    fn update(&mut self, detections: &[Detection]) -> Result<Vec<Track>> {
        self.frame_count += 1;
        let (matches, unmatched) = self.associate(detections);

        let mut matched = vec![false; self.tracks.len()];
        for (t, d) in matches {
            self.tracks[t].correct(detections[d].bbox);
            matched[t] = true;
        }
        for (t, track) in self.tracks.iter_mut().enumerate() {
            if !matched[t] {
                track.bbox = track.predicted();
                track.time_since_update += 1;
                track.hit_streak = 0;
            }
        }
        for d in unmatched {
            self.tracks.push(TrackState {
                id: self.next_id,
                bbox: detections[d].bbox,
                velocity: (0.0, 0.0),
                hits: 1,
                hit_streak: 1,
                time_since_update: 0,
            });
            self.next_id += 1;
        }

        let max_age = self.config.max_age;
        self.tracks.retain(|t| t.time_since_update <= max_age);

        let warming_up = self.frame_count <= self.config.min_hits as u64;
        Ok(self
            .tracks
            .iter()
            .filter(|t| t.time_since_update == 0)
            .filter(|t| warming_up || t.hit_streak >= self.config.min_hits)
            .map(|t| Track {
                id: t.id,
                bbox: t.bbox,
            })
            .collect())
    }
}
