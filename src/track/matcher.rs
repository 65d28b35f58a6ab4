use crate::detect::Detection;
use crate::track::tracker::{Track, TrackId};

/// Squared corner-distance limit for associating a track with a detection.
///
/// Trackers do not report which detection produced a track, so the limit scales
/// with the frame size: `((height + width) / 2 * 0.02)^2`.
pub fn match_threshold(frame_width: u32, frame_height: u32) -> f32 {
    let side = (frame_height as f32 + frame_width as f32) * 0.5 * 0.02;
    side * side
}

/// Assign tracker identities back to detections.
///
/// Each track claims its nearest detection (first index wins distance ties) if the
/// squared corner distance is below [`match_threshold`]. When several tracks claim
/// the same detection, the closest one keeps it. Detections nobody claims stay `None`.
pub fn match_tracks(
    detections: &[Detection],
    tracks: &[Track],
    frame_width: u32,
    frame_height: u32,
) -> Vec<Option<TrackId>> {
    let mut ids: Vec<Option<TrackId>> = vec![None; detections.len()];
    if detections.is_empty() {
        return ids;
    }
    let limit = match_threshold(frame_width, frame_height);
    let mut best: Vec<f32> = vec![f32::INFINITY; detections.len()];

    for track in tracks {
        let nearest = detections
            .iter()
            .enumerate()
            .map(|(i, det)| (i, det.bbox.corner_distance_sq(&track.bbox)))
            .fold(None, |acc: Option<(usize, f32)>, (i, dist)| match acc {
                Some((_, best_dist)) if best_dist <= dist => acc,
                _ => Some((i, dist)),
            });
        let Some((index, dist)) = nearest else {
            continue;
        };
        if dist < limit && dist < best[index] {
            best[index] = dist;
            ids[index] = Some(track.id);
        }
    }
    ids
}
