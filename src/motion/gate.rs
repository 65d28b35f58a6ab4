use chrono::{Duration, NaiveDateTime};

use crate::frame::{Frame, FrameBatch};
use crate::motion::phash::PerceptualHash;

/// Decides which frames are worth caching.
///
/// Each ROI crop is hashed and compared with the ROI's reference hash. A
/// distance above `threshold` in any ROI opens a batch; every frame within
/// `linger` of the last change is appended without hashing. The first frame
/// past the linger closes the batch and the reference hashes are taken from
/// the batch's last frame. Timing follows frame timestamps, not the wall clock.
pub struct MotionGate {
    threshold: u32,
    linger: Duration,
    reference: Vec<PerceptualHash>,
    last_change: Option<NaiveDateTime>,
    batch: FrameBatch,
}

impl MotionGate {
    pub fn new(threshold: u32, linger_secs: f64) -> Self {
        Self {
            threshold,
            linger: Duration::milliseconds((linger_secs * 1000.0).round() as i64),
            reference: Vec::new(),
            last_change: None,
            batch: FrameBatch::new(),
        }
    }

    /// Whether a batch is currently being collected.
    pub fn is_open(&self) -> bool {
        !self.batch.is_empty()
    }

    pub fn reference(&self) -> &[PerceptualHash] {
        &self.reference
    }

    /// Feed one frame. `roi_hashes` produces the per-ROI hashes of a frame and
    /// is only called when the gate needs them.
    ///
    /// Returns a completed batch when this frame closed one.
    pub fn observe<F>(&mut self, frame: Frame, roi_hashes: F) -> Option<FrameBatch>
    where
        F: Fn(&Frame) -> Vec<PerceptualHash>,
    {
        if let Some(last) = self.last_change {
            if frame.captured_at - last < self.linger {
                self.batch.push(frame);
                return None;
            }
        }

        let closed = self.close(&roi_hashes);

        let hashes = roi_hashes(&frame);
        let changed = hashes.iter().enumerate().any(|(roi, hash)| {
            let reference = self.reference.get(roi).copied().unwrap_or_default();
            hash.distance(&reference) > self.threshold
        });
        if changed {
            log::debug!("motion detected at frame {}, opening batch", frame.seq);
            self.last_change = Some(frame.captured_at);
            self.batch.push(frame);
        }
        closed
    }

    /// Emit the open batch, if any, at end of stream.
    pub fn flush<F>(&mut self, roi_hashes: F) -> Option<FrameBatch>
    where
        F: Fn(&Frame) -> Vec<PerceptualHash>,
    {
        self.close(&roi_hashes)
    }

    fn close<F>(&mut self, roi_hashes: &F) -> Option<FrameBatch>
    where
        F: Fn(&Frame) -> Vec<PerceptualHash>,
    {
        let last = self.batch.last()?;
        self.reference = roi_hashes(last);
        let batch = std::mem::take(&mut self.batch);
        if let Some((first, last)) = batch.seq_range() {
            log::debug!(
                "closing batch of {} frames ({}..={})",
                batch.len(),
                first,
                last
            );
        }
        Some(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use image::RgbImage;

    /// Frames carry their "scene" in the top-left pixel; the hasher maps it
    /// straight to a hash so tests control distances exactly.
    fn frame(seq: u64, millis: i64, scene: u8) -> Frame {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap();
        let mut image = RgbImage::new(2, 2);
        image.put_pixel(0, 0, image::Rgb([scene, 0, 0]));
        Frame::new(seq, start + Duration::milliseconds(millis), image)
    }

    fn scene_hash(frame: &Frame) -> Vec<PerceptualHash> {
        let scene = frame.image.get_pixel(0, 0)[0];
        vec![PerceptualHash(if scene == 0 { 0 } else { (1u64 << scene) - 1 })]
    }

    #[test]
    fn static_scene_never_opens() {
        let mut gate = MotionGate::new(2, 2.5);
        for i in 0..20 {
            assert!(gate.observe(frame(i, i as i64 * 100, 0), scene_hash).is_none());
        }
        assert!(!gate.is_open());
        assert!(gate.flush(scene_hash).is_none());
    }

    #[test]
    fn small_changes_stay_below_threshold() {
        let mut gate = MotionGate::new(2, 2.5);
        // scene 2 hashes two bits away from the black reference
        assert!(gate.observe(frame(0, 0, 2), scene_hash).is_none());
        assert!(!gate.is_open());
    }

    #[test]
    fn batch_lingers_after_last_change() {
        let mut gate = MotionGate::new(2, 2.5);
        assert!(gate.observe(frame(0, 0, 10), scene_hash).is_none());
        assert!(gate.is_open());

        // Quiet frames inside the linger are appended.
        for i in 1..25 {
            assert!(gate.observe(frame(i, i as i64 * 100, 10), scene_hash).is_none());
        }
        // 2.5 s after the change the batch closes; the closing frame matches
        // the new reference and is not cached.
        let batch = gate.observe(frame(25, 2500, 10), scene_hash).unwrap();
        assert_eq!(batch.len(), 25);
        assert_eq!(batch.seq_range(), Some((0, 24)));
        assert!(!gate.is_open());
        assert_eq!(gate.reference(), &[PerceptualHash((1 << 10) - 1)]);
    }

    #[test]
    fn change_on_closing_frame_starts_new_batch() {
        let mut gate = MotionGate::new(2, 1.0);
        gate.observe(frame(0, 0, 10), scene_hash);
        gate.observe(frame(1, 500, 10), scene_hash);
        let first = gate.observe(frame(2, 1000, 30), scene_hash).unwrap();
        assert_eq!(first.len(), 2);
        assert!(gate.is_open());
        let second = gate.flush(scene_hash).unwrap();
        assert_eq!(second.seq_range(), Some((2, 2)));
    }

    #[test]
    fn flush_without_batch_is_empty() {
        let mut gate = MotionGate::new(2, 2.5);
        assert!(gate.flush(scene_hash).is_none());
    }
}
