//! Capture pipeline: motion gating, detection, tracking and crop emission.
//!
//! Two threads share a `FrameCache` and a keep-running flag:
//!
//! - the capture stage reads frames, runs the `MotionGate` over the masked and
//!   warped ROI images, and queues closed batches (dropping them when the
//!   cache is full, never blocking);
//! - the detection stage pops batches, thins them with a `SkipPattern` sized
//!   to the current backlog, runs the detector once and the tracker on every
//!   kept frame, and writes one crop + metadata sidecar per ROI.
//!
//! At end of stream the capture stage flushes the gate and the detection stage
//! drains the cache before exiting. Clearing the flag stops both promptly.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use image::RgbImage;

use crate::artifact::{ArtifactName, ArtifactWriter, FrameMetadata, RoiObject};
use crate::config::{MotionSettings, PipelineConfig};
use crate::detect::{backend_from_settings, is_vehicle, Detection, DetectorBackend, StubBackend};
use crate::frame::{Frame, FrameBatch, FrameCache};
use crate::geometry::{RoiMask, Warp};
use crate::ingest::{source_from_settings, FrameSource};
use crate::motion::{MotionGate, PerceptualHash};
use crate::skip::SkipPattern;
use crate::track::{match_tracks, IouTracker, Track, Tracker, TrackerConfig};

/// How long the detection stage sleeps when the cache is empty.
const IDLE_POLL: Duration = Duration::from_millis(20);

/// Counters reported when the pipeline stops.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CaptureStats {
    pub frames_read: u64,
    pub batches_queued: u64,
    pub batches_dropped: u64,
    pub frames_processed: u64,
    pub frames_skipped: u64,
    pub artifacts_written: u64,
}

#[derive(Default)]
struct Counters {
    frames_read: AtomicU64,
    batches_queued: AtomicU64,
    frames_processed: AtomicU64,
    frames_skipped: AtomicU64,
    artifacts_written: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self, cache: &FrameCache) -> CaptureStats {
        CaptureStats {
            frames_read: self.frames_read.load(Ordering::Relaxed),
            batches_queued: self.batches_queued.load(Ordering::Relaxed),
            batches_dropped: cache.dropped(),
            frames_processed: self.frames_processed.load(Ordering::Relaxed),
            frames_skipped: self.frames_skipped.load(Ordering::Relaxed),
            artifacts_written: self.artifacts_written.load(Ordering::Relaxed),
        }
    }
}

/// ROI mask plus per-ROI warp, shared by both stages.
struct RoiGeometry {
    mask: RoiMask,
    warp: Warp,
}

impl RoiGeometry {
    /// Masked, warped image of every ROI, in ROI id order.
    fn roi_images(&self, image: &RgbImage) -> Vec<(u32, RgbImage)> {
        self.mask
            .apply(image)
            .into_iter()
            .map(|(roi_id, crop)| (roi_id, self.warp.apply(&crop, roi_id)))
            .collect()
    }

    fn roi_hashes(&self, frame: &Frame) -> Vec<PerceptualHash> {
        self.roi_images(&frame.image)
            .iter()
            .map(|(_, image)| PerceptualHash::of(image))
            .collect()
    }
}

/// A configured, not yet running capture pipeline for one stream.
pub struct CaptureProcessor {
    stream: String,
    source: Box<dyn FrameSource>,
    geometry: RoiGeometry,
    gate: MotionGate,
    cache: Arc<FrameCache>,
    detector: Box<dyn DetectorBackend>,
    tracker: Box<dyn Tracker>,
    writer: ArtifactWriter,
}

impl CaptureProcessor {
    /// Pipeline with no ROIs, the stub detector and a default tracker.
    pub fn new(
        stream: impl Into<String>,
        source: Box<dyn FrameSource>,
        writer: ArtifactWriter,
        motion: &MotionSettings,
    ) -> Self {
        Self {
            stream: stream.into(),
            source,
            geometry: RoiGeometry {
                mask: RoiMask::default(),
                warp: Warp::identity(),
            },
            gate: MotionGate::new(motion.threshold, motion.linger_secs),
            cache: Arc::new(FrameCache::with_linger(motion.linger_secs)),
            detector: Box::new(StubBackend::new()),
            tracker: Box::new(IouTracker::default()),
            writer,
        }
    }

    /// Build every collaborator from configuration. Missing geometry files
    /// are not fatal: see `RoiMask::load_or_empty` and `Warp::load_or_identity`.
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        let source = source_from_settings(&config.stream)?;
        let writer = ArtifactWriter::new(&config.output.dir, config.output.jpeg_quality)?;
        let mask = RoiMask::load_or_empty(&config.geometry.mask_path);
        let warp = Warp::load_or_identity(&config.geometry.warp_path);
        let detector = backend_from_settings(&config.detector)?;
        let tracker = IouTracker::new(TrackerConfig {
            max_age: config.tracker.max_age,
            min_hits: config.tracker.min_hits,
            iou_threshold: config.tracker.iou_threshold,
        });
        Ok(
            Self::new(config.stream.name.clone(), source, writer, &config.motion)
                .with_geometry(mask, warp)
                .with_detector(detector)
                .with_tracker(Box::new(tracker)),
        )
    }

    pub fn with_geometry(mut self, mask: RoiMask, warp: Warp) -> Self {
        self.geometry = RoiGeometry { mask, warp };
        self
    }

    pub fn with_detector(mut self, detector: Box<dyn DetectorBackend>) -> Self {
        self.detector = detector;
        self
    }

    pub fn with_tracker(mut self, tracker: Box<dyn Tracker>) -> Self {
        self.tracker = tracker;
        self
    }

    /// Replace the batch cache, e.g. to change its capacity.
    pub fn with_cache(mut self, cache: FrameCache) -> Self {
        self.cache = Arc::new(cache);
        self
    }

    pub fn roi_count(&self) -> usize {
        self.geometry.mask.len()
    }

    /// Start both stages.
    pub fn spawn(self) -> Result<CaptureHandle> {
        let Self {
            stream,
            source,
            geometry,
            gate,
            cache,
            mut detector,
            tracker,
            writer,
        } = self;

        if geometry.mask.is_empty() {
            log::warn!("stream {} has no ROIs; no frames will be processed", stream);
        }
        if let Err(e) = detector.warm_up() {
            log::warn!("detector {} warm-up failed: {}", detector.name(), e);
        }
        log::info!(
            "capture pipeline for {}: {} ROIs, detector {}, cache capacity {}",
            stream,
            geometry.mask.len(),
            detector.name(),
            cache.capacity()
        );

        let geometry = Arc::new(geometry);
        let keep_running = Arc::new(AtomicBool::new(true));
        let capture_done = Arc::new(AtomicBool::new(false));
        let counters = Arc::new(Counters::default());

        let capture = {
            let stage = CaptureStage {
                source,
                gate,
                geometry: geometry.clone(),
                cache: cache.clone(),
                keep_running: keep_running.clone(),
                counters: counters.clone(),
            };
            let capture_done = capture_done.clone();
            std::thread::Builder::new()
                .name(format!("capture-{}", stream))
                .spawn(move || {
                    let result = stage.run();
                    capture_done.store(true, Ordering::SeqCst);
                    result
                })?
        };

        let detection = {
            let stage = DetectionStage {
                stream: stream.clone(),
                detector,
                tracker,
                geometry,
                writer,
                cache: cache.clone(),
                keep_running: keep_running.clone(),
                capture_done,
                counters: counters.clone(),
            };
            std::thread::Builder::new()
                .name(format!("detect-{}", stream))
                .spawn(move || stage.run())?
        };

        Ok(CaptureHandle {
            keep_running,
            cache,
            counters,
            capture: Some(capture),
            detection: Some(detection),
        })
    }
}

/// Running pipeline.
pub struct CaptureHandle {
    keep_running: Arc<AtomicBool>,
    cache: Arc<FrameCache>,
    counters: Arc<Counters>,
    capture: Option<JoinHandle<Result<()>>>,
    detection: Option<JoinHandle<Result<()>>>,
}

impl CaptureHandle {
    /// Ask both stages to exit after their current iteration.
    pub fn stop(&self) {
        self.keep_running.store(false, Ordering::SeqCst);
    }

    /// The shared keep-running flag, for signal handlers.
    pub fn keep_running(&self) -> Arc<AtomicBool> {
        self.keep_running.clone()
    }

    pub fn is_finished(&self) -> bool {
        [&self.capture, &self.detection]
            .iter()
            .all(|join| join.as_ref().map_or(true, |j| j.is_finished()))
    }

    pub fn stats(&self) -> CaptureStats {
        self.counters.snapshot(&self.cache)
    }

    /// Wait for both stages. Returns the first stage error, if any.
    pub fn join(mut self) -> Result<CaptureStats> {
        let capture = join_stage(self.capture.take(), "capture");
        let detection = join_stage(self.detection.take(), "detection");
        capture?;
        detection?;
        let stats = self.stats();
        log::info!(
            "capture pipeline stopped: {} frames read, {} batches queued ({} dropped), \
             {} frames processed ({} skipped), {} artifacts written",
            stats.frames_read,
            stats.batches_queued,
            stats.batches_dropped,
            stats.frames_processed,
            stats.frames_skipped,
            stats.artifacts_written
        );
        Ok(stats)
    }
}

fn join_stage(join: Option<JoinHandle<Result<()>>>, name: &str) -> Result<()> {
    match join {
        Some(join) => join
            .join()
            .map_err(|_| anyhow!("{} stage thread panicked", name))?,
        None => Ok(()),
    }
}

struct CaptureStage {
    source: Box<dyn FrameSource>,
    gate: MotionGate,
    geometry: Arc<RoiGeometry>,
    cache: Arc<FrameCache>,
    keep_running: Arc<AtomicBool>,
    counters: Arc<Counters>,
}

impl CaptureStage {
    fn run(mut self) -> Result<()> {
        let geometry = self.geometry.clone();
        let hashes = |frame: &Frame| geometry.roi_hashes(frame);

        while self.keep_running.load(Ordering::SeqCst) {
            let frame = match self.source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    log::info!("end of stream {}", self.source.name());
                    break;
                }
                Err(e) => {
                    log::warn!("frame source {}: {}", self.source.name(), e);
                    continue;
                }
            };
            Counters::bump(&self.counters.frames_read);
            if let Some(batch) = self.gate.observe(frame, &hashes) {
                self.enqueue(batch);
            }
        }

        if let Some(batch) = self.gate.flush(&hashes) {
            self.enqueue(batch);
        }
        Ok(())
    }

    fn enqueue(&self, batch: FrameBatch) {
        let frames = batch.len();
        if self.cache.push(batch) {
            Counters::bump(&self.counters.batches_queued);
            log::debug!(
                "queued batch of {} frames ({} pending)",
                frames,
                self.cache.len()
            );
        }
    }
}

struct DetectionStage {
    stream: String,
    detector: Box<dyn DetectorBackend>,
    tracker: Box<dyn Tracker>,
    geometry: Arc<RoiGeometry>,
    writer: ArtifactWriter,
    cache: Arc<FrameCache>,
    keep_running: Arc<AtomicBool>,
    capture_done: Arc<AtomicBool>,
    counters: Arc<Counters>,
}

impl DetectionStage {
    fn run(mut self) -> Result<()> {
        while self.keep_running.load(Ordering::SeqCst) {
            let Some(batch) = self.cache.pop() else {
                if self.capture_done.load(Ordering::SeqCst) && self.cache.is_empty() {
                    break;
                }
                std::thread::sleep(IDLE_POLL);
                continue;
            };

            let backlog = self.cache.len();
            let pattern = SkipPattern::for_backlog(backlog);
            log::debug!(
                "processing batch of {} frames, backlog {}, skipping {}/{}",
                batch.len(),
                backlog,
                pattern.skipped(),
                pattern.len()
            );
            let started = Instant::now();
            let mut processed = 0usize;
            for (index, frame) in batch.frames.iter().enumerate() {
                if !self.keep_running.load(Ordering::SeqCst) {
                    return Ok(());
                }
                if pattern.skips(index) {
                    Counters::bump(&self.counters.frames_skipped);
                    continue;
                }
                self.process_frame(frame);
                processed += 1;
            }
            let elapsed = started.elapsed().as_secs_f64();
            log::info!(
                "batch done: {}/{} frames in {:.2}s ({:.1} fps), {} skipped, backlog {}",
                processed,
                batch.len(),
                elapsed,
                processed as f64 / elapsed.max(f64::EPSILON),
                batch.len() - processed,
                self.cache.len()
            );
        }
        Ok(())
    }

    fn detect(&mut self, frame: &Frame) -> Vec<Detection> {
        match self.detector.detect(&frame.image) {
            Ok(detections) => detections.into_iter().filter(is_vehicle).collect(),
            Err(e) => {
                log::warn!(
                    "detector {} failed on frame {}: {}",
                    self.detector.name(),
                    frame.seq,
                    e
                );
                Vec::new()
            }
        }
    }

    fn track(&mut self, frame: &Frame, detections: &[Detection]) -> Vec<Track> {
        match self.tracker.update(detections) {
            Ok(tracks) => tracks,
            Err(e) => {
                log::warn!("tracker failed on frame {}: {}", frame.seq, e);
                Vec::new()
            }
        }
    }

    fn process_frame(&mut self, frame: &Frame) {
        let started = Instant::now();
        let detections = self.detect(frame);
        let tracks = self.track(frame, &detections);
        let (width, height) = frame.dimensions();
        let track_ids = match_tracks(&detections, &tracks, width, height);

        let geometry = self.geometry.clone();
        for roi in geometry.mask.rois() {
            let Some(crop) = geometry.mask.crop(&frame.image, roi.id) else {
                continue;
            };
            let crop = geometry.warp.apply(&crop, roi.id);
            let objects = geometry
                .mask
                .roi_detections(&detections, roi.id, (width, height))
                .into_iter()
                .map(|(index, iod)| RoiObject {
                    detection: detections[index].clone(),
                    iod,
                    track_id: track_ids[index],
                })
                .collect();
            let metadata = FrameMetadata {
                roi_id: roi.id,
                objects,
                roi_offset: [roi.left, roi.top],
                roi_dims: [crop.width(), crop.height()],
            };
            let name = ArtifactName {
                stream: self.stream.clone(),
                timestamp: frame.captured_at,
                roi_id: roi.id,
                frame_no: frame.seq,
            };
            match self.writer.write(&name, &crop, &metadata) {
                Ok(_) => Counters::bump(&self.counters.artifacts_written),
                Err(e) => log::error!("failed to write {}: {}", name.base_name(), e),
            }
        }

        Counters::bump(&self.counters.frames_processed);
        log::debug!(
            "frame {}: {} detections, {} tracks, {:?}",
            frame.seq,
            detections.len(),
            tracks.len(),
            started.elapsed()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;
    use crate::ingest::SyntheticSource;
    use chrono::NaiveDate;
    use image::{GrayImage, Luma};

    fn motion() -> MotionSettings {
        MotionSettings {
            threshold: 2,
            linger_secs: 2.5,
        }
    }

    fn source(frames: u64) -> Box<dyn FrameSource> {
        let start = NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        Box::new(SyntheticSource::new("cam0", 10.0, start).with_frame_limit(frames))
    }

    /// One ROI covering the whole synthetic frame.
    fn full_mask() -> RoiMask {
        RoiMask::from_luma(&GrayImage::from_pixel(320, 240, Luma([255])))
    }

    #[test]
    fn no_rois_means_no_batches() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ArtifactWriter::new(dir.path(), 90).unwrap();
        let handle = CaptureProcessor::new("cam0", source(60), writer, &motion())
            .spawn()
            .unwrap();
        let stats = handle.join().unwrap();
        assert_eq!(stats.frames_read, 60);
        assert_eq!(stats.batches_queued, 0);
        assert_eq!(stats.artifacts_written, 0);
    }

    #[test]
    fn motion_produces_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ArtifactWriter::new(dir.path(), 90).unwrap();
        let car = Detection::new(BoundingBox::new(40.0, 90.0, 120.0, 150.0), 0.9, "car");
        let person = Detection::new(BoundingBox::new(0.0, 0.0, 10.0, 10.0), 0.9, "person");
        let detector = StubBackend::scripted(vec![Some(vec![car, person]), Some(Vec::new())]);

        let processor = CaptureProcessor::new("cam0", source(80), writer, &motion())
            .with_geometry(full_mask(), Warp::identity())
            .with_detector(Box::new(detector));
        assert_eq!(processor.roi_count(), 1);
        let stats = processor.spawn().unwrap().join().unwrap();

        assert_eq!(stats.frames_read, 80);
        assert!(stats.batches_queued >= 1);
        assert_eq!(stats.batches_dropped, 0);
        assert!(stats.frames_processed > 0);
        assert_eq!(stats.artifacts_written, stats.frames_processed);

        let mut sidecars: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.ends_with(".json"))
            .collect();
        sidecars.sort();
        assert_eq!(sidecars.len() as u64, stats.artifacts_written);

        // Only the scripted first call returns objects; persons are filtered.
        let with_objects: Vec<FrameMetadata> = sidecars
            .iter()
            .map(|name| {
                let raw = std::fs::read(dir.path().join(name)).unwrap();
                serde_json::from_slice::<FrameMetadata>(&raw).unwrap()
            })
            .filter(|meta| meta.has_detections())
            .collect();
        assert_eq!(with_objects.len(), 1);
        assert_eq!(with_objects[0].objects.len(), 1);
        assert_eq!(with_objects[0].objects[0].detection.label, "car");
        assert_eq!(with_objects[0].roi_dims, [320, 240]);
    }

    struct FailingDetector;

    impl DetectorBackend for FailingDetector {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn detect(&mut self, _image: &RgbImage) -> Result<Vec<Detection>> {
            Err(anyhow!("inference failed"))
        }
    }

    struct FailingTracker;

    impl Tracker for FailingTracker {
        fn update(&mut self, _detections: &[Detection]) -> Result<Vec<Track>> {
            Err(anyhow!("tracker state lost"))
        }
    }

    fn written_metadata(dir: &std::path::Path) -> Vec<FrameMetadata> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .map(|path| serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap())
            .collect()
    }

    #[test]
    fn detector_errors_yield_empty_frames() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ArtifactWriter::new(dir.path(), 90).unwrap();
        let stats = CaptureProcessor::new("cam0", source(40), writer, &motion())
            .with_geometry(full_mask(), Warp::identity())
            .with_detector(Box::new(FailingDetector))
            .spawn()
            .unwrap()
            .join()
            .unwrap();

        assert!(stats.frames_processed > 0);
        assert_eq!(stats.artifacts_written, stats.frames_processed);
        let metadata = written_metadata(dir.path());
        assert_eq!(metadata.len() as u64, stats.artifacts_written);
        assert!(metadata.iter().all(|meta| !meta.has_detections()));
    }

    #[test]
    fn tracker_errors_leave_detections_untracked() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ArtifactWriter::new(dir.path(), 90).unwrap();
        let car = Detection::new(BoundingBox::new(40.0, 90.0, 120.0, 150.0), 0.9, "car");
        let stats = CaptureProcessor::new("cam0", source(40), writer, &motion())
            .with_geometry(full_mask(), Warp::identity())
            .with_detector(Box::new(StubBackend::scripted(vec![Some(vec![car])])))
            .with_tracker(Box::new(FailingTracker))
            .spawn()
            .unwrap()
            .join()
            .unwrap();

        assert!(stats.frames_processed > 0);
        let metadata = written_metadata(dir.path());
        assert_eq!(metadata.len() as u64, stats.artifacts_written);
        for meta in &metadata {
            assert_eq!(meta.objects.len(), 1);
            assert_eq!(meta.objects[0].detection.label, "car");
            assert_eq!(meta.objects[0].track_id, None);
        }
    }

    #[test]
    fn stop_ends_an_endless_stream() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ArtifactWriter::new(dir.path(), 90).unwrap();
        let start = NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        let endless = Box::new(SyntheticSource::new("cam0", 10.0, start));
        let handle = CaptureProcessor::new("cam0", endless, writer, &motion())
            .with_geometry(full_mask(), Warp::identity())
            .spawn()
            .unwrap();
        std::thread::sleep(Duration::from_millis(100));
        handle.stop();
        let stats = handle.join().unwrap();
        assert!(stats.frames_read > 0);
    }
}
