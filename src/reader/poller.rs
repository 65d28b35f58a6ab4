use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::artifact::{ArtifactName, FrameMetadata, METADATA_EXTENSION};
use crate::config::ReaderSettings;
use crate::plate::{
    obfuscate_plate, DetectedPlate, FrameObservation, OcrReading, RoiPlateAnalyser,
};
use crate::reader::ocr::PlateOcr;

/// Salted SHA-256 of a plate text, hex encoded. Logged and persisted instead
/// of the plate itself unless `reveal_plate` is set.
pub fn plate_digest(salt: &str, plate_text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(plate_text.as_bytes());
    hex::encode(hasher.finalize())
}

/// One line of the events file.
#[derive(Debug, Serialize)]
struct PlateEvent<'a> {
    plate: String,
    unknown_vehicle: bool,
    track_id: Option<u32>,
    label: &'a str,
    roi_id: u32,
    timestamp: String,
    confidence: f32,
}

/// Polls the crop directory for one ROI, runs OCR and the plate analyser.
pub struct PlateReader {
    settings: ReaderSettings,
    ocr: Box<dyn PlateOcr>,
    analyser: RoiPlateAnalyser,
    last_batch: usize,
    consumed: usize,
}

impl PlateReader {
    pub fn new(settings: ReaderSettings, ocr: Box<dyn PlateOcr>) -> Self {
        let analyser = RoiPlateAnalyser::new(settings.roi_id);
        Self {
            settings,
            ocr,
            analyser,
            last_batch: 0,
            consumed: 0,
        }
    }

    pub fn settings(&self) -> &ReaderSettings {
        &self.settings
    }

    /// Sidecars handled by the last `poll_once`.
    pub fn last_batch_len(&self) -> usize {
        self.last_batch
    }

    /// True when the last poll filled its batch and consumed sidecars, so
    /// more may be waiting.
    pub fn should_poll_again(&self) -> bool {
        self.consumed > 0 && self.last_batch >= self.settings.batch_limit
    }

    /// Process up to `batch_limit` completed artifacts and return the plates
    /// confirmed by this batch.
    pub fn poll_once(&mut self) -> Result<Vec<DetectedPlate>> {
        let started = Instant::now();
        let pending = self.pending_sidecars()?;
        self.last_batch = pending.len();
        self.consumed = 0;
        if pending.is_empty() {
            return Ok(Vec::new());
        }

        let mut observations = Vec::new();
        for (name, sidecar) in pending {
            let image = self.settings.poll_dir.join(name.image_file());
            match load_metadata(&sidecar) {
                Ok(metadata) => {
                    if metadata.has_detections() {
                        let reading = self.read_plate(&image);
                        observations.push(FrameObservation {
                            stream: name.stream.clone(),
                            timestamp: name.timestamp,
                            frame_no: name.frame_no,
                            roi_id: name.roi_id,
                            metadata,
                            reading,
                        });
                    }
                }
                Err(e) => log::warn!("skipping {}: {:#}", sidecar.display(), e),
            }
            remove_artifact(&image);
            if remove_artifact(&sidecar) {
                self.consumed += 1;
            }
        }

        let plates = if observations.is_empty() {
            Vec::new()
        } else {
            self.analyser.analyse(&observations)
        };
        for plate in &plates {
            if let Err(e) = self.report(plate) {
                log::warn!("failed to report plate on ROI {}: {:#}", plate.roi_id, e);
                self.analyser.forget(&plate.plate_text);
            }
        }
        log::info!(
            "ROI {}: {} artifacts, {} with vehicles, {} plates in {:.2}s",
            self.settings.roi_id,
            self.last_batch,
            observations.len(),
            plates.len(),
            started.elapsed().as_secs_f64()
        );
        Ok(plates)
    }

    /// Poll until `keep_running` is cleared. Sleeps `poll_interval_ms` unless
    /// a full batch was just consumed.
    pub fn run(&mut self, keep_running: &AtomicBool) -> Result<()> {
        let interval = Duration::from_millis(self.settings.poll_interval_ms);
        log::info!(
            "plate reader for ROI {} polling {} with {}",
            self.settings.roi_id,
            self.settings.poll_dir.display(),
            self.ocr.name()
        );
        while keep_running.load(Ordering::SeqCst) {
            match self.poll_once() {
                Ok(_) if self.should_poll_again() => continue,
                Ok(_) => {}
                Err(e) => log::error!(
                    "poll of {} failed: {:#}",
                    self.settings.poll_dir.display(),
                    e
                ),
            }
            std::thread::sleep(interval);
        }
        Ok(())
    }

    /// Completed sidecars for this ROI, name order, at most `batch_limit`.
    fn pending_sidecars(&self) -> Result<Vec<(ArtifactName, PathBuf)>> {
        let dir = &self.settings.poll_dir;
        let mut names: Vec<String> = fs::read_dir(dir)
            .with_context(|| format!("failed to read {}", dir.display()))?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| !name.starts_with('.'))
            .filter(|name| {
                Path::new(name).extension().and_then(|e| e.to_str()) == Some(METADATA_EXTENSION)
            })
            .collect();
        names.sort();

        Ok(names
            .into_iter()
            .filter_map(|file| {
                let name = ArtifactName::from_metadata_file(&file)?;
                (name.roi_id == self.settings.roi_id).then(|| (name, dir.join(&file)))
            })
            .take(self.settings.batch_limit)
            .collect())
    }

    fn read_plate(&mut self, image: &Path) -> OcrReading {
        match self.ocr.read(image) {
            Ok(reading) => {
                if !reading.results.is_empty() {
                    let texts: Vec<String> = reading
                        .results
                        .iter()
                        .map(|r| obfuscate_plate(&r.plate))
                        .collect();
                    log::debug!("OCR {}: {}", image.display(), texts.join(", "));
                }
                reading
            }
            Err(e) => {
                log::warn!("OCR failed on {}: {:#}", image.display(), e);
                OcrReading::default()
            }
        }
    }

    fn report(&self, plate: &DetectedPlate) -> Result<()> {
        let shown = if self.settings.reveal_plate || plate.is_unknown() {
            plate.plate_text.clone()
        } else {
            plate_digest(&self.settings.hash_salt, &plate.plate_text)
        };
        let lag = chrono::Local::now().naive_local() - plate.timestamp;
        log::info!(
            "plate {} ROI {} track {:?} label {:?} at {} (lag {:.1}s)",
            shown,
            plate.roi_id,
            plate.track_id,
            plate.label,
            plate.timestamp,
            lag.num_milliseconds() as f64 / 1000.0
        );

        let Some(path) = &self.settings.events_path else {
            return Ok(());
        };
        let event = PlateEvent {
            plate: shown,
            unknown_vehicle: plate.is_unknown(),
            track_id: plate.track_id,
            label: &plate.label,
            roi_id: plate.roi_id,
            timestamp: plate.timestamp.format("%Y-%m-%dT%H:%M:%S%.3f").to_string(),
            confidence: plate.confidence,
        };
        let mut line = serde_json::to_string(&event)?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open events file {}", path.display()))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("failed to append to {}", path.display()))?;
        Ok(())
    }
}

fn load_metadata(path: &Path) -> Result<FrameMetadata> {
    let raw = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_slice(&raw).context("malformed metadata")
}

/// False when the file is still there afterwards.
fn remove_artifact(path: &Path) -> bool {
    match fs::remove_file(path) {
        Ok(()) => true,
        Err(e) if e.kind() == ErrorKind::NotFound => true,
        Err(e) => {
            log::warn!("failed to remove {}: {}", path.display(), e);
            false
        }
    }
}
