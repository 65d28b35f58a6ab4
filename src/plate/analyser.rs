use std::collections::HashMap;

use chrono::NaiveDateTime;

use crate::artifact::{FrameMetadata, RoiObject};
use crate::plate::block::Block;
use crate::plate::normalize::{deduplicate_by_edit_distance, valid_plates, within_one_edit};
use crate::plate::reading::{
    is_unknown_vehicle, unknown_vehicle_id, DetectedPlate, FrameObservation, PlateRead,
    UNKNOWN_VEHICLE_POSTFIX,
};

/// Plate reads narrower than this (top edge, pixels) are ignored.
pub const MIN_PLATE_WIDTH_PX: f32 = 60.0;
/// Per-frame records kept as clustering context.
pub const BLOCK_SIZE: usize = 150;
/// Frame-time span between windowed scans.
pub const SCAN_PERIOD_SECS: f64 = 5.0;
/// Extra look-back added to each scan window.
pub const SCAN_EXTRA_SECS: f64 = 5.0;
/// A reported plate may be reported again once it is this old.
pub const REDETECTION_DELAY_SECS: f64 = 60.0;
/// Minimum detection/ROI overlap for a detection to vouch for a plate.
pub const MIN_IOD: f32 = 0.15;
/// Observations within one scan window needed to report a plate.
pub const MIN_PLATE_FREQUENCY: usize = 8;
/// Unknown vehicles must be wider than this share of the ROI.
pub const UNKNOWN_MIN_WIDTH_SHARE: f32 = 0.25;

/// Best guess from one frame: a plate text or an unknown-vehicle id.
#[derive(Clone, Debug, PartialEq)]
pub struct PlateRecord {
    pub plate_text: String,
    pub confidence: f32,
    pub timestamp: NaiveDateTime,
    pub roi_id: u32,
    pub track_id: Option<u32>,
    pub label: String,
}

impl PlateRecord {
    fn into_detected(self) -> DetectedPlate {
        DetectedPlate {
            plate_text: self.plate_text,
            track_id: self.track_id,
            label: self.label,
            timestamp: self.timestamp,
            roi_id: self.roi_id,
            confidence: self.confidence,
        }
    }
}

/// Records sharing one exact plate text within a scan window.
struct PlateGroup<'a> {
    representative: &'a PlateRecord,
    frequency: usize,
    track_ids: Vec<Option<u32>>,
    labels: Vec<&'a str>,
}

/// Turns per-frame OCR guesses for one ROI into confirmed plate detections.
///
/// One instance per ROI; not meant to be shared across threads.
pub struct RoiPlateAnalyser {
    roi_id: u32,
    block: Block<PlateRecord>,
    history: HashMap<String, DetectedPlate>,
}

impl RoiPlateAnalyser {
    pub fn new(roi_id: u32) -> Self {
        Self {
            roi_id,
            block: Block::new(BLOCK_SIZE),
            history: HashMap::new(),
        }
    }

    pub fn roi_id(&self) -> u32 {
        self.roi_id
    }

    /// Plate texts currently suppressed from re-reporting.
    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Drop a reported plate from the history so a later sighting reports
    /// it again.
    pub fn forget(&mut self, plate_text: &str) -> bool {
        self.history.remove(plate_text).is_some()
    }

    /// Analyse frames in capture order. Returns plates confirmed for the
    /// first time (or again after the re-detection delay).
    pub fn analyse(&mut self, frames: &[FrameObservation]) -> Vec<DetectedPlate> {
        let mut reported = Vec::new();
        let Some(first) = frames.first() else {
            return reported;
        };
        let mut scan_start = first.timestamp;
        let last_index = frames.len() - 1;

        for (index, frame) in frames.iter().enumerate() {
            let since_scan = seconds_between(frame.timestamp, scan_start);

            if let Some(record) = self.first_valid_plate(frame) {
                self.block.push(record);
            }

            if since_scan < SCAN_PERIOD_SECS && index != last_index {
                continue;
            }

            let window = since_scan + SCAN_EXTRA_SECS;
            let recent: Vec<&PlateRecord> = self
                .block
                .iter()
                .rev()
                .filter(|record| seconds_between(frame.timestamp, record.timestamp) <= window)
                .collect();
            scan_start = frame.timestamp;

            let prior: Vec<String> = self.history.keys().cloned().collect();
            let candidates = cluster_plates(&recent, &prior);
            log::debug!(
                "ROI {}: scanned {} records, {} candidates",
                self.roi_id,
                recent.len(),
                candidates.len()
            );

            for candidate in candidates {
                match self.history.get_mut(&candidate.plate_text) {
                    None => {
                        self.history
                            .insert(candidate.plate_text.clone(), candidate.clone());
                        reported.push(candidate);
                    }
                    Some(existing) => {
                        if candidate.timestamp > existing.timestamp {
                            *existing = candidate;
                        }
                    }
                }
            }

            let now = frame.timestamp;
            self.history
                .retain(|_, plate| seconds_between(now, plate.timestamp) <= REDETECTION_DELAY_SECS);
        }
        reported
    }

    /// Record for one frame: the longest valid plate of the first wide enough
    /// read, or else an unknown-vehicle record for the dominant detection.
    fn first_valid_plate(&self, frame: &FrameObservation) -> Option<PlateRecord> {
        let record = |text: String, confidence: f32, track_id: Option<u32>, label: String| {
            PlateRecord {
                plate_text: text,
                confidence,
                timestamp: frame.timestamp,
                roi_id: self.roi_id,
                track_id,
                label,
            }
        };

        for read in &frame.reading.results {
            if !read.width().is_some_and(|w| w > MIN_PLATE_WIDTH_PX) {
                continue;
            }
            let plates = valid_plates(&read.plate);
            if let Some(text) = plates.into_iter().next() {
                let (track_id, label) = match_detection(&frame.metadata, read)
                    .map(|(track, label)| (track, label.to_string()))
                    .unwrap_or((None, String::new()));
                return Some(record(text, read.confidence, track_id, label));
            }
        }

        let (track_id, label) = match_unknown_vehicle(&frame.metadata)?;
        let text = unknown_vehicle_id(label, track_id);
        if self.track_has_plate(track_id) || self.track_has_other_unknown(&text, track_id) {
            return None;
        }
        Some(record(text, 0.0, Some(track_id), label.to_string()))
    }

    fn track_has_plate(&self, track_id: u32) -> bool {
        self.block.iter().any(|record| {
            !is_unknown_vehicle(&record.plate_text) && record.track_id == Some(track_id)
        })
    }

    fn track_has_other_unknown(&self, text: &str, track_id: u32) -> bool {
        let suffix = format!("_{}{}", track_id, UNKNOWN_VEHICLE_POSTFIX);
        self.block
            .iter()
            .any(|record| record.plate_text.ends_with(&suffix) && record.plate_text != text)
    }
}

/// Detection that contains a corner of the plate and overlaps the ROI enough.
fn match_detection<'a>(
    metadata: &'a FrameMetadata,
    read: &PlateRead,
) -> Option<(Option<u32>, &'a str)> {
    let offset = (metadata.roi_offset[0] as f32, metadata.roi_offset[1] as f32);
    metadata
        .objects
        .iter()
        .find(|object| {
            object.iod > MIN_IOD
                && read
                    .coordinates
                    .iter()
                    .any(|p| object.detection.bbox.contains_shifted(p.x, p.y, offset))
        })
        .map(|object| (object.track_id, object.detection.label.as_str()))
}

/// Tracked detection with the highest IOD, if it is large and inside the ROI.
fn match_unknown_vehicle(metadata: &FrameMetadata) -> Option<(u32, &str)> {
    let best = metadata
        .objects
        .iter()
        .fold(None, |best: Option<&RoiObject>, object| match best {
            Some(b) if b.iod >= object.iod => Some(b),
            _ => Some(object),
        })?;
    let roi_width = metadata.roi_dims[0] as f32;
    if best.iod > MIN_IOD && best.detection.bbox.width() > UNKNOWN_MIN_WIDTH_SHARE * roi_width {
        Some((best.track_id?, best.detection.label.as_str()))
    } else {
        None
    }
}

/// Cluster one scan window (newest record first) into reportable plates.
fn cluster_plates(records: &[&PlateRecord], prior: &[String]) -> Vec<DetectedPlate> {
    let mut groups: Vec<PlateGroup<'_>> = Vec::new();
    let mut index_of: HashMap<&str, usize> = HashMap::new();
    for record in records {
        match index_of.get(record.plate_text.as_str()) {
            Some(&i) => {
                let group = &mut groups[i];
                group.frequency += 1;
                group.track_ids.push(record.track_id);
                group.labels.push(&record.label);
            }
            None => {
                index_of.insert(&record.plate_text, groups.len());
                groups.push(PlateGroup {
                    representative: *record,
                    frequency: 1,
                    track_ids: vec![record.track_id],
                    labels: vec![&record.label],
                });
            }
        }
    }

    let texts: Vec<&str> = groups
        .iter()
        .map(|g| g.representative.plate_text.as_str())
        .collect();
    let prior_refs: Vec<&str> = prior.iter().map(String::as_str).collect();
    let cluster_keys = deduplicate_by_edit_distance(&texts, &prior_refs);

    let mut promoted: Vec<DetectedPlate> = Vec::new();
    for key in &cluster_keys {
        let mut members: Vec<&PlateGroup<'_>> = groups
            .iter()
            .filter(|g| {
                let text = g.representative.plate_text.as_str();
                text == key || within_one_edit(text, key)
            })
            .collect();
        members.sort_by(|a, b| b.frequency.cmp(&a.frequency));
        let Some(top) = members.first() else {
            continue;
        };
        if top.frequency < MIN_PLATE_FREQUENCY {
            continue;
        }

        let mut plate = top.representative.clone().into_detected();
        let votes_track = members
            .iter()
            .flat_map(|m| m.track_ids.iter().flatten().copied())
            .filter(|id| *id > 0);
        if let Some(track_id) = majority(votes_track) {
            plate.track_id = Some(track_id);
        }
        let votes_label = members
            .iter()
            .flat_map(|m| m.labels.iter().copied())
            .filter(|label| !label.is_empty());
        if let Some(label) = majority(votes_label) {
            plate.label = label.to_string();
        }
        promoted.push(plate);
    }

    let promoted_texts: Vec<&str> = promoted.iter().map(|p| p.plate_text.as_str()).collect();
    let kept = deduplicate_by_edit_distance(&promoted_texts, &prior_refs);
    kept.iter()
        .filter_map(|text| promoted.iter().find(|p| &p.plate_text == text).cloned())
        .collect()
}

/// Most frequent value; ties go to the value seen first.
fn majority<T: PartialEq + Copy>(values: impl Iterator<Item = T>) -> Option<T> {
    let mut counts: Vec<(T, usize)> = Vec::new();
    for value in values {
        match counts.iter_mut().find(|(v, _)| *v == value) {
            Some((_, n)) => *n += 1,
            None => counts.push((value, 1)),
        }
    }
    let mut best: Option<(T, usize)> = None;
    for (value, n) in counts {
        if best.map_or(true, |(_, b)| n > b) {
            best = Some((value, n));
        }
    }
    best.map(|(value, _)| value)
}

fn seconds_between(later: NaiveDateTime, earlier: NaiveDateTime) -> f64 {
    let delta = later - earlier;
    match delta.num_microseconds() {
        Some(us) => us as f64 / 1_000_000.0,
        None => delta.num_milliseconds() as f64 / 1000.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{BoundingBox, Detection};
    use crate::plate::reading::{OcrReading, Point};
    use chrono::NaiveDate;

    fn ts(sec: u32, milli: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2020, 11, 24)
            .unwrap()
            .and_hms_milli_opt(11, 1, sec, milli)
            .unwrap()
    }

    fn metadata(track_id: Option<u32>, iod: f32, label: &str) -> FrameMetadata {
        FrameMetadata {
            roi_id: 0,
            objects: vec![RoiObject {
                detection: Detection::new(
                    BoundingBox::new(544.0, 191.0, 1099.0, 706.0),
                    0.82,
                    label,
                ),
                iod,
                track_id,
            }],
            roi_offset: [504, 314],
            roi_dims: [1381, 541],
        }
    }

    fn read(plate: &str, left: f32, right: f32) -> PlateRead {
        PlateRead {
            plate: plate.to_string(),
            confidence: 87.5,
            coordinates: vec![
                Point { x: left, y: 268.0 },
                Point { x: right, y: 266.0 },
                Point { x: right, y: 287.0 },
                Point { x: left, y: 289.0 },
            ],
        }
    }

    fn observation(plate: &str, track: Option<u32>, at: NaiveDateTime) -> FrameObservation {
        FrameObservation {
            stream: "cam0".to_string(),
            timestamp: at,
            frame_no: 1,
            roi_id: 0,
            metadata: metadata(track, 0.5, "car"),
            reading: OcrReading {
                results: vec![read(plate, 499.0, 596.0)],
            },
        }
    }

    #[test]
    fn majority_prefers_first_seen_on_tie() {
        assert_eq!(majority([2, 3, 3, 2].into_iter()), Some(2));
        assert_eq!(majority([3, 2, 2].into_iter()), Some(2));
        assert_eq!(majority(std::iter::empty::<u32>()), None);
    }

    #[test]
    fn narrow_reads_are_skipped() {
        let analyser = RoiPlateAnalyser::new(0);
        let mut frame = observation("ABC123", Some(9), ts(1, 0));
        frame.reading.results = vec![read("ABC123", 499.0, 559.0), read("XYZ12", 100.0, 200.0)];
        let record = analyser.first_valid_plate(&frame).unwrap();
        assert_eq!(record.plate_text, "XYZ12");
    }

    #[test]
    fn valid_plate_without_matching_detection_keeps_no_track() {
        let analyser = RoiPlateAnalyser::new(0);
        let mut frame = observation("ABC123", Some(9), ts(1, 0));
        frame.metadata.objects[0].iod = 0.1;
        let record = analyser.first_valid_plate(&frame).unwrap();
        assert_eq!(record.plate_text, "ABC123");
        assert_eq!(record.track_id, None);
        assert_eq!(record.label, "");
    }

    #[test]
    fn unknown_vehicle_needs_width_and_track() {
        let analyser = RoiPlateAnalyser::new(0);
        let mut frame = observation("", Some(4), ts(1, 0));
        frame.reading.results.clear();
        assert_eq!(
            analyser.first_valid_plate(&frame).map(|r| r.plate_text),
            Some("[UNK_CAR_4]".to_string())
        );

        frame.metadata.roi_dims = [3000, 541];
        assert!(analyser.first_valid_plate(&frame).is_none());

        frame.metadata.roi_dims = [1381, 541];
        frame.metadata.objects[0].track_id = None;
        assert!(analyser.first_valid_plate(&frame).is_none());
    }

    #[test]
    fn unknown_is_suppressed_once_track_has_plate() {
        let mut analyser = RoiPlateAnalyser::new(0);
        analyser.analyse(&[observation("ABC123", Some(4), ts(1, 0))]);
        let mut frame = observation("", Some(4), ts(1, 100));
        frame.reading.results.clear();
        assert!(analyser.first_valid_plate(&frame).is_none());
    }

    #[test]
    fn second_unknown_id_on_a_track_is_suppressed() {
        let mut analyser = RoiPlateAnalyser::new(0);
        let mut car = observation("", Some(4), ts(1, 0));
        car.reading.results.clear();
        analyser.analyse(&[car.clone()]);

        let mut truck = car.clone();
        truck.metadata.objects[0].detection.label = "truck".to_string();
        assert!(analyser.first_valid_plate(&truck).is_none());
        assert_eq!(
            analyser.first_valid_plate(&car).map(|r| r.plate_text),
            Some("[UNK_CAR_4]".to_string())
        );

        truck.metadata.objects[0].track_id = Some(14);
        assert_eq!(
            analyser.first_valid_plate(&truck).map(|r| r.plate_text),
            Some("[UNK_TRUCK_14]".to_string())
        );
    }

    #[test]
    fn scan_window_excludes_stale_records() {
        let mut analyser = RoiPlateAnalyser::new(0);
        let frames: Vec<_> = (0..7)
            .map(|i| observation("ABC123", Some(94), ts(1, i * 10)))
            .collect();
        assert!(analyser.analyse(&frames).is_empty());
        assert!(analyser
            .analyse(&[observation("ABC123", Some(94), ts(20, 0))])
            .is_empty());

        let mut analyser = RoiPlateAnalyser::new(0);
        assert!(analyser.analyse(&frames).is_empty());
        let reported = analyser.analyse(&[observation("ABC123", Some(94), ts(4, 0))]);
        assert_eq!(reported.len(), 1);
    }

    #[test]
    fn forgotten_plate_is_reported_again() {
        let mut analyser = RoiPlateAnalyser::new(0);
        let frames: Vec<_> = (0..8)
            .map(|i| observation("ABC123", Some(94), ts(1, i * 10)))
            .collect();
        assert_eq!(analyser.analyse(&frames).len(), 1);
        assert!(analyser.forget("ABC123"));
        assert!(!analyser.forget("ABC123"));
        assert_eq!(analyser.analyse(&[observation("ABC123", Some(94), ts(2, 0))]).len(), 1);
    }

    #[test]
    fn eight_sightings_report_once() {
        let mut analyser = RoiPlateAnalyser::new(0);
        let frames: Vec<_> = (0..8)
            .map(|i| observation("ABC123", Some(94), ts(1, i * 10)))
            .collect();
        let reported = analyser.analyse(&frames);
        assert_eq!(reported.len(), 1);
        assert_eq!(reported[0].plate_text, "ABC123");
        assert_eq!(reported[0].track_id, Some(94));
        assert_eq!(reported[0].label, "car");
        assert_eq!(reported[0].timestamp, ts(1, 70));

        let again: Vec<_> = (0..8)
            .map(|i| observation("ABC123", Some(94), ts(2, i * 10)))
            .collect();
        assert!(analyser.analyse(&again).is_empty());
        assert_eq!(analyser.history_len(), 1);
    }

    #[test]
    fn seven_sightings_are_not_enough() {
        let mut analyser = RoiPlateAnalyser::new(0);
        let frames: Vec<_> = (0..7)
            .map(|i| observation("ABC123", Some(94), ts(1, i * 10)))
            .collect();
        assert!(analyser.analyse(&frames).is_empty());
    }

    #[test]
    fn empty_input_reports_nothing() {
        let mut analyser = RoiPlateAnalyser::new(3);
        assert!(analyser.analyse(&[]).is_empty());
        assert_eq!(analyser.roi_id(), 3);
    }
}
