use chrono::{NaiveDate, NaiveDateTime};

use platewatch::detect::{BoundingBox, Detection};
use platewatch::plate::{OcrReading, PlateRead, Point, RoiPlateAnalyser};
use platewatch::{FrameMetadata, FrameObservation, RoiObject};

struct Sighting<'a> {
    frame_no: u64,
    at: NaiveDateTime,
    plate: &'a str,
    track_id: Option<u32>,
    iod: f32,
    label: &'a str,
}

fn at(min: u32, sec: u32, micro: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2020, 11, 24)
        .unwrap()
        .and_hms_micro_opt(11, min, sec, micro)
        .unwrap()
}

fn sighting<'a>(
    frame_no: u64,
    at: NaiveDateTime,
    plate: &'a str,
    track_id: Option<u32>,
    label: &'a str,
) -> Sighting<'a> {
    Sighting {
        frame_no,
        at,
        plate,
        track_id,
        iod: 0.5,
        label,
    }
}

fn observation(s: &Sighting<'_>) -> FrameObservation {
    let results = if s.plate.is_empty() {
        Vec::new()
    } else {
        vec![PlateRead {
            plate: s.plate.to_string(),
            confidence: 87.5,
            coordinates: vec![
                Point { x: 499.0, y: 268.0 },
                Point { x: 596.0, y: 266.0 },
                Point { x: 596.0, y: 287.0 },
                Point { x: 500.0, y: 289.0 },
            ],
        }]
    };
    FrameObservation {
        stream: "cam0".to_string(),
        timestamp: s.at,
        frame_no: s.frame_no,
        roi_id: 0,
        metadata: FrameMetadata {
            roi_id: 0,
            objects: vec![RoiObject {
                detection: Detection::new(
                    BoundingBox::new(544.0, 191.0, 1099.0, 706.0),
                    0.82,
                    s.label,
                ),
                iod: s.iod,
                track_id: s.track_id,
            }],
            roi_offset: [504, 314],
            roi_dims: [1381, 541],
        },
        reading: OcrReading { results },
    }
}

/// Run each batch through one analyser; return every reported text, sorted.
fn analyse(batches: &[Vec<Sighting<'_>>]) -> Vec<String> {
    let mut analyser = RoiPlateAnalyser::new(0);
    let mut reported = Vec::new();
    for batch in batches {
        let frames: Vec<FrameObservation> = batch.iter().map(observation).collect();
        reported.extend(analyser.analyse(&frames).into_iter().map(|p| p.plate_text));
    }
    reported.sort();
    reported
}

fn repeated<'a>(
    first_frame: u64,
    min: u32,
    sec: u32,
    plate: &'a str,
    track_id: Option<u32>,
    label: &'a str,
) -> Vec<Sighting<'a>> {
    [0, 10, 20, 30, 50, 60, 70, 80]
        .iter()
        .enumerate()
        .map(|(i, micro)| {
            sighting(
                first_frame + i as u64,
                at(min, sec, *micro),
                plate,
                track_id,
                label,
            )
        })
        .collect()
}

#[test]
fn repeated_plate_is_reported_once() {
    let first = repeated(1, 1, 1, "ABC123", Some(94), "car");
    let mut second = repeated(9, 1, 1, "ABC123", Some(94), "car");
    second.push(sighting(37, at(1, 1, 40), "AAA000", Some(94), "car"));

    assert_eq!(analyse(&[first, second]), vec!["ABC123"]);
}

#[test]
fn unreadable_plates_become_unknown_vehicles() {
    let first = repeated(1, 1, 1, "ABC", Some(94), "car");
    let mut second = repeated(9, 1, 1, "ABD", Some(95), "truck");
    second.push(sighting(37, at(1, 3, 40), "AAA000", Some(94), "car"));

    assert_eq!(
        analyse(&[first, second]),
        vec!["[UNK_CAR_94]", "[UNK_TRUCK_95]"]
    );
}

#[test]
fn unknown_vehicle_needs_consistent_track() {
    let first = repeated(1, 1, 1, "ABC", Some(94), "car");
    let tracks = [None, None, Some(95), None, None, None, Some(95), Some(95)];
    let mut second: Vec<Sighting<'_>> = repeated(9, 1, 1, "ABD", None, "truck")
        .into_iter()
        .zip(tracks)
        .map(|(s, track_id)| Sighting { track_id, ..s })
        .collect();
    second.push(sighting(37, at(1, 1, 40), "AAA000", Some(94), "car"));

    assert_eq!(analyse(&[first, second]), vec!["[UNK_CAR_94]"]);
}

#[test]
fn low_overlap_reports_nothing() {
    let batch: Vec<Sighting<'_>> = repeated(1, 1, 1, "ABC", Some(94), "car")
        .into_iter()
        .map(|s| Sighting { iod: 0.05, ..s })
        .collect();

    assert!(analyse(&[batch]).is_empty());
}

#[test]
fn repairable_reads_count_towards_plate() {
    let plates = [
        "ABC12", "LABC123", "ABC123", "ABC123", "ABC123I", "ABC123", "ABC123", "ABC123", "ABC123",
    ];
    let micros = [0, 10, 20, 30, 50, 60, 70, 80, 90];
    let batch: Vec<Sighting<'_>> = plates
        .iter()
        .zip(micros)
        .enumerate()
        .map(|(i, (plate, micro))| sighting(i as u64 + 1, at(1, 1, micro), plate, Some(94), "car"))
        .collect();

    assert_eq!(analyse(&[batch]), vec!["ABC123"]);
}

#[test]
fn plates_are_reported_again_after_grace_period() {
    let labels = ["car", "car", "car", "truck", "truck", "car", "car", "car"];
    let mut first: Vec<Sighting<'_>> = repeated(1, 1, 1, "ABC123", Some(1), "car")
        .into_iter()
        .zip(labels)
        .map(|(s, label)| Sighting { label, ..s })
        .collect();
    let abc111_tracks = [2, 2, 2, 2, 2, 2, 2, 3];
    first.extend(
        repeated(11, 1, 2, "ABC111", None, "truck")
            .into_iter()
            .zip(abc111_tracks)
            .map(|(s, track)| Sighting {
                track_id: Some(track),
                ..s
            }),
    );
    first.push(sighting(19, at(1, 2, 90), "BBB111", Some(3), "truck"));
    first.push(sighting(20, at(1, 2, 99), "BBB111", Some(3), "truck"));

    let mut second = repeated(21, 1, 2, "ABC22", Some(4), "car");
    let redetect_labels = ["car", "car", "truck", "truck", "car", "car", "car", "car"];
    second.extend(
        repeated(31, 10, 3, "ABC123", Some(5), "car")
            .into_iter()
            .zip(redetect_labels)
            .map(|(s, label)| Sighting { label, ..s }),
    );

    let bc125_labels = ["car", "car", "car", "truck", "car", "car", "car", "car"];
    let third: Vec<Sighting<'_>> = repeated(41, 10, 5, "BC125", Some(6), "car")
        .into_iter()
        .zip(bc125_labels)
        .map(|(s, label)| Sighting { label, ..s })
        .collect();

    assert_eq!(
        analyse(&[first, second, third]),
        vec!["ABC111", "ABC123", "ABC123", "ABC22", "BC125"]
    );
}

#[test]
fn majority_vote_sets_track_and_label() {
    let labels = ["car", "truck", "truck", "car", "truck", "truck", "car", "truck"];
    let tracks = [Some(7), Some(7), None, Some(8), Some(7), Some(7), Some(7), None];
    let batch: Vec<Sighting<'_>> = repeated(1, 1, 1, "ABC123", None, "car")
        .into_iter()
        .zip(labels.into_iter().zip(tracks))
        .map(|(s, (label, track_id))| Sighting {
            label,
            track_id,
            ..s
        })
        .collect();
    let frames: Vec<FrameObservation> = batch.iter().map(observation).collect();

    let mut analyser = RoiPlateAnalyser::new(0);
    let plates = analyser.analyse(&frames);
    assert_eq!(plates.len(), 1);
    assert_eq!(plates[0].plate_text, "ABC123");
    assert_eq!(plates[0].track_id, Some(7));
    assert_eq!(plates[0].label, "truck");
    assert_eq!(analyser.history_len(), 1);
}
