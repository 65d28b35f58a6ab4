use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use tempfile::Builder;

use platewatch::config::PipelineConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "PLATEWATCH_CONFIG",
        "PLATEWATCH_STREAM",
        "PLATEWATCH_SOURCE",
        "PLATEWATCH_MASK_PATH",
        "PLATEWATCH_WARP_PATH",
        "PLATEWATCH_OUTPUT_PATH",
        "PLATEWATCH_THRESHOLD",
        "PLATEWATCH_DETECTOR",
        "PLATEWATCH_MODEL_PATH",
        "PLATEWATCH_POLL_FOLDER",
        "PLATEWATCH_ROI",
        "PLATEWATCH_HASH_SALT",
        "PLATEWATCH_LOG_PLAINTEXT_PLATE",
    ] {
        std::env::remove_var(key);
    }
}

fn config_file(suffix: &str, contents: &str) -> tempfile::NamedTempFile {
    let mut file = Builder::new()
        .suffix(suffix)
        .tempfile()
        .expect("temp config");
    file.write_all(contents.as_bytes()).expect("write config");
    file
}

#[test]
fn defaults_without_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = PipelineConfig::load(None).expect("load defaults");
    assert_eq!(cfg.stream.name, "cam0");
    assert_eq!(cfg.stream.source, "stub://cam0");
    assert_eq!(cfg.motion.threshold, 2);
    assert_eq!(cfg.motion.linger_secs, 2.5);
    assert_eq!(cfg.geometry.mask_path, PathBuf::from("masks/cam0.png"));
    assert_eq!(cfg.reader.poll_dir, cfg.output.dir);
    assert_eq!(cfg.reader.batch_limit, 200);
    assert!(!cfg.reader.reveal_plate);
}

#[test]
fn loads_json_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = config_file(
        ".json",
        r#"{
            "stream": {"name": "gate", "source": "/srv/frames", "fps": 15},
            "motion": {"threshold": 4, "linger_secs": 3.0},
            "detector": {"backend": "stub", "confidence": 0.5},
            "tracker": {"max_age": 8},
            "output": {"dir": "/srv/crops", "jpeg_quality": 90},
            "reader": {"roi_id": 1, "batch_limit": 50, "alpr_region": "se"}
        }"#,
    );
    std::env::set_var("PLATEWATCH_CONFIG", file.path());
    std::env::set_var("PLATEWATCH_THRESHOLD", "6");
    std::env::set_var("PLATEWATCH_POLL_FOLDER", "/srv/incoming");
    std::env::set_var("PLATEWATCH_LOG_PLAINTEXT_PLATE", "true");

    let cfg = PipelineConfig::load(None).expect("load config");
    clear_env();

    assert_eq!(cfg.stream.name, "gate");
    assert_eq!(cfg.stream.source, "/srv/frames");
    assert_eq!(cfg.stream.fps, 15.0);
    assert_eq!(cfg.geometry.mask_path, PathBuf::from("masks/gate.png"));
    assert_eq!(cfg.motion.threshold, 6);
    assert_eq!(cfg.motion.linger_secs, 3.0);
    assert_eq!(cfg.detector.confidence, 0.5);
    assert_eq!(cfg.tracker.max_age, 8);
    assert_eq!(cfg.tracker.min_hits, 3);
    assert_eq!(cfg.output.dir, PathBuf::from("/srv/crops"));
    assert_eq!(cfg.output.jpeg_quality, 90);
    assert_eq!(cfg.reader.roi_id, 1);
    assert_eq!(cfg.reader.batch_limit, 50);
    assert_eq!(cfg.reader.poll_dir, PathBuf::from("/srv/incoming"));
    assert_eq!(cfg.reader.alpr_country, "eu");
    assert_eq!(cfg.reader.alpr_region, "se");
    assert!(cfg.reader.reveal_plate);
}

#[test]
fn loads_toml_by_extension() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = config_file(
        ".toml",
        r#"
[stream]
name = "yard"
fps = 5.0

[reader]
hash_salt = "pepper"
events_path = "/var/lib/platewatch/events.jsonl"
"#,
    );
    let cfg = PipelineConfig::load(Some(file.path())).expect("load toml");
    assert_eq!(cfg.stream.name, "yard");
    assert_eq!(cfg.stream.fps, 5.0);
    assert_eq!(cfg.reader.hash_salt, "pepper");
    assert_eq!(
        cfg.reader.events_path,
        Some(PathBuf::from("/var/lib/platewatch/events.jsonl"))
    );
}

#[test]
fn rejects_invalid_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = config_file(".json", r#"{"motion": {"threshold": 65}}"#);
    assert!(PipelineConfig::load(Some(file.path())).is_err());

    let file = config_file(".json", r#"{"reader": {"batch_limit": 0}}"#);
    assert!(PipelineConfig::load(Some(file.path())).is_err());

    let file = config_file(".json", "{not json");
    assert!(PipelineConfig::load(Some(file.path())).is_err());

    std::env::set_var("PLATEWATCH_ROI", "first");
    let result = PipelineConfig::load(None);
    clear_env();
    assert!(result.is_err());
}
