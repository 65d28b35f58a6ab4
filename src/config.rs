use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

const DEFAULT_STREAM_NAME: &str = "cam0";
const DEFAULT_SOURCE: &str = "stub://cam0";
const DEFAULT_FPS: f64 = 10.0;
const DEFAULT_THRESHOLD: u32 = 2;
const DEFAULT_LINGER_SECS: f64 = 2.5;
const DEFAULT_DETECTOR: &str = "stub";
const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_CONFIDENCE: f32 = 0.4;
const DEFAULT_NMS_IOU: f32 = 0.5;
const DEFAULT_MAX_AGE: u32 = 5;
const DEFAULT_MIN_HITS: u32 = 3;
const DEFAULT_TRACKER_IOU: f32 = 0.3;
const DEFAULT_OUTPUT_DIR: &str = "crop_images";
const DEFAULT_JPEG_QUALITY: u8 = 97;
const DEFAULT_BATCH_LIMIT: usize = 200;
const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
const DEFAULT_ALPR_BIN: &str = "alpr";
const DEFAULT_ALPR_COUNTRY: &str = "eu";
const DEFAULT_ALPR_REGION: &str = "fi";

#[derive(Debug, Deserialize, Default)]
struct PipelineConfigFile {
    stream: Option<StreamConfigFile>,
    geometry: Option<GeometryConfigFile>,
    motion: Option<MotionConfigFile>,
    detector: Option<DetectorConfigFile>,
    tracker: Option<TrackerConfigFile>,
    output: Option<OutputConfigFile>,
    reader: Option<ReaderConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct StreamConfigFile {
    name: Option<String>,
    source: Option<String>,
    fps: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct GeometryConfigFile {
    mask_path: Option<PathBuf>,
    warp_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct MotionConfigFile {
    threshold: Option<u32>,
    linger_secs: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    model_path: Option<PathBuf>,
    input_size: Option<u32>,
    confidence: Option<f32>,
    nms_iou: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct TrackerConfigFile {
    max_age: Option<u32>,
    min_hits: Option<u32>,
    iou_threshold: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct OutputConfigFile {
    dir: Option<PathBuf>,
    jpeg_quality: Option<u8>,
}

#[derive(Debug, Deserialize, Default)]
struct ReaderConfigFile {
    roi_id: Option<u32>,
    poll_dir: Option<PathBuf>,
    batch_limit: Option<usize>,
    poll_interval_ms: Option<u64>,
    hash_salt: Option<String>,
    reveal_plate: Option<bool>,
    events_path: Option<PathBuf>,
    alpr_bin: Option<String>,
    alpr_country: Option<String>,
    alpr_region: Option<String>,
}

/// Settings shared by the capture daemon and the plate reader.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub stream: StreamSettings,
    pub geometry: GeometrySettings,
    pub motion: MotionSettings,
    pub detector: DetectorSettings,
    pub tracker: TrackerSettings,
    pub output: OutputSettings,
    pub reader: ReaderSettings,
}

#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// Prefix of every artifact name.
    pub name: String,
    /// `stub://<name>` or a directory of still images.
    pub source: String,
    pub fps: f64,
}

#[derive(Debug, Clone)]
pub struct GeometrySettings {
    pub mask_path: PathBuf,
    pub warp_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct MotionSettings {
    /// Hamming distance above which an ROI counts as changed.
    pub threshold: u32,
    pub linger_secs: f64,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub backend: String,
    pub model_path: Option<PathBuf>,
    pub input_size: u32,
    pub confidence: f32,
    pub nms_iou: f32,
}

#[derive(Debug, Clone)]
pub struct TrackerSettings {
    pub max_age: u32,
    pub min_hits: u32,
    pub iou_threshold: f32,
}

#[derive(Debug, Clone)]
pub struct OutputSettings {
    pub dir: PathBuf,
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone)]
pub struct ReaderSettings {
    pub roi_id: u32,
    pub poll_dir: PathBuf,
    pub batch_limit: usize,
    pub poll_interval_ms: u64,
    pub hash_salt: String,
    /// Log plate text in clear instead of its salted digest.
    pub reveal_plate: bool,
    pub events_path: Option<PathBuf>,
    pub alpr_bin: String,
    pub alpr_country: String,
    pub alpr_region: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        // An empty file has no required fields, so this cannot fail.
        Self::from_file(PipelineConfigFile::default())
    }
}

impl PipelineConfig {
    /// Load configuration from `path` (or `PLATEWATCH_CONFIG`), then apply
    /// environment overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let env_path = std::env::var("PLATEWATCH_CONFIG")
            .ok()
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from);
        let config_path = path.map(Path::to_path_buf).or(env_path);
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: PipelineConfigFile) -> Self {
        let stream_file = file.stream.unwrap_or_default();
        let stream = StreamSettings {
            name: stream_file
                .name
                .unwrap_or_else(|| DEFAULT_STREAM_NAME.to_string()),
            source: stream_file
                .source
                .unwrap_or_else(|| DEFAULT_SOURCE.to_string()),
            fps: stream_file.fps.unwrap_or(DEFAULT_FPS),
        };

        let geometry_file = file.geometry.unwrap_or_default();
        let geometry = GeometrySettings {
            mask_path: geometry_file
                .mask_path
                .unwrap_or_else(|| default_mask_path(&stream.name)),
            warp_path: geometry_file
                .warp_path
                .unwrap_or_else(|| default_warp_path(&stream.name)),
        };

        let motion_file = file.motion.unwrap_or_default();
        let motion = MotionSettings {
            threshold: motion_file.threshold.unwrap_or(DEFAULT_THRESHOLD),
            linger_secs: motion_file.linger_secs.unwrap_or(DEFAULT_LINGER_SECS),
        };

        let detector_file = file.detector.unwrap_or_default();
        let detector = DetectorSettings {
            backend: detector_file
                .backend
                .unwrap_or_else(|| DEFAULT_DETECTOR.to_string()),
            model_path: detector_file.model_path,
            input_size: detector_file.input_size.unwrap_or(DEFAULT_INPUT_SIZE),
            confidence: detector_file.confidence.unwrap_or(DEFAULT_CONFIDENCE),
            nms_iou: detector_file.nms_iou.unwrap_or(DEFAULT_NMS_IOU),
        };

        let tracker_file = file.tracker.unwrap_or_default();
        let tracker = TrackerSettings {
            max_age: tracker_file.max_age.unwrap_or(DEFAULT_MAX_AGE),
            min_hits: tracker_file.min_hits.unwrap_or(DEFAULT_MIN_HITS),
            iou_threshold: tracker_file.iou_threshold.unwrap_or(DEFAULT_TRACKER_IOU),
        };

        let output_file = file.output.unwrap_or_default();
        let output = OutputSettings {
            dir: output_file
                .dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
            jpeg_quality: output_file.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
        };

        let reader_file = file.reader.unwrap_or_default();
        let reader = ReaderSettings {
            roi_id: reader_file.roi_id.unwrap_or(0),
            poll_dir: reader_file.poll_dir.unwrap_or_else(|| output.dir.clone()),
            batch_limit: reader_file.batch_limit.unwrap_or(DEFAULT_BATCH_LIMIT),
            poll_interval_ms: reader_file
                .poll_interval_ms
                .unwrap_or(DEFAULT_POLL_INTERVAL_MS),
            hash_salt: reader_file.hash_salt.unwrap_or_default(),
            reveal_plate: reader_file.reveal_plate.unwrap_or(false),
            events_path: reader_file.events_path,
            alpr_bin: reader_file
                .alpr_bin
                .unwrap_or_else(|| DEFAULT_ALPR_BIN.to_string()),
            alpr_country: reader_file
                .alpr_country
                .unwrap_or_else(|| DEFAULT_ALPR_COUNTRY.to_string()),
            alpr_region: reader_file
                .alpr_region
                .unwrap_or_else(|| DEFAULT_ALPR_REGION.to_string()),
        };

        Self {
            stream,
            geometry,
            motion,
            detector,
            tracker,
            output,
            reader,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(name) = env_value("PLATEWATCH_STREAM") {
            self.stream.name = name;
        }
        if let Some(source) = env_value("PLATEWATCH_SOURCE") {
            self.stream.source = source;
        }
        if let Some(path) = env_value("PLATEWATCH_MASK_PATH") {
            self.geometry.mask_path = PathBuf::from(path);
        }
        if let Some(path) = env_value("PLATEWATCH_WARP_PATH") {
            self.geometry.warp_path = PathBuf::from(path);
        }
        if let Some(path) = env_value("PLATEWATCH_OUTPUT_PATH") {
            self.output.dir = PathBuf::from(path);
        }
        if let Some(threshold) = env_value("PLATEWATCH_THRESHOLD") {
            self.motion.threshold = threshold
                .parse()
                .map_err(|_| anyhow!("PLATEWATCH_THRESHOLD must be a non-negative integer"))?;
        }
        if let Some(backend) = env_value("PLATEWATCH_DETECTOR") {
            self.detector.backend = backend;
        }
        if let Some(path) = env_value("PLATEWATCH_MODEL_PATH") {
            self.detector.model_path = Some(PathBuf::from(path));
        }
        if let Some(path) = env_value("PLATEWATCH_POLL_FOLDER") {
            self.reader.poll_dir = PathBuf::from(path);
        }
        if let Some(roi) = env_value("PLATEWATCH_ROI") {
            self.reader.roi_id = roi
                .parse()
                .map_err(|_| anyhow!("PLATEWATCH_ROI must be a non-negative integer"))?;
        }
        if let Some(salt) = env_value("PLATEWATCH_HASH_SALT") {
            self.reader.hash_salt = salt;
        }
        if let Some(reveal) = env_value("PLATEWATCH_LOG_PLAINTEXT_PLATE") {
            self.reader.reveal_plate = reveal.eq_ignore_ascii_case("true") || reveal == "1";
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.stream.name.trim().is_empty() {
            return Err(anyhow!("stream name must not be empty"));
        }
        if !(self.stream.fps > 0.0) {
            return Err(anyhow!("stream fps must be greater than zero"));
        }
        if !(self.motion.linger_secs > 0.0) {
            return Err(anyhow!("motion linger_secs must be greater than zero"));
        }
        if self.motion.threshold > 64 {
            return Err(anyhow!(
                "motion threshold {} exceeds the 64-bit hash size",
                self.motion.threshold
            ));
        }
        let iou = self.tracker.iou_threshold;
        if !(iou > 0.0 && iou < 1.0) {
            return Err(anyhow!("tracker iou_threshold must be in (0, 1)"));
        }
        if self.reader.batch_limit == 0 {
            return Err(anyhow!("reader batch_limit must be greater than zero"));
        }
        if self.output.jpeg_quality == 0 || self.output.jpeg_quality > 100 {
            return Err(anyhow!("output jpeg_quality must be in 1..=100"));
        }
        Ok(())
    }
}

fn default_mask_path(stream: &str) -> PathBuf {
    PathBuf::from("masks").join(format!("{}.png", stream))
}

fn default_warp_path(stream: &str) -> PathBuf {
    PathBuf::from("warps").join(format!("{}.json", stream))
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn read_config_file(path: &Path) -> Result<PipelineConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
