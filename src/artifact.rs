//! On-disk handoff between the capture daemon and the plate reader.
//!
//! Every retained frame produces, per ROI, a JPEG crop and a JSON sidecar
//! sharing one base name:
//!
//! ```text
//! <stream>_ts_<yyyy_mm_dd_HH_MM_SS_mmm>_roi_<NN>_f_<frame_no>.jpg
//! <stream>_ts_<yyyy_mm_dd_HH_MM_SS_mmm>_roi_<NN>_f_<frame_no>.json
//! ```
//!
//! The sidecar is written last and appears atomically, so its presence means
//! the pair is complete.

use std::fs;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{anyhow, Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};

use crate::detect::Detection;

pub const IMAGE_EXTENSION: &str = "jpg";
pub const METADATA_EXTENSION: &str = "json";

const TIMESTAMP_FORMAT: &str = "%Y_%m_%d_%H_%M_%S_%3f";

fn name_pattern() -> &'static Regex {
    static NAME_RE: OnceLock<Regex> = OnceLock::new();
    NAME_RE.get_or_init(|| {
        Regex::new(
            r"^(?P<stream>.+)_ts_(?P<y>\d{4})_(?P<mo>\d{2})_(?P<d>\d{2})_(?P<h>\d{2})_(?P<mi>\d{2})_(?P<s>\d{2})_(?P<ms>\d{3})_roi_(?P<roi>\d+)_f_(?P<frame>\d+)$",
        )
        .unwrap()
    })
}

/// Identity of one crop/sidecar pair.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArtifactName {
    pub stream: String,
    pub timestamp: NaiveDateTime,
    pub roi_id: u32,
    pub frame_no: u64,
}

impl ArtifactName {
    pub fn base_name(&self) -> String {
        format!(
            "{}_ts_{}_roi_{:02}_f_{}",
            self.stream,
            self.timestamp.format(TIMESTAMP_FORMAT),
            self.roi_id,
            self.frame_no
        )
    }

    pub fn image_file(&self) -> String {
        format!("{}.{}", self.base_name(), IMAGE_EXTENSION)
    }

    pub fn metadata_file(&self) -> String {
        format!("{}.{}", self.base_name(), METADATA_EXTENSION)
    }

    /// Parse a base name (without extension).
    pub fn parse(base: &str) -> Option<Self> {
        let caps = name_pattern().captures(base)?;
        let num = |key: &str| caps.name(key)?.as_str().parse::<u32>().ok();

        let date = NaiveDate::from_ymd_opt(num("y")? as i32, num("mo")?, num("d")?)?;
        let timestamp = date.and_hms_milli_opt(num("h")?, num("mi")?, num("s")?, num("ms")?)?;
        Some(Self {
            stream: caps.name("stream")?.as_str().to_string(),
            timestamp,
            roi_id: num("roi")?,
            frame_no: caps.name("frame")?.as_str().parse().ok()?,
        })
    }

    /// Parse a sidecar file name (`<base>.json`).
    pub fn from_metadata_file(file_name: &str) -> Option<Self> {
        let base = file_name.strip_suffix(&format!(".{}", METADATA_EXTENSION))?;
        Self::parse(base)
    }
}

/// One detection overlapping an ROI, with its overlap and tracker identity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoiObject {
    pub detection: Detection,
    /// Intersection of the detection box with the ROI mask over the box area.
    pub iod: f32,
    #[serde(default, deserialize_with = "lenient_track_id")]
    pub track_id: Option<u32>,
}

/// Sidecar content for one ROI crop.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameMetadata {
    #[serde(default)]
    pub roi_id: u32,
    #[serde(default)]
    pub objects: Vec<RoiObject>,
    /// Top-left corner of the ROI in frame pixels.
    #[serde(default)]
    pub roi_offset: [u32; 2],
    /// Crop width and height.
    #[serde(default)]
    pub roi_dims: [u32; 2],
}

impl FrameMetadata {
    pub fn has_detections(&self) -> bool {
        !self.objects.is_empty()
    }
}

/// Track ids of -1, null or garbage all mean "no track".
fn lenient_track_id<'de, D>(deserializer: D) -> std::result::Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(value
        .as_u64()
        .and_then(|id| u32::try_from(id).ok()))
}

/// Writes crop/sidecar pairs into the output directory.
pub struct ArtifactWriter {
    dir: PathBuf,
    jpeg_quality: u8,
}

impl ArtifactWriter {
    pub fn new<P: Into<PathBuf>>(dir: P, jpeg_quality: u8) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create output dir {}", dir.display()))?;
        Ok(Self { dir, jpeg_quality })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write the crop, then the sidecar. Returns the sidecar path.
    pub fn write(
        &self,
        name: &ArtifactName,
        crop: &RgbImage,
        metadata: &FrameMetadata,
    ) -> Result<PathBuf> {
        let image_path = self.dir.join(name.image_file());
        let file = fs::File::create(&image_path)
            .with_context(|| format!("failed to create {}", image_path.display()))?;
        let mut out = BufWriter::new(file);
        JpegEncoder::new_with_quality(&mut out, self.jpeg_quality)
            .encode_image(crop)
            .map_err(|e| anyhow!("failed to encode {}: {}", image_path.display(), e))?;
        // The image must be complete on disk before the sidecar is published.
        let file = out
            .into_inner()
            .map_err(|e| anyhow!("failed to flush {}: {}", image_path.display(), e.error()))?;
        file.sync_all()
            .with_context(|| format!("failed to sync {}", image_path.display()))?;

        let metadata_path = self.dir.join(name.metadata_file());
        let tmp_path = self.dir.join(format!(".{}.tmp", name.metadata_file()));
        let json = serde_json::to_vec(metadata)?;
        fs::write(&tmp_path, json)
            .with_context(|| format!("failed to write {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &metadata_path)
            .with_context(|| format!("failed to publish {}", metadata_path.display()))?;
        Ok(metadata_path)
    }
}
