//! Frame ingestion sources.
//!
//! - Directories of still images, read in file-name order
//! - Stub source (`stub://<name>`) rendering a synthetic scene, for testing
//!
//! Sources assign monotonic sequence numbers and derive capture timestamps
//! from the configured frame rate, so downstream timing is reproducible.

pub mod image_dir;
pub mod synthetic;

use std::path::Path;

use anyhow::{anyhow, Result};
use chrono::{Duration, NaiveDateTime};

use crate::config::StreamSettings;
use crate::frame::Frame;

pub use image_dir::ImageDirSource;
pub use synthetic::SyntheticSource;

/// Anything that yields frames in capture order.
pub trait FrameSource: Send {
    fn name(&self) -> &str;

    /// Next frame, or `None` at end of stream.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// Frames handed out so far.
    fn frames_read(&self) -> u64;
}

/// Build the source named by `stream.source`.
pub fn source_from_settings(stream: &StreamSettings) -> Result<Box<dyn FrameSource>> {
    let start = chrono::Local::now().naive_local();
    if let Some(rest) = stream.source.strip_prefix("stub://") {
        let source = SyntheticSource::from_uri(rest, stream.fps, start)?;
        log::info!("FrameSource: {} (synthetic)", stream.source);
        return Ok(Box::new(source));
    }
    if stream.source.contains("://") {
        return Err(anyhow!(
            "unsupported frame source {:?}; expected stub://<name> or a local directory",
            stream.source
        ));
    }
    let source = ImageDirSource::open(Path::new(&stream.source), stream.fps, start)?;
    log::info!(
        "FrameSource: {} ({} images)",
        stream.source,
        source.remaining()
    );
    Ok(Box::new(source))
}

/// Capture time of frame `seq` in a stream that started at `start`.
pub(crate) fn frame_timestamp(start: NaiveDateTime, seq: u64, fps: f64) -> NaiveDateTime {
    let micros = (seq as f64 / fps.max(f64::EPSILON) * 1_000_000.0).round() as i64;
    start + Duration::microseconds(micros)
}
