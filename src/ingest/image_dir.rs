//! Still-image directory source.
//!
//! Every `.jpg`, `.jpeg` or `.png` file in the directory is one frame, taken
//! in file-name order. The directory listing is read once at open.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use chrono::NaiveDateTime;

use super::{frame_timestamp, FrameSource};
use crate::frame::Frame;

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

pub struct ImageDirSource {
    name: String,
    fps: f64,
    start: NaiveDateTime,
    pending: VecDeque<PathBuf>,
    frames_read: u64,
}

impl ImageDirSource {
    pub fn open(dir: &Path, fps: f64, start: NaiveDateTime) -> Result<Self> {
        let entries = std::fs::read_dir(dir)
            .map_err(|e| anyhow!("failed to read frame directory {}: {}", dir.display(), e))?;
        let mut files = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.is_file() && is_image(&path) {
                files.push(path);
            }
        }
        files.sort();
        Ok(Self {
            name: dir.display().to_string(),
            fps,
            start,
            pending: files.into(),
            frames_read: 0,
        })
    }

    /// Images not yet handed out.
    pub fn remaining(&self) -> usize {
        self.pending.len()
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}

impl FrameSource for ImageDirSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let Some(path) = self.pending.pop_front() else {
            return Ok(None);
        };
        let image = image::open(&path)
            .map_err(|e| anyhow!("failed to decode frame {}: {}", path.display(), e))?
            .to_rgb8();
        let seq = self.frames_read;
        self.frames_read += 1;
        Ok(Some(Frame::new(
            seq,
            frame_timestamp(self.start, seq, self.fps),
            image,
        )))
    }

    fn frames_read(&self) -> u64 {
        self.frames_read
    }
}
