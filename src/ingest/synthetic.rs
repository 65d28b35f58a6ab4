//! Synthetic frame source (`stub://`) for tests and dry runs.
//!
//! Renders a bright block sliding across a fixed noisy background. The block
//! is visible for part of every cycle, so a motion gate opens and closes at a
//! predictable rhythm.

use anyhow::{anyhow, Result};
use chrono::NaiveDateTime;
use image::{Rgb, RgbImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{frame_timestamp, FrameSource};
use crate::frame::Frame;

pub const SYNTHETIC_WIDTH: u32 = 320;
pub const SYNTHETIC_HEIGHT: u32 = 240;

/// Frames per motion cycle.
pub const CYCLE_FRAMES: u64 = 40;
/// Frames (within a cycle) during which the block is visible.
pub const BLOCK_VISIBLE: std::ops::Range<u64> = 10..20;

const BLOCK_WIDTH: u32 = 80;
const BLOCK_HEIGHT: u32 = 60;
const BLOCK_STEP: u32 = 20;

pub struct SyntheticSource {
    name: String,
    fps: f64,
    start: NaiveDateTime,
    background: RgbImage,
    frame_limit: Option<u64>,
    frames_read: u64,
}

impl SyntheticSource {
    pub fn new(name: &str, fps: f64, start: NaiveDateTime) -> Self {
        let seed = name
            .bytes()
            .fold(0x9e37_79b9_u64, |acc, b| acc.rotate_left(5) ^ u64::from(b));
        let mut rng = StdRng::seed_from_u64(seed);
        let background = RgbImage::from_fn(SYNTHETIC_WIDTH, SYNTHETIC_HEIGHT, |_, _| {
            let level: u8 = rng.gen_range(70..=110);
            Rgb([level, level, level.saturating_add(rng.gen_range(0..8))])
        });
        Self {
            name: name.to_string(),
            fps,
            start,
            background,
            frame_limit: None,
            frames_read: 0,
        }
    }

    /// Parse `<name>[?frames=N]`, the part of a `stub://` URI after the scheme.
    pub fn from_uri(rest: &str, fps: f64, start: NaiveDateTime) -> Result<Self> {
        let (name, query) = match rest.split_once('?') {
            Some((name, query)) => (name, Some(query)),
            None => (rest, None),
        };
        if name.is_empty() {
            return Err(anyhow!("stub source needs a name (stub://<name>)"));
        }
        let mut source = Self::new(name, fps, start);
        for pair in query.into_iter().flat_map(|q| q.split('&')) {
            match pair.split_once('=') {
                Some(("frames", value)) => {
                    let limit = value
                        .parse::<u64>()
                        .map_err(|e| anyhow!("invalid stub frame count {:?}: {}", value, e))?;
                    source = source.with_frame_limit(limit);
                }
                _ => log::warn!("ignoring stub source option {:?}", pair),
            }
        }
        Ok(source)
    }

    /// End the stream after `limit` frames. Unlimited by default.
    pub fn with_frame_limit(mut self, limit: u64) -> Self {
        self.frame_limit = Some(limit);
        self
    }

    /// Whether frame `seq` shows the moving block.
    pub fn block_visible(seq: u64) -> bool {
        BLOCK_VISIBLE.contains(&(seq % CYCLE_FRAMES))
    }

    fn render(&self, seq: u64) -> RgbImage {
        let mut image = self.background.clone();
        if !Self::block_visible(seq) {
            return image;
        }
        let step = (seq % CYCLE_FRAMES - BLOCK_VISIBLE.start) as u32;
        let left = (step * BLOCK_STEP).min(SYNTHETIC_WIDTH - BLOCK_WIDTH);
        let top = (SYNTHETIC_HEIGHT - BLOCK_HEIGHT) / 2;
        for y in top..top + BLOCK_HEIGHT {
            for x in left..left + BLOCK_WIDTH {
                image.put_pixel(x, y, Rgb([235, 235, 225]));
            }
        }
        image
    }
}

impl FrameSource for SyntheticSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.frame_limit.is_some_and(|limit| self.frames_read >= limit) {
            return Ok(None);
        }
        let seq = self.frames_read;
        self.frames_read += 1;
        let image = self.render(seq);
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
