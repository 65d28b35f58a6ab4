use std::collections::VecDeque;

use anyhow::{anyhow, Result};
use image::RgbImage;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;

/// Stub backend for testing and dry runs.
///
/// Without a script it never detects anything. With a script it replays one
/// entry per call; `None` entries simulate a backend failure. Once the script is
/// exhausted the last entry is repeated.
#[derive(Default)]
pub struct StubBackend {
    script: VecDeque<Option<Vec<Detection>>>,
    last: Option<Vec<Detection>>,
    calls: u64,
}

impl StubBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scripted(script: Vec<Option<Vec<Detection>>>) -> Self {
        Self {
            script: script.into(),
            last: None,
            calls: 0,
        }
    }

    /// Number of `detect` calls served so far.
    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, _image: &RgbImage) -> Result<Vec<Detection>> {
        self.calls += 1;
        match self.script.pop_front() {
            Some(Some(detections)) => {
                self.last = Some(detections.clone());
                Ok(detections)
            }
            Some(None) => Err(anyhow!("scripted detector failure")),
            None => Ok(self.last.clone().unwrap_or_default()),
        }
    }
}
