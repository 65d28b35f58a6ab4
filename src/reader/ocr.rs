use std::path::Path;
use std::process::Command;

use anyhow::{anyhow, Context, Result};

use crate::config::ReaderSettings;
use crate::plate::OcrReading;

/// Plate OCR engine.
///
/// Called once per crop that carries at least one detection. Errors are
/// logged by the caller and treated as an empty reading.
pub trait PlateOcr: Send {
    fn name(&self) -> &str;

    fn read(&mut self, image: &Path) -> Result<OcrReading>;
}

/// OpenALPR command-line client (`alpr -j -c <country> -p <region> <image>`).
#[derive(Clone, Debug)]
pub struct AlprCommand {
    bin: String,
    country: String,
    region: String,
}

impl AlprCommand {
    pub fn new(
        bin: impl Into<String>,
        country: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            bin: bin.into(),
            country: country.into(),
            region: region.into(),
        }
    }

    pub fn from_settings(settings: &ReaderSettings) -> Self {
        Self::new(
            settings.alpr_bin.clone(),
            settings.alpr_country.clone(),
            settings.alpr_region.clone(),
        )
    }

    fn command(&self, image: &Path) -> Command {
        let mut command = Command::new(&self.bin);
        command
            .arg("-j")
            .arg("-c")
            .arg(&self.country)
            .arg("-p")
            .arg(&self.region)
            .arg(image);
        command
    }
}

impl PlateOcr for AlprCommand {
    fn name(&self) -> &str {
        &self.bin
    }

    fn read(&mut self, image: &Path) -> Result<OcrReading> {
        let output = self
            .command(image)
            .output()
            .with_context(|| format!("failed to run {}", self.bin))?;
        if !output.status.success() {
            return Err(anyhow!(
                "{} exited with {}: {}",
                self.bin,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        parse_alpr_output(&output.stdout)
    }
}

/// `alpr -j` prints one JSON document; anything before the first `{` is noise.
fn parse_alpr_output(stdout: &[u8]) -> Result<OcrReading> {
    let start = stdout
        .iter()
        .position(|b| *b == b'{')
        .ok_or_else(|| anyhow!("no JSON in OCR output"))?;
    serde_json::from_slice(&stdout[start..]).context("malformed OCR output")
}
