//! plate_reader - OCR and plate clustering for one ROI
//!
//! Polls the capture output directory, runs OpenALPR on crops that contain
//! vehicles, and reports plates confirmed by the temporal analyser.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use clap::Parser;

use platewatch::{plate_digest, AlprCommand, PipelineConfig, PlateReader};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Configuration file (JSON, or TOML with a .toml extension).
    #[arg(long, env = "PLATEWATCH_CONFIG")]
    config: Option<PathBuf>,
    /// ROI to analyse.
    #[arg(long)]
    roi: Option<u32>,
    /// Directory written by `capture`.
    #[arg(long)]
    poll_dir: Option<PathBuf>,
    /// Process one batch and exit.
    #[arg(long)]
    once: bool,
    /// Verbose logging.
    #[arg(long)]
    debug: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let default_level = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    let mut config = PipelineConfig::load(args.config.as_deref())?;
    if let Some(roi) = args.roi {
        config.reader.roi_id = roi;
    }
    if let Some(dir) = args.poll_dir {
        config.reader.poll_dir = dir;
    }
    config.validate()?;

    let ocr = AlprCommand::from_settings(&config.reader);
    let mut reader = PlateReader::new(config.reader.clone(), Box::new(ocr));

    if args.once {
        let plates = reader.poll_once()?;
        for plate in plates {
            let shown = if config.reader.reveal_plate || plate.is_unknown() {
                plate.plate_text.clone()
            } else {
                plate_digest(&config.reader.hash_salt, &plate.plate_text)
            };
            println!("{} {} {:?} {}", plate.timestamp, shown, plate.track_id, plate.label);
        }
        return Ok(());
    }

    let keep_running = Arc::new(AtomicBool::new(true));
    let flag = keep_running.clone();
    ctrlc::set_handler(move || {
        log::info!("shutdown signal received, stopping plate reader...");
        flag.store(false, Ordering::SeqCst);
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    reader.run(&keep_running)
}
