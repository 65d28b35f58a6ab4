//! capture - motion-triggered ROI capture for one camera stream
//!
//! Reads frames from the configured source, gates them on per-ROI motion,
//! runs vehicle detection and tracking on the resulting batches, and writes
//! crop images with JSON sidecars for the plate reader.

use std::path::PathBuf;
use std::sync::atomic::Ordering;

use anyhow::{anyhow, Result};
use clap::Parser;

use platewatch::{CaptureProcessor, PipelineConfig};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Configuration file (JSON, or TOML with a .toml extension).
    #[arg(long, env = "PLATEWATCH_CONFIG")]
    config: Option<PathBuf>,
    /// Frame source: stub://<name>[?frames=N] or a directory of images.
    #[arg(long)]
    source: Option<String>,
    /// Stream name used as the artifact prefix.
    #[arg(long)]
    stream: Option<String>,
    /// Directory receiving crops and sidecars.
    #[arg(long)]
    output_dir: Option<PathBuf>,
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
    if let Some(source) = args.source {
        config.stream.source = source;
    }
    if let Some(stream) = args.stream {
        config.stream.name = stream;
    }
    if let Some(dir) = args.output_dir {
        config.output.dir = dir;
    }
    config.validate()?;

    log::info!(
        "capture {} from {} into {}",
        config.stream.name,
        config.stream.source,
        config.output.dir.display()
    );
    let handle = CaptureProcessor::from_config(&config)?.spawn()?;

    let keep_running = handle.keep_running();
    ctrlc::set_handler(move || {
        log::info!("shutdown signal received, stopping capture...");
        keep_running.store(false, Ordering::SeqCst);
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    let stats = handle.join()?;
    println!(
        "frames read: {}, batches: {} queued / {} dropped, frames processed: {} ({} skipped), artifacts: {}",
        stats.frames_read,
        stats.batches_queued,
        stats.batches_dropped,
        stats.frames_processed,
        stats.frames_skipped,
        stats.artifacts_written
    );
    Ok(())
}
