mod capture;
mod config;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, Mutex};

use clap::Parser;
use log::{info, warn};
use thiserror::Error;

use dotmatrix_core::{EmuError, GameBoy, Model};

use crate::config::CliConfig;

const DEFAULT_FRAMES: u32 = 60;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Emulation(#[from] EmuError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode PNG: {0}")]
    Png(#[from] png::EncodingError),
    #[error("failed to write WAV: {0}")]
    Wav(#[from] hound::Error),
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Parser, Debug)]
#[command(name = "dotmatrix", version, about = "Headless Game Boy runner")]
struct Args {
    /// Path to ROM file
    rom: PathBuf,

    /// Path to boot ROM file
    #[arg(long)]
    bootrom: Option<PathBuf>,

    /// Force DMG mode
    #[arg(long, conflicts_with = "cgb")]
    dmg: bool,

    /// Force CGB mode
    #[arg(long, conflicts_with = "dmg")]
    cgb: bool,

    /// Number of frames to run
    #[arg(long)]
    frames: Option<u32>,

    /// Write the final frame to this PNG file
    #[arg(long)]
    screenshot: Option<PathBuf>,

    /// Write all emitted audio to this WAV file
    #[arg(long)]
    wav: Option<PathBuf>,

    /// Config file (defaults to the per-user cli.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, short)]
    verbose: bool,
}

fn read_file(path: &Path) -> Result<Vec<u8>, CliError> {
    std::fs::read(path).map_err(|source| CliError::Read {
        path: path.to_path_buf(),
        source,
    })
}

fn run(args: Args) -> Result<(), CliError> {
    let config_path = args.config.clone().unwrap_or_else(config::default_config_path);
    let cfg: CliConfig = config::load_from_file(&config_path);

    let rom = read_file(&args.rom)?;
    let model = if args.dmg {
        Some(Model::Dmg)
    } else if args.cgb {
        Some(Model::Cgb)
    } else {
        cfg.emulation_mode.model()
    };
    let resolved = model.unwrap_or_else(|| Model::detect(&rom));

    let boot_path = args
        .bootrom
        .clone()
        .or_else(|| cfg.bootrom_for(resolved).map(Path::to_path_buf));
    let boot_rom = match boot_path {
        Some(path) => Some(read_file(&path)?),
        None => None,
    };

    let mut gb = GameBoy::load(rom, boot_rom, Some(resolved))?;
    info!(
        "Emulator initialized in {} mode",
        if resolved.is_cgb() { "CGB" } else { "DMG" }
    );

    let audio = Arc::new(Mutex::new(Vec::<f32>::new()));
    if args.wav.is_some() {
        let sink = Arc::clone(&audio);
        gb.set_audio_callback(Box::new(move |samples: &[f32]| match sink.lock() {
            Ok(mut buf) => buf.extend_from_slice(samples),
            Err(poisoned) => poisoned.into_inner().extend_from_slice(samples),
        }));
    }

    let frames = args.frames.or(cfg.default_frames).unwrap_or(DEFAULT_FRAMES);
    for _ in 0..frames {
        gb.run_frame()?;
    }
    info!("Ran {frames} frames ({} M-cycles)", gb.cpu.cycles);

    if let Some(path) = &args.screenshot {
        capture::save_screenshot(gb.framebuffer(), path)?;
        info!("Saved screenshot to {}", path.display());
    }

    if let Some(path) = &args.wav {
        let samples = match audio.lock() {
            Ok(buf) => buf.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        if samples.is_empty() {
            warn!("No audio was produced");
        }
        capture::save_wav(&samples, path)?;
        info!("Saved {} samples to {}", samples.len() / 2, path.display());
    }

    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    let default_filter = if args.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("dotmatrix: {e}");
            ExitCode::FAILURE
        }
    }
}
