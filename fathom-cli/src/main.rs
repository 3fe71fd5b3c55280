//! Fathom CLI - developer tool for the fathom audio engine
//!
//! # Commands
//!
//! - `fathom play <file>` - Play a sound file, buffered or streamed
//! - `fathom render <file> -o out.wav` - Render playback offline to a WAV file
//! - `fathom loopback` - Hear your microphone through the voice codec
//! - `fathom devices` - List audio input and output devices
//! - `fathom config` - Print (or write) the effective configuration
//!
//! # Usage
//!
//! ```bash
//! # Stream a long ambience track, muffled, in a loop
//! fathom play ambience.ogg --stream --loop --muffled
//!
//! # Check what the low-pass muffle does to a sound
//! fathom render hit.wav --muffled -o hit_muffled.wav
//! ```
//!
//! Every command reads `audio.toml` from the fathom config directory unless
//! `--config` names another file.

mod config;
mod devices;
mod loopback;
mod play;
mod render;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fathom_audio::AudioConfig;

/// Fathom CLI - developer tool for the fathom audio engine
#[derive(Parser)]
#[command(name = "fathom")]
#[command(about = "Play, stream and inspect audio with the fathom engine")]
#[command(version)]
struct Cli {
    /// Configuration file (default: audio.toml in the fathom config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Play a sound file on the default output
    Play(play::PlayArgs),

    /// Render playback of a sound file to a WAV file
    Render(render::RenderArgs),

    /// Monitor the microphone through the voice codec
    Loopback(loopback::LoopbackArgs),

    /// List audio devices
    Devices,

    /// Print or write the effective configuration
    Config(config::ConfigArgs),
}

fn load_config(path: Option<&PathBuf>) -> Result<AudioConfig> {
    match path {
        Some(path) => fathom_audio::config::load_from(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => Ok(fathom_audio::config::load()),
    }
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::Play(args) => play::execute(args, config),
        Commands::Render(args) => render::execute(args, config),
        Commands::Loopback(args) => loopback::execute(args, config),
        Commands::Devices => devices::execute(),
        Commands::Config(args) => config::execute(args, &config),
    }
}
