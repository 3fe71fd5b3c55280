//! Play command - live playback on the configured output device

use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Args;
use fathom_audio::{AudioConfig, AudioEngine, ChannelHandle, ChannelParams, ChannelState};
use glam::Vec3;

/// How often the engine is updated while waiting for playback
const UPDATE_PERIOD: Duration = Duration::from_millis(20);

/// Arguments for the play command
#[derive(Args)]
pub struct PlayArgs {
    /// Sound file (.ogg or .wav)
    pub file: PathBuf,

    /// Stream from disk instead of decoding up front
    #[arg(long)]
    pub stream: bool,

    /// Loop until interrupted (or until --seconds elapse)
    #[arg(long = "loop")]
    pub looping: bool,

    /// Play the low-pass filtered version
    #[arg(long)]
    pub muffled: bool,

    /// Channel gain (0.0-1.0)
    #[arg(long, default_value_t = 1.0)]
    pub gain: f32,

    /// Category the channel belongs to
    #[arg(long, default_value = "default")]
    pub category: String,

    /// Place the sound in the world (listener at the origin facing -Z)
    #[arg(long, num_args = 3, value_names = ["X", "Y", "Z"], allow_negative_numbers = true)]
    pub at: Option<Vec<f32>>,

    /// Stop after this many seconds
    #[arg(long)]
    pub seconds: Option<f32>,
}

/// World position from `--at`
pub fn position(at: Option<&[f32]>) -> Option<Vec3> {
    at.map(Vec3::from_slice)
}

/// True while the channel can still be heard
pub fn audible(handle: &ChannelHandle, streaming: bool) -> bool {
    if streaming {
        // A finished stream still drains its queued buffers
        !matches!(handle.state(), ChannelState::Disposed | ChannelState::Unassigned)
    } else {
        handle.is_playing()
    }
}

/// Execute the play command
pub fn execute(args: PlayArgs, config: AudioConfig) -> Result<()> {
    let (engine, output) = AudioEngine::open_default(config).context("Failed to open audio output")?;

    let asset = engine
        .load_asset(&args.file, args.stream)
        .with_context(|| format!("Failed to load {}", args.file.display()))?;

    println!("=== Play ===");
    println!("  File: {}", args.file.display());
    println!("  Output: {} @ {}Hz", output.device_name(), output.sample_rate());
    println!(
        "  Format: {} ch, {}Hz, {}",
        asset.channels(),
        asset.sample_rate(),
        if asset.is_streaming() { "streamed" } else { "buffered" }
    );
    if let Some(duration) = asset.duration() {
        println!("  Duration: {:.2}s", duration.as_secs_f32());
    }

    let handle = engine.create_channel(
        &asset,
        ChannelParams {
            gain: args.gain,
            position: position(args.at.as_deref()),
            category: args.category,
            muffled: args.muffled,
            looping: args.looping,
        },
    )?;
    if handle.is_inert() {
        anyhow::bail!("No free playback source");
    }

    let deadline = args
        .seconds
        .map(|s| Instant::now() + Duration::from_secs_f32(s.max(0.0)));
    while audible(&handle, asset.is_streaming()) {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            handle.fade_out_and_dispose();
            thread::sleep(UPDATE_PERIOD * 12);
            break;
        }
        engine.update()?;
        if engine.is_disconnected() {
            anyhow::bail!("Audio device disconnected");
        }
        thread::sleep(UPDATE_PERIOD);
    }

    println!("  Done.");
    Ok(())
}
