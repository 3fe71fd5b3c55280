//! Render command - offline playback into a WAV file
//!
//! Drives the engine without a sound card: streams are pumped by hand and the
//! software device is rendered block by block.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use fathom_audio::{AudioConfig, AudioEngine, ChannelParams, SoftwareDevice};
use tracing::info;

use crate::play::{audible, position};

/// Frames rendered between stream refills
const BLOCK_FRAMES: usize = 1024;

/// Arguments for the render command
#[derive(Args)]
pub struct RenderArgs {
    /// Sound file (.ogg or .wav)
    pub file: PathBuf,

    /// Output WAV file (16-bit stereo)
    #[arg(short, long)]
    pub output: PathBuf,

    /// Stream from disk instead of decoding up front
    #[arg(long)]
    pub stream: bool,

    /// Render the low-pass filtered version
    #[arg(long)]
    pub muffled: bool,

    /// Channel gain (0.0-1.0)
    #[arg(long, default_value_t = 1.0)]
    pub gain: f32,

    /// Place the sound in the world (listener at the origin facing -Z)
    #[arg(long, num_args = 3, value_names = ["X", "Y", "Z"], allow_negative_numbers = true)]
    pub at: Option<Vec<f32>>,

    /// Output sample rate
    #[arg(long, default_value_t = 48_000)]
    pub rate: u32,

    /// Longest output to write, in seconds
    #[arg(long, default_value_t = 600.0)]
    pub max_seconds: f32,
}

/// Execute the render command
pub fn execute(args: RenderArgs, config: AudioConfig) -> Result<()> {
    let device = Arc::new(SoftwareDevice::new());
    let engine = AudioEngine::with_manual_streaming(config, device.clone())?;

    let asset = engine
        .load_asset(&args.file, args.stream)
        .with_context(|| format!("Failed to load {}", args.file.display()))?;
    let handle = engine.create_channel(
        &asset,
        ChannelParams {
            gain: args.gain,
            position: position(args.at.as_deref()),
            muffled: args.muffled,
            ..ChannelParams::default()
        },
    )?;
    if handle.is_inert() {
        anyhow::bail!("No free playback source");
    }

    let max_frames = (args.max_seconds.max(0.0) * args.rate as f32) as usize;
    let frames = render_to_wav(&args.output, args.rate, max_frames, |block| {
        engine.pump_streams();
        device.render(block, args.rate);
        audible(&handle, asset.is_streaming())
    })?;

    info!("Rendered {} frames", frames);
    println!("=== Render ===");
    println!("  Input: {}", args.file.display());
    println!(
        "  Output: {} ({:.2}s @ {}Hz)",
        args.output.display(),
        frames as f32 / args.rate as f32,
        args.rate
    );
    Ok(())
}

/// Pull stereo blocks from `next` until it reports silence or `max_frames`
/// is reached. Returns the frames written.
fn render_to_wav(
    path: &Path,
    rate: u32,
    max_frames: usize,
    mut next: impl FnMut(&mut [f32]) -> bool,
) -> Result<usize> {
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)
        .with_context(|| format!("Failed to create {}", path.display()))?;

    let mut block = vec![0.0f32; BLOCK_FRAMES * 2];
    let mut written = 0;
    while written < max_frames {
        let frames = BLOCK_FRAMES.min(max_frames - written);
        let block = &mut block[..frames * 2];
        let more = next(block);
        for sample in block.iter() {
            writer.write_sample((sample * 32767.0).clamp(-32768.0, 32767.0) as i16)?;
        }
        written += frames;
        if !more {
            break;
        }
    }
    writer.finalize()?;
    Ok(written)
}
