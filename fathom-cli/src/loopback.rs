//! Loopback command - hear the microphone as remote players would

use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Args;
use fathom_audio::{AudioConfig, AudioEngine};

const UPDATE_PERIOD: Duration = Duration::from_millis(20);

/// Arguments for the loopback command
#[derive(Args)]
pub struct LoopbackArgs {
    /// How long to monitor, in seconds
    #[arg(long, default_value_t = 10.0)]
    pub seconds: f32,

    /// Microphone gain (overrides voice.microphone_gain)
    #[arg(long)]
    pub gain: Option<f32>,
}

/// Execute the loopback command
pub fn execute(args: LoopbackArgs, config: AudioConfig) -> Result<()> {
    let (engine, output) = AudioEngine::open_default(config).context("Failed to open audio output")?;
    let mut capture = engine.open_microphone().context("Failed to open microphone")?;
    if let Some(gain) = args.gain {
        capture.set_gain(gain);
    }
    let outgoing = capture.outgoing().clone();
    let frame_samples = capture.frame_samples();

    let asset = engine.loopback_asset(capture);
    let handle = engine.play(&asset, 1.0, None, "voip")?;
    if handle.is_inert() {
        anyhow::bail!("No free voice source");
    }

    println!("=== Loopback ===");
    println!("  Output: {} @ {}Hz", output.device_name(), output.sample_rate());
    println!("  Frame: {} samples", frame_samples);
    println!("  Speak now; monitoring for {:.0}s...", args.seconds);

    let deadline = Instant::now() + Duration::from_secs_f32(args.seconds.max(0.0));
    while Instant::now() < deadline && handle.is_playing() {
        engine.update()?;
        if engine.is_disconnected() {
            anyhow::bail!("Audio device disconnected");
        }
        thread::sleep(UPDATE_PERIOD);
    }
    handle.dispose();

    println!("  Frames sent: {}", outgoing.latest_frame_id());
    Ok(())
}
