//! End-to-end playback against the software device

use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use fathom_audio::{
    AudioConfig, AudioEngine, CaptureDevice, ChannelParams, ChannelState, SoftwareDevice,
};
use glam::Vec3;

const RATE: u32 = 8000;

fn write_tone(path: &Path, frames: usize) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for i in 0..frames {
        let t = i as f32 / RATE as f32;
        let sample = (t * 440.0 * std::f32::consts::TAU).sin() * 12000.0;
        writer.write_sample(sample as i16).unwrap();
    }
    writer.finalize().unwrap();
}

fn render(device: &SoftwareDevice, frames: usize) -> Vec<f32> {
    let mut out = vec![0.0; frames * 2];
    device.render(&mut out, RATE);
    out
}

fn energy(samples: &[f32]) -> f32 {
    samples.iter().map(|s| s * s).sum::<f32>() / samples.len().max(1) as f32
}

fn small_config() -> AudioConfig {
    let mut config = AudioConfig::default();
    config.pools.general = 4;
    config.pools.voice = 2;
    config.streaming.chunk_samples = 800;
    config.streaming.worker_period_ms = 5;
    config.voice.frame_samples = 160;
    config.voice.repeat_margin = 40;
    config.voice.sample_rate = RATE;
    config
}

#[test]
fn test_file_stream_plays_to_end_on_worker_thread() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ambience.wav");
    write_tone(&path, RATE as usize);

    let device = Arc::new(SoftwareDevice::new());
    let engine = AudioEngine::new(small_config(), device.clone()).unwrap();
    let asset = engine.load_asset(&path, true).unwrap();
    let handle = engine.play(&asset, 1.0, None, "waterambience").unwrap();
    assert!(handle.is_playing());

    let first = render(&device, 400);
    assert!(energy(&first) > 0.001);

    // Render in real time-ish steps and let the worker keep up
    let deadline = Instant::now() + Duration::from_secs(10);
    while handle.state() != ChannelState::Disposed
        || engine.streaming_worker().active_count() > 0
    {
        assert!(Instant::now() < deadline, "stream never finished");
        render(&device, 400);
        thread::sleep(Duration::from_millis(10));
    }
    assert!(!engine.is_playing(&asset));
}

#[test]
fn test_muffled_buffered_playback_is_quieter_on_high_tones() {
    let device = Arc::new(SoftwareDevice::new());
    let engine = AudioEngine::with_manual_streaming(small_config(), device.clone()).unwrap();
    // Nyquist-rate square wave: almost all energy above the muffle cutoff
    let pcm = (0..RATE as usize)
        .map(|i| if i % 2 == 0 { 12000 } else { -12000 })
        .collect();
    let asset = engine.asset_from_pcm("hiss", pcm, 1, RATE, false).unwrap();

    let handle = engine.play(&asset, 1.0, None, "default").unwrap();
    let clear = energy(&render(&device, 800));
    handle.set_muffled(true).unwrap();
    let muffled = energy(&render(&device, 800));
    assert!(muffled < clear * 0.5, "clear {clear}, muffled {muffled}");
}

#[test]
fn test_muffled_streaming_playback_is_quieter_on_high_tones() {
    let device = Arc::new(SoftwareDevice::new());
    let engine = AudioEngine::with_manual_streaming(small_config(), device.clone()).unwrap();
    let pcm = (0..RATE as usize * 8)
        .map(|i| if i % 2 == 0 { 12000 } else { -12000 })
        .collect();
    let asset = engine.asset_from_pcm("hiss", pcm, 1, RATE, true).unwrap();
    let handle = engine.play(&asset, 1.0, None, "music").unwrap();

    // Play out everything queued before a flag change, one chunk per pump
    let settle = || {
        for _ in 0..6 {
            render(&device, 800);
            engine.pump_streams();
        }
    };

    let clear = energy(&render(&device, 800));
    engine.pump_streams();

    handle.set_muffled(true).unwrap();
    settle();
    let muffled = energy(&render(&device, 800));
    assert!(muffled < clear * 0.5, "clear {clear}, muffled {muffled}");

    handle.set_muffled(false).unwrap();
    settle();
    let restored = energy(&render(&device, 800));
    assert!(restored > clear * 0.9, "clear {clear}, restored {restored}");

    engine.set_category_mute("music", true).unwrap();
    settle();
    let muted = energy(&render(&device, 800));
    assert!(muted < clear * 0.5, "clear {clear}, muted {muted}");
    assert!(handle.is_playing());
}

#[test]
fn test_distance_silences_far_sources() {
    let device = Arc::new(SoftwareDevice::new());
    let engine = AudioEngine::with_manual_streaming(small_config(), device.clone()).unwrap();
    let pcm = vec![12000i16; RATE as usize];
    let asset = engine.asset_from_pcm("hum", pcm, 1, RATE, false).unwrap();

    let params = ChannelParams {
        position: Some(Vec3::new(5000.0, 0.0, 0.0)),
        ..ChannelParams::default()
    };
    let handle = engine.create_channel(&asset, params).unwrap();
    assert!(handle.is_playing());
    assert_eq!(energy(&render(&device, 200)), 0.0);

    handle.set_position(Some(Vec3::new(10.0, 0.0, 0.0))).unwrap();
    assert!(energy(&render(&device, 200)) > 0.0);
}

/// Microphone that always has a full frame of a constant level
struct SteadyMic(i16);

impl CaptureDevice for SteadyMic {
    fn sample_rate(&self) -> u32 {
        RATE
    }

    fn read(&mut self, out: &mut [i16]) -> usize {
        out.fill(self.0);
        out.len()
    }
}

#[test]
fn test_voice_travels_from_capture_to_remote_channel() {
    let device = Arc::new(SoftwareDevice::new());
    let engine = AudioEngine::with_manual_streaming(small_config(), device.clone()).unwrap();

    let mut capture = engine.voice_capture(Box::new(SteadyMic(8000)));
    let incoming = engine.create_voice_queue();
    let voice = engine.voice_asset(incoming.clone());
    let handle = engine.play(&voice, 1.0, None, "voip").unwrap();
    assert!(!handle.is_inert());

    // Transport: forward every captured frame with its id
    let mut packet = Vec::new();
    for _ in 0..4 {
        capture.capture_frame().unwrap();
        let id = capture.outgoing().latest_frame_id();
        assert!(capture.outgoing().read(id, &mut packet));
        assert!(incoming.receive(id, &packet));
    }

    engine.pump_streams();
    let out = render(&device, 320);
    assert!(energy(&out) > 0.0);
    assert!(handle.is_playing());
}

#[test]
fn test_loopback_monitors_microphone() {
    let device = Arc::new(SoftwareDevice::new());
    let engine = AudioEngine::with_manual_streaming(small_config(), device.clone()).unwrap();

    let capture = engine.voice_capture(Box::new(SteadyMic(6000)));
    let outgoing = capture.outgoing().clone();
    let loopback = engine.loopback_asset(capture);
    let handle = engine.play(&loopback, 1.0, None, "voip").unwrap();

    // The initial fill captured one frame per stream buffer
    assert_eq!(outgoing.latest_frame_id(), 4);
    assert!(energy(&render(&device, 320)) > 0.0);

    render(&device, 200);
    engine.pump_streams();
    assert!(outgoing.latest_frame_id() > 4);
    assert!(handle.is_playing());
}
