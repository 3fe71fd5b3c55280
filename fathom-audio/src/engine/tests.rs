use std::sync::Arc;

use super::*;
use crate::channel::ChannelState;
use crate::error::AudioError;

const RATE: u32 = 1000;

fn config(general: usize) -> AudioConfig {
    let mut config = AudioConfig::default();
    config.pools.general = general;
    config.pools.voice = 2;
    config.streaming.chunk_samples = 100;
    config.voice.miss_threshold = 5;
    config
}

fn engine_with(config: AudioConfig) -> (AudioEngine, Arc<SoftwareDevice>) {
    let device = Arc::new(SoftwareDevice::new());
    let engine = AudioEngine::with_manual_streaming(config, device.clone()).unwrap();
    (engine, device)
}

fn tone(engine: &AudioEngine, frames: usize, streaming: bool) -> Arc<SoundAsset> {
    let pcm = (0..frames).map(|i| if i % 20 < 10 { 12000 } else { -12000 }).collect();
    engine
        .asset_from_pcm("tone", pcm, 1, RATE, streaming)
        .unwrap()
}

fn render(device: &SoftwareDevice, frames: usize) {
    let mut out = vec![0.0; frames * 2];
    device.render(&mut out, RATE);
}

#[test]
fn test_pool_overflow_yields_one_inert_handle() {
    let (engine, _device) = engine_with(config(4));
    let asset = tone(&engine, 4000, false);

    let handles: Vec<_> = (0..5)
        .map(|_| engine.play(&asset, 1.0, None, "default").unwrap())
        .collect();

    assert_eq!(handles.iter().filter(|h| h.is_inert()).count(), 1);
    assert_eq!(handles.iter().filter(|h| h.is_playing()).count(), 4);
    assert!(handles[4].is_inert());
}

#[test]
fn test_reclaim_spares_playing_channels() {
    let (engine, _device) = engine_with(config(2));
    let asset = tone(&engine, 4000, false);

    let first = engine.play(&asset, 1.0, None, "default").unwrap();
    let second = engine.play(&asset, 1.0, None, "default").unwrap();
    first.stop().unwrap();

    let third = engine.play(&asset, 1.0, None, "default").unwrap();
    assert!(!third.is_inert());
    assert_eq!(first.state(), ChannelState::Disposed);
    assert!(second.is_playing());

    // Nothing finished, so nothing is reclaimed
    assert!(engine.play(&asset, 1.0, None, "default").unwrap().is_inert());
    assert!(second.is_playing());
    assert!(third.is_playing());
}

#[test]
fn test_voice_pool_is_separate() {
    let (engine, _device) = engine_with(config(1));
    let asset = tone(&engine, 4000, false);
    engine.play(&asset, 1.0, None, "default").unwrap();
    assert!(engine.play(&asset, 1.0, None, "default").unwrap().is_inert());

    let voice = engine.voice_asset(engine.create_voice_queue());
    let handle = engine.play(&voice, 1.0, None, "voip").unwrap();
    assert!(!handle.is_inert());
    assert!(handle.is_playing());
}

#[test]
fn test_stream_runs_to_end_through_worker() {
    let (engine, device) = engine_with(config(2));
    let asset = tone(&engine, 450, true);
    let handle = engine.play(&asset, 1.0, None, "music").unwrap();
    assert!(handle.is_playing());
    assert_eq!(engine.streaming_worker().active_count(), 1);

    render(&device, 150);
    engine.pump_streams();
    assert!(!handle.is_playing());

    render(&device, 1000);
    assert_eq!(engine.pump_streams(), 0);
    assert_eq!(handle.state(), ChannelState::Disposed);
}

#[test]
fn test_voice_stream_times_out_after_misses() {
    let (engine, _device) = engine_with(config(2));
    let queue = engine.create_voice_queue();
    let asset = engine.voice_asset(queue.clone());
    let handle = engine.play(&asset, 1.0, None, "voip").unwrap();
    let channel = handle.channel().unwrap().clone();

    // The initial fill already missed once
    assert_eq!(channel.stream_misses(), Some(1));
    for _ in 0..3 {
        engine.pump_streams();
    }
    assert_eq!(channel.stream_misses(), Some(4));
    assert!(handle.is_playing());

    // One valid frame resets the counter; the next pull misses again
    let mut packet = Vec::new();
    QoaCodec.encode(&[500; 960], &mut packet).unwrap();
    queue.push(&packet);
    engine.pump_streams();
    assert_eq!(channel.stream_misses(), Some(1));
    assert!(handle.is_playing());

    for _ in 0..3 {
        engine.pump_streams();
    }
    assert!(handle.is_playing());
    engine.pump_streams();
    assert!(!handle.is_playing());
}

#[test]
fn test_category_mute_rebinds_playing_channels() {
    let (engine, _device) = engine_with(config(4));
    let asset = tone(&engine, 4000, false);
    let music = engine.play(&asset, 1.0, None, "music").unwrap();
    let effect = engine.play(&asset, 1.0, None, "default").unwrap();
    let music_channel = music.channel().unwrap().clone();
    let effect_channel = effect.channel().unwrap().clone();

    engine.set_category_mute("Music", true).unwrap();
    assert!(engine.category_muted("music"));
    assert!(music_channel.is_muffle_applied());
    assert!(!effect_channel.is_muffle_applied());
    assert!(music.is_playing());

    engine.set_category_mute("music", false).unwrap();
    assert!(!music_channel.is_muffle_applied());
}

#[test]
fn test_category_mute_keeps_own_muffle() {
    let (engine, _device) = engine_with(config(4));
    let asset = tone(&engine, 4000, false);
    let handle = engine.play(&asset, 1.0, None, "music").unwrap();
    handle.set_muffled(true).unwrap();

    engine.set_category_mute("music", true).unwrap();
    engine.set_category_mute("music", false).unwrap();
    assert!(handle.channel().unwrap().is_muffle_applied());
}

#[test]
fn test_new_channel_in_muted_category_starts_muffled() {
    let (engine, _device) = engine_with(config(4));
    let asset = tone(&engine, 4000, false);
    engine.set_category_mute("ui", true).unwrap();
    let handle = engine.play(&asset, 1.0, None, "ui").unwrap();
    assert!(handle.channel().unwrap().is_muffle_applied());
}

#[test]
fn test_gain_clamped_everywhere() {
    let (engine, _device) = engine_with(config(4));
    let asset = tone(&engine, 4000, false);

    let loud = engine.play(&asset, 9.0, None, "default").unwrap();
    assert_eq!(loud.gain(), 1.0);
    loud.set_gain(f32::NAN).unwrap();
    assert_eq!(loud.gain(), 0.0);

    engine.set_category_gain("default", 4.0).unwrap();
    assert_eq!(engine.category_gain("default"), 1.0);
    engine.set_category_gain("default", -4.0).unwrap();
    assert_eq!(engine.category_gain("default"), 0.0);

    engine.set_listener_gain(2.0).unwrap();
    assert_eq!(engine.listener().gain, 1.0);
}

#[test]
fn test_instance_queries() {
    let (engine, _device) = engine_with(config(4));
    let asset = tone(&engine, 4000, false);
    let other = tone(&engine, 4000, false);
    engine.play(&asset, 1.0, None, "default").unwrap();
    engine.play(&asset, 1.0, None, "default").unwrap();

    assert!(engine.is_playing(&asset));
    assert!(!engine.is_playing(&other));
    assert_eq!(engine.count_playing_instances(&asset), 2);
    assert!(engine.channel_for(&asset).is_some());

    engine.kill_channels(&asset);
    assert_eq!(engine.count_playing_instances(&asset), 0);
    assert!(engine.channel_for(&asset).is_none());
}

#[test]
fn test_fade_out_through_worker() {
    let (engine, _device) = engine_with(config(4));
    let asset = tone(&engine, 4000, false);
    let handle = engine.play(&asset, 1.0, None, "default").unwrap();

    handle.fade_out_and_dispose();
    assert_eq!(engine.streaming_worker().active_count(), 1);
    for _ in 0..12 {
        engine.pump_streams();
    }
    assert_eq!(handle.state(), ChannelState::Disposed);
    assert_eq!(engine.streaming_worker().active_count(), 0);
}

#[test]
fn test_voice_attenuation_ducks_and_holds() {
    let (engine, _device) = engine_with(config(4));
    engine.attenuate_for_voice(0.5).unwrap();
    for category in ATTENUATED_CATEGORIES {
        assert!((engine.category_gain(category) - 0.5).abs() < 1e-6);
    }
    assert_eq!(engine.category_gain("voip"), 1.0);

    engine.update().unwrap();
    assert!((engine.voice_attenuation() - 0.5).abs() < 1e-6);
}

#[test]
fn test_voice_attenuation_disabled() {
    let mut config = config(4);
    config.voice.attenuation_enabled = false;
    let (engine, _device) = engine_with(config);
    engine.attenuate_for_voice(0.2).unwrap();
    assert_eq!(engine.category_gain("music"), 1.0);
}

#[test]
fn test_disconnect_is_detected_once() {
    let (engine, device) = engine_with(config(4));
    engine.update().unwrap();
    assert!(!engine.is_disconnected());

    device.mark_disconnected();
    engine.update().unwrap();
    assert!(engine.is_disconnected());
    engine.update().unwrap();
}

#[test]
fn test_compression_target() {
    assert_eq!(compression_target(0.0), 1.0);
    assert_eq!(compression_target(0.5), 1.0);
    assert!((compression_target(2.0) - 0.75).abs() < 1e-6);
}

#[test]
fn test_compression_drops_with_loud_playback() {
    let mut config = config(8);
    config.output.dynamic_range_compression = true;
    let (engine, _device) = engine_with(config);
    let asset = tone(&engine, 4000, false);
    for _ in 0..4 {
        engine.play(&asset, 1.0, None, "default").unwrap();
    }
    assert!(engine.playback_amplitude() > 1.0);

    engine.update().unwrap();
    assert!(engine.compression_gain() < 1.0);
}

#[test]
fn test_stream_position_on_buffered_channel() {
    let (engine, _device) = engine_with(config(4));
    let asset = tone(&engine, 4000, false);
    let handle = engine.play(&asset, 1.0, None, "default").unwrap();
    assert!(matches!(
        handle.set_stream_position(5),
        Err(AudioError::NotStreaming)
    ));
    assert_eq!(handle.stream_position(), None);
}

#[test]
fn test_shutdown_releases_everything() {
    let (engine, device) = engine_with(config(4));
    let asset = tone(&engine, 4000, false);
    let stream = tone(&engine, 4000, true);
    let handle = engine.play(&asset, 1.0, None, "default").unwrap();
    let streaming = engine.play(&stream, 1.0, None, "music").unwrap();

    engine.shutdown();
    assert_eq!(handle.state(), ChannelState::Disposed);
    assert_eq!(streaming.state(), ChannelState::Disposed);
    assert_eq!(device.source_count(), 0);
    assert!(engine.play(&asset, 1.0, None, "default").unwrap().is_inert());

    drop((handle, streaming, asset, stream));
    assert_eq!(device.buffer_count(), 0);
}

#[test]
fn test_failed_refill_frees_the_slot() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cut.wav");
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&path, spec).unwrap();
    for i in 0..2000 {
        writer.write_sample(if i % 20 < 10 { 12000i16 } else { -12000 }).unwrap();
    }
    writer.finalize().unwrap();
    // Header still claims 2000 samples; only 1500 remain
    let len = std::fs::metadata(&path).unwrap().len();
    std::fs::OpenOptions::new()
        .write(true)
        .open(&path)
        .unwrap()
        .set_len(len - 1000)
        .unwrap();

    let (engine, device) = engine_with(config(1));
    let asset = engine.load_asset(&path, true).unwrap();
    let first = engine.play(&asset, 1.0, None, "music").unwrap();
    assert!(first.is_playing());

    for _ in 0..40 {
        render(&device, 100);
        engine.pump_streams();
    }
    assert_eq!(first.state(), ChannelState::Disposed);
    assert!(!first.is_playing());
    assert_eq!(engine.streaming_worker().active_count(), 0);

    let effect = tone(&engine, 4000, false);
    let second = engine.play(&effect, 1.0, None, "default").unwrap();
    assert!(!second.is_inert());
    assert!(second.is_playing());
}

#[test]
fn test_voice_reader_stops_at_highest_frame_id() {
    let mut config = config(2);
    config.voice.miss_threshold = 20;
    let (engine, _device) = engine_with(config);
    let queue = engine.create_voice_queue();
    let mut packet = Vec::new();
    QoaCodec.encode(&[500; 960], &mut packet).unwrap();
    assert!(!queue.receive(u64::MAX, &packet));
    assert!(queue.receive(u64::MAX - 1, &packet));

    let asset = engine.voice_asset(queue.clone());
    let handle = engine.play(&asset, 1.0, None, "voip").unwrap();
    for _ in 0..12 {
        engine.pump_streams();
    }
    assert_eq!(handle.stream_position(), Some(u64::MAX));
    assert!(handle.is_playing());
}
