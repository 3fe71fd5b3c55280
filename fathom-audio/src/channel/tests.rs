use std::sync::Arc;

use super::*;
use crate::config::STREAM_BUFFER_COUNT;
use crate::device::SoftwareDevice;

const RATE: u32 = 1000;
const CHUNK: usize = 100;

struct Rig {
    device: Arc<SoftwareDevice>,
    shared: Arc<dyn AudioDevice>,
    source: SourceId,
    config: AudioConfig,
    categories: Arc<CategoryTable>,
}

fn rig() -> Rig {
    let device = Arc::new(SoftwareDevice::new());
    let shared: Arc<dyn AudioDevice> = device.clone();
    let source = shared.create_source().unwrap();
    let mut config = AudioConfig::default();
    config.streaming.chunk_samples = CHUNK;
    Rig {
        device,
        shared,
        source,
        config,
        categories: Arc::new(CategoryTable::new()),
    }
}

impl Rig {
    fn asset(&self, samples: usize, streaming: bool) -> Arc<SoundAsset> {
        let pcm = (0..samples).map(|i| ((i % 50) as i16 - 25) * 400).collect();
        Arc::new(SoundAsset::from_pcm(&self.shared, "test", pcm, 1, RATE, streaming).unwrap())
    }

    fn start(&self, asset: &Arc<SoundAsset>, params: ChannelParams) -> PlaybackChannel {
        let channel = PlaybackChannel::new(
            asset.clone(),
            self.shared.clone(),
            self.categories.clone(),
            params,
        );
        channel.start(self.source, &self.config).unwrap();
        channel
    }

    fn render(&self, frames: usize) {
        let mut out = vec![0.0; frames * 2];
        self.device.render(&mut out, RATE);
    }
}

#[test]
fn test_stream_prefills_every_buffer() {
    let rig = rig();
    let asset = rig.asset(10 * CHUNK, true);
    let channel = rig.start(&asset, ChannelParams::default());

    assert_eq!(rig.shared.buffers_queued(rig.source).unwrap(), STREAM_BUFFER_COUNT);
    assert_eq!(rig.shared.source_state(rig.source).unwrap(), SourceState::Playing);
    assert_eq!(channel.stream_position(), Some(4 * CHUNK as u64));
    assert_eq!(channel.state(), ChannelState::Playing);
}

#[test]
fn test_full_chunks_never_end() {
    let rig = rig();
    let asset = rig.asset(40 * CHUNK, true);
    let channel = rig.start(&asset, ChannelParams::default());

    for _ in 0..20 {
        rig.render(150);
        assert!(channel.service_stream().unwrap());
        assert!(channel.is_playing());
    }
}

#[test]
fn test_short_final_chunk_ends_stream() {
    let rig = rig();
    let asset = rig.asset(4 * CHUNK + 50, true);
    let channel = rig.start(&asset, ChannelParams::default());
    assert!(channel.is_playing());

    rig.render(150);
    assert!(channel.service_stream().unwrap());
    assert!(!channel.is_playing());
    assert_eq!(channel.state(), ChannelState::Stopped);
    // The tail is still queued on the hardware
    assert_eq!(rig.shared.source_state(rig.source).unwrap(), SourceState::Playing);

    rig.render(1000);
    assert!(!channel.service_stream().unwrap());
    assert!(channel.is_disposed());
}

#[test]
fn test_looping_stream_wraps_to_start() {
    let rig = rig();
    let asset = rig.asset(150, true);
    let params = ChannelParams {
        looping: true,
        ..ChannelParams::default()
    };
    let channel = rig.start(&asset, params);
    assert_eq!(channel.stream_position(), Some(0));

    for _ in 0..10 {
        rig.render(150);
        channel.service_stream().unwrap();
        assert!(channel.is_playing());
    }
}

#[test]
fn test_dispose_releases_stream_buffers() {
    let rig = rig();
    let asset = rig.asset(10 * CHUNK, true);
    let before = rig.device.buffer_count();

    let channel = rig.start(&asset, ChannelParams::default());
    assert_eq!(rig.device.buffer_count(), before + STREAM_BUFFER_COUNT);

    channel.dispose();
    channel.dispose();
    assert_eq!(rig.device.buffer_count(), before);
    assert_eq!(channel.state(), ChannelState::Disposed);
    assert!(!channel.is_playing());
}

#[test]
fn test_muffle_toggle_preserves_offset() {
    let rig = rig();
    let asset = rig.asset(4000, false);
    let channel = rig.start(&asset, ChannelParams::default());
    rig.render(1000);
    let offset = channel.sample_offset().unwrap();
    assert_eq!(offset, 1000);

    channel.set_muffled(true).unwrap();
    assert!(channel.is_muffle_applied());
    assert!(channel.is_playing());
    assert_eq!(channel.sample_offset(), Some(offset));

    channel.set_muffled(false).unwrap();
    assert!(!channel.is_muffle_applied());
    assert_eq!(channel.sample_offset(), Some(offset));
}

#[test]
fn test_muffle_on_stopped_channel_stays_stopped() {
    let rig = rig();
    let asset = rig.asset(4000, false);
    let channel = rig.start(&asset, ChannelParams::default());
    channel.stop().unwrap();

    channel.set_muffled(true).unwrap();
    assert!(channel.is_muffle_applied());
    assert!(!channel.is_playing());
}

#[test]
fn test_gain_is_clamped() {
    let rig = rig();
    let asset = rig.asset(4000, false);
    let channel = rig.start(&asset, ChannelParams::default());

    channel.set_gain(3.0).unwrap();
    assert_eq!(channel.gain(), 1.0);
    channel.set_gain(-2.0).unwrap();
    assert_eq!(channel.gain(), 0.0);
    channel.set_gain(f32::NAN).unwrap();
    assert_eq!(channel.gain(), 0.0);
}

#[test]
fn test_stream_seek_requires_stream() {
    let rig = rig();
    let asset = rig.asset(4000, false);
    let channel = rig.start(&asset, ChannelParams::default());
    assert!(matches!(
        channel.set_stream_position(10),
        Err(AudioError::NotStreaming)
    ));
}

#[test]
fn test_stream_seek_moves_reader() {
    let rig = rig();
    let asset = rig.asset(10 * CHUNK, true);
    let channel = rig.start(&asset, ChannelParams::default());
    channel.set_stream_position(50).unwrap();
    assert_eq!(channel.stream_position(), Some(50));
}

#[test]
fn test_fade_out_disposes() {
    let rig = rig();
    let asset = rig.asset(4000, false);
    let channel = rig.start(&asset, ChannelParams::default());
    channel.begin_fade();

    assert!(!channel.step_fade());
    assert!(channel.gain() < 1.0);
    let steps = (0..11).take_while(|_| !channel.step_fade()).count();
    assert!(steps < 11);
    assert!(channel.is_disposed());
}

#[test]
fn test_category_mute_muffles() {
    let rig = rig();
    let asset = rig.asset(4000, false);
    let channel = rig.start(&asset, ChannelParams::default());

    rig.categories.set_muted("default", true);
    channel.refresh_category().unwrap();
    assert!(channel.is_muffle_applied());
    assert!(!channel.muffled());

    rig.categories.set_muted("default", false);
    channel.refresh_category().unwrap();
    assert!(!channel.is_muffle_applied());
}

#[test]
fn test_inert_handle_is_silent() {
    let handle = ChannelHandle::inert();
    assert!(handle.is_inert());
    assert!(!handle.is_playing());
    assert_eq!(handle.state(), ChannelState::Unassigned);
    handle.set_gain(0.5).unwrap();
    handle.set_muffled(true).unwrap();
    handle.stop().unwrap();
    handle.fade_out_and_dispose();
    handle.dispose();
    assert_eq!(handle.current_amplitude(), 0.0);
}
