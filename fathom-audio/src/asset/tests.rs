use std::path::Path;
use std::sync::Arc;

use super::*;
use crate::device::SoftwareDevice;

fn device() -> (Arc<SoftwareDevice>, Arc<dyn AudioDevice>) {
    let device = Arc::new(SoftwareDevice::new());
    let shared: Arc<dyn AudioDevice> = device.clone();
    (device, shared)
}

fn write_wav(path: &Path, channels: u16, rate: u32, samples: &[i16]) {
    let spec = hound::WavSpec {
        channels,
        sample_rate: rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for sample in samples {
        writer.write_sample(*sample).unwrap();
    }
    writer.finalize().unwrap();
}

#[test]
fn test_load_buffered_wav() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hit.wav");
    write_wav(&path, 2, 22_050, &[1000; 2 * 2205]);

    let (software, device) = device();
    let asset = SoundAsset::load(&device, &path, false).unwrap();
    assert!(!asset.is_streaming());
    assert_eq!(asset.channels(), 2);
    assert_eq!(asset.sample_rate(), 22_050);
    assert_eq!(asset.frames(), Some(2205));
    assert_eq!(software.buffer_count(), 2);

    let data = asset.buffered_data().unwrap();
    assert_eq!(
        device.buffer_len(data.normal).unwrap(),
        device.buffer_len(data.muffled).unwrap()
    );

    drop(asset);
    assert_eq!(software.buffer_count(), 0);
}

#[test]
fn test_load_streaming_wav_creates_no_buffers() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("music.wav");
    write_wav(&path, 1, 44_100, &[0; 4410]);

    let (software, device) = device();
    let asset = SoundAsset::load(&device, &path, true).unwrap();
    assert!(asset.is_streaming());
    assert_eq!(asset.frames(), None);
    assert_eq!(software.buffer_count(), 0);
    assert!(asset.open_reader().unwrap().is_some());
}

#[test]
fn test_missing_file_is_not_found() {
    let (_, device) = device();
    let err = SoundAsset::load(&device, Path::new("/nonexistent/boom.ogg"), false).unwrap_err();
    assert!(matches!(err, AudioError::AssetNotFound(_)));
}

#[test]
fn test_unknown_extension_is_unsupported() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("notes.mp3");
    std::fs::write(&path, b"not audio").unwrap();

    let (_, device) = device();
    let err = SoundAsset::load(&device, &path, true).unwrap_err();
    assert!(matches!(err, AudioError::UnsupportedFormat(_)));
}

#[test]
fn test_garbage_wav_is_malformed() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.wav");
    std::fs::write(&path, b"RIFF....WAVEjunk").unwrap();

    let (_, device) = device();
    let err = SoundAsset::load(&device, &path, false).unwrap_err();
    assert!(matches!(err, AudioError::MalformedAsset { .. }));
}

#[test]
fn test_pcm_must_split_into_frames() {
    let (_, device) = device();
    assert!(SoundAsset::from_pcm(&device, "odd", vec![0; 3], 2, 8000, false).is_err());
    assert!(SoundAsset::from_pcm(&device, "surround", vec![0; 6], 6, 8000, false).is_err());
    assert!(SoundAsset::from_pcm(&device, "ok", vec![0; 4], 2, 8000, false).is_ok());
}

#[test]
fn test_range_builders() {
    let (_, device) = device();
    let asset = SoundAsset::from_pcm(&device, "s", vec![0; 10], 1, 8000, false)
        .unwrap()
        .with_range(500.0)
        .with_gain(3.0);
    assert_eq!(asset.near(), 200.0);
    assert_eq!(asset.far(), 500.0);
    assert_eq!(asset.gain(), 1.0);

    let asset = asset.with_distances(50.0, 10.0);
    assert_eq!(asset.near(), 50.0);
    assert_eq!(asset.far(), 50.0);
}

#[test]
fn test_amplitude_envelope_tracks_peaks() {
    let (_, device) = device();
    // 1000 Hz, so one window is 50 frames
    let mut pcm = vec![0i16; 200];
    pcm[120] = i16::MAX;
    let asset = SoundAsset::from_pcm(&device, "blip", pcm, 1, 1000, false).unwrap();

    assert_eq!(asset.amplitude_at(0), 0.0);
    assert_eq!(asset.amplitude_at(110), 1.0);
    assert_eq!(asset.amplitude_at(160), 0.0);
    assert_eq!(asset.amplitude_at(10_000), 0.0);
}

#[test]
fn test_pool_and_chunk_by_variant() {
    let (_, device) = device();
    let config = AudioConfig::default();

    let stereo = SoundAsset::from_pcm(&device, "m", vec![0; 20], 2, 8000, true).unwrap();
    assert_eq!(stereo.pool(), PoolKind::General);
    assert_eq!(stereo.chunk_samples(&config), 8820);

    let voice = SoundAsset::voice(
        &device,
        Arc::new(VoiceFrameQueue::new(4)),
        Arc::new(crate::voice::QoaCodec),
        48_000,
    );
    assert_eq!(voice.pool(), PoolKind::Voice);
    assert_eq!(voice.chunk_samples(&config), config.voice.frame_samples);
    assert!(voice.open_reader().unwrap().is_some());
}

#[test]
fn test_implausible_sample_rate_is_malformed() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fast.wav");
    write_wav(&path, 1, 100_000_000, &[0; 64]);

    let (software, device) = device();
    for streaming in [false, true] {
        let err = SoundAsset::load(&device, &path, streaming).unwrap_err();
        assert!(matches!(err, AudioError::MalformedAsset { .. }));
    }
    assert_eq!(software.buffer_count(), 0);

    let err = SoundAsset::from_pcm(&device, "fast", vec![0; 8], 1, MAX_SAMPLE_RATE + 1, false)
        .unwrap_err();
    assert!(matches!(err, AudioError::MalformedAsset { .. }));
    assert!(SoundAsset::from_pcm(&device, "hi-res", vec![0; 8], 1, MAX_SAMPLE_RATE, false).is_ok());
}
