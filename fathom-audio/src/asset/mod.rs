//! Sound assets
//!
//! A [`SoundAsset`] is immutable audio shared by every channel that plays
//! it. Buffered assets are decoded once into two hardware buffers (normal
//! and low-pass "muffled") of equal length. Streaming assets keep only a
//! description of where samples come from; each channel opens its own
//! [`StreamReader`] and pulls fixed-size chunks from it.
//!
//! | Variant   | Samples from            | Pool    | Stream kind |
//! |-----------|-------------------------|---------|-------------|
//! | buffered  | file or memory, decoded | general | -           |
//! | pcm       | memory                  | general | reliable    |
//! | file      | `.ogg` / `.wav` on disk | general | reliable    |
//! | voice     | [`VoiceFrameQueue`]     | voice   | network     |
//! | loopback  | [`VoiceCapture`]        | voice   | live        |

mod decode;
mod filter;
mod reader;

pub use filter::MUFFLE_CUTOFF_HZ;
pub use reader::StreamKind;

pub(crate) use filter::MuffleFilter;
pub(crate) use reader::{Pulled, StreamReader};

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::AudioConfig;
use crate::device::{AudioDevice, BufferId, clamp_safe};
use crate::error::{AudioError, DeviceError, Result};
use crate::pool::PoolKind;
use crate::voice::{SpeechCodec, VoiceCapture, VoiceFrameQueue};
use decode::{DecodedAudio, FileDecoder, decode_file};

/// Default audible range (near = 40% of it)
pub const DEFAULT_RANGE: f32 = 1000.0;

/// Width of one amplitude envelope window
const AMPLITUDE_WINDOW_MS: u64 = 50;

/// Highest sample rate an asset may declare
pub const MAX_SAMPLE_RATE: u32 = 384_000;

static NEXT_ASSET_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) struct BufferedData {
    pub normal: BufferId,
    pub muffled: BufferId,
    pub frames: usize,
    envelope: Vec<f32>,
    window_frames: usize,
}

pub(crate) enum StreamSource {
    Pcm(Arc<[i16]>),
    File(PathBuf),
    Voice {
        queue: Arc<VoiceFrameQueue>,
        codec: Arc<dyn SpeechCodec>,
    },
    Loopback(Arc<Mutex<VoiceCapture>>),
}

pub(crate) enum AssetKind {
    Buffered(BufferedData),
    Streaming(StreamSource),
}

/// Immutable audio shared by channels.
pub struct SoundAsset {
    id: u64,
    name: String,
    sample_rate: u32,
    channels: u16,
    gain: f32,
    near: f32,
    far: f32,
    max_instances: Option<usize>,
    kind: AssetKind,
    device: Arc<dyn AudioDevice>,
}

/// Peak absolute amplitude (0.0-1.0) of every `window_frames` frames.
fn amplitude_envelope(samples: &[i16], channels: u16, window_frames: usize) -> Vec<f32> {
    let window = window_frames.max(1) * channels.max(1) as usize;
    samples.chunks(window).map(peak_amplitude).collect()
}

/// Peak absolute amplitude of a chunk (0.0-1.0)
pub(crate) fn peak_amplitude(samples: &[i16]) -> f32 {
    samples
        .iter()
        .map(|s| s.unsigned_abs())
        .max()
        .map_or(0.0, |peak| peak as f32 / i16::MAX as f32)
        .min(1.0)
}

fn check_format(name: &str, samples: &[i16], channels: u16, sample_rate: u32) -> Result<()> {
    let reason = if !(1..=2).contains(&channels) {
        format!("{channels} channels (mono or stereo only)")
    } else if !(1..=MAX_SAMPLE_RATE).contains(&sample_rate) {
        format!("unsupported sample rate {sample_rate} Hz")
    } else if samples.len() % channels as usize != 0 {
        format!("{} samples do not split into {} channels", samples.len(), channels)
    } else {
        return Ok(());
    };
    Err(AudioError::MalformedAsset {
        path: PathBuf::from(name),
        reason,
    })
}

impl SoundAsset {
    fn with_kind(
        device: &Arc<dyn AudioDevice>,
        name: String,
        sample_rate: u32,
        channels: u16,
        kind: AssetKind,
    ) -> Self {
        Self {
            id: NEXT_ASSET_ID.fetch_add(1, Ordering::Relaxed),
            name,
            sample_rate,
            channels,
            gain: 1.0,
            near: DEFAULT_RANGE * 0.4,
            far: DEFAULT_RANGE,
            max_instances: None,
            kind,
            device: device.clone(),
        }
    }

    /// Load a `.ogg` or `.wav` file, fully decoded or as a stream.
    ///
    /// Buffered loads decode the whole file on the calling thread.
    pub fn load(device: &Arc<dyn AudioDevice>, path: &Path, streaming: bool) -> Result<Self> {
        if !path.exists() {
            return Err(AudioError::AssetNotFound(path.to_path_buf()));
        }
        let name = path.display().to_string();

        if streaming {
            // Open once up front so format errors surface at load time
            let decoder = FileDecoder::open(path)?;
            let kind = AssetKind::Streaming(StreamSource::File(path.to_path_buf()));
            return Ok(Self::with_kind(
                device,
                name,
                decoder.sample_rate(),
                decoder.channels(),
                kind,
            ));
        }

        Self::buffered(device, name, decode_file(path)?)
    }

    /// Build an asset from interleaved PCM already in memory.
    pub fn from_pcm(
        device: &Arc<dyn AudioDevice>,
        name: &str,
        samples: Vec<i16>,
        channels: u16,
        sample_rate: u32,
        streaming: bool,
    ) -> Result<Self> {
        check_format(name, &samples, channels, sample_rate)?;
        if streaming {
            let kind = AssetKind::Streaming(StreamSource::Pcm(samples.into()));
            return Ok(Self::with_kind(device, name.to_string(), sample_rate, channels, kind));
        }
        Self::buffered(
            device,
            name.to_string(),
            DecodedAudio {
                samples,
                channels,
                sample_rate,
            },
        )
    }

    /// Network voice from `queue`, decoded with `codec`.
    pub fn voice(
        device: &Arc<dyn AudioDevice>,
        queue: Arc<VoiceFrameQueue>,
        codec: Arc<dyn SpeechCodec>,
        sample_rate: u32,
    ) -> Self {
        let kind = AssetKind::Streaming(StreamSource::Voice { queue, codec });
        Self::with_kind(device, "voice".to_string(), sample_rate, 1, kind)
    }

    /// Local microphone monitoring through the voice codec.
    pub fn loopback(device: &Arc<dyn AudioDevice>, capture: VoiceCapture) -> Self {
        let sample_rate = capture.sample_rate();
        let kind = AssetKind::Streaming(StreamSource::Loopback(Arc::new(Mutex::new(capture))));
        Self::with_kind(device, "loopback".to_string(), sample_rate, 1, kind)
    }

    fn buffered(device: &Arc<dyn AudioDevice>, name: String, audio: DecodedAudio) -> Result<Self> {
        let DecodedAudio {
            samples,
            channels,
            sample_rate,
        } = audio;

        let normal = device.create_buffer()?;
        let muffled = match device.create_buffer() {
            Ok(buffer) => buffer,
            Err(e) => {
                let _ = device.delete_buffer(normal);
                return Err(e.into());
            }
        };

        let upload = || -> std::result::Result<(), DeviceError> {
            device.buffer_data(normal, &samples, channels, sample_rate)?;
            let low = filter::muffle(&samples, channels, sample_rate);
            device.buffer_data(muffled, &low, channels, sample_rate)
        };
        if let Err(e) = upload() {
            let _ = device.delete_buffer(normal);
            let _ = device.delete_buffer(muffled);
            return Err(e.into());
        }

        let window_frames = (u64::from(sample_rate) * AMPLITUDE_WINDOW_MS / 1000).max(1) as usize;
        let frames = samples.len() / channels as usize;
        debug!(
            "Buffered {} ({} frames, {} ch, {} Hz)",
            name, frames, channels, sample_rate
        );

        let data = BufferedData {
            normal,
            muffled,
            frames,
            envelope: amplitude_envelope(&samples, channels, window_frames),
            window_frames,
        };
        Ok(Self::with_kind(
            device,
            name,
            sample_rate,
            channels,
            AssetKind::Buffered(data),
        ))
    }

    /// Base gain for new channels (clamped to 0.0-1.0)
    pub fn with_gain(mut self, gain: f32) -> Self {
        self.gain = clamp_safe(gain, 0.0, 1.0);
        self
    }

    /// Audible range: full volume within 40% of `range`, silent beyond it.
    pub fn with_range(mut self, range: f32) -> Self {
        let range = clamp_safe(range, 0.0, f32::MAX);
        self.near = range * 0.4;
        self.far = range;
        self
    }

    pub fn with_distances(mut self, near: f32, far: f32) -> Self {
        self.near = clamp_safe(near, 0.0, f32::MAX);
        self.far = clamp_safe(far, self.near, f32::MAX);
        self
    }

    /// Refuse new channels while `max` instances are already playing.
    pub fn with_max_instances(mut self, max: usize) -> Self {
        self.max_instances = Some(max);
        self
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    pub fn near(&self) -> f32 {
        self.near
    }

    pub fn far(&self) -> f32 {
        self.far
    }

    pub fn max_instances(&self) -> Option<usize> {
        self.max_instances
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self.kind, AssetKind::Streaming(_))
    }

    /// Which slot pool channels of this asset draw from
    pub fn pool(&self) -> PoolKind {
        match &self.kind {
            AssetKind::Streaming(StreamSource::Voice { .. } | StreamSource::Loopback(_)) => {
                PoolKind::Voice
            }
            _ => PoolKind::General,
        }
    }

    /// Length of a buffered asset in frames
    pub fn frames(&self) -> Option<usize> {
        match &self.kind {
            AssetKind::Buffered(data) => Some(data.frames),
            AssetKind::Streaming(_) => None,
        }
    }

    pub fn duration(&self) -> Option<Duration> {
        self.frames()
            .map(|frames| Duration::from_secs_f64(frames as f64 / self.sample_rate as f64))
    }

    pub(crate) fn kind(&self) -> &AssetKind {
        &self.kind
    }

    pub(crate) fn buffered_data(&self) -> Option<&BufferedData> {
        match &self.kind {
            AssetKind::Buffered(data) => Some(data),
            AssetKind::Streaming(_) => None,
        }
    }

    /// Peak amplitude around `frame` of a buffered asset
    pub fn amplitude_at(&self, frame: usize) -> f32 {
        self.buffered_data()
            .and_then(|data| data.envelope.get(frame / data.window_frames).copied())
            .unwrap_or(0.0)
    }

    /// Open a fresh reader for a new streaming channel.
    pub(crate) fn open_reader(&self) -> Result<Option<StreamReader>> {
        let AssetKind::Streaming(source) = &self.kind else {
            return Ok(None);
        };
        let reader = match source {
            StreamSource::Pcm(samples) => StreamReader::Pcm {
                samples: samples.clone(),
                channels: self.channels,
                cursor: 0,
            },
            StreamSource::File(path) => StreamReader::File(FileDecoder::open(path)?),
            StreamSource::Voice { queue, codec } => StreamReader::Voice {
                queue: queue.clone(),
                codec: codec.clone(),
                next_frame: 0,
                packet: Vec::new(),
                decoded: Vec::new(),
            },
            StreamSource::Loopback(capture) => StreamReader::Loopback {
                capture: capture.clone(),
                decoded: Vec::new(),
            },
        };
        Ok(Some(reader))
    }

    /// Samples per refill chunk for a stream of this asset
    pub(crate) fn chunk_samples(&self, config: &AudioConfig) -> usize {
        match &self.kind {
            AssetKind::Streaming(StreamSource::Voice { .. } | StreamSource::Loopback(_)) => {
                config.voice.frame_samples
            }
            _ => {
                let ch = self.channels.max(1) as usize;
                (config.streaming.chunk_samples / ch).max(1) * ch
            }
        }
    }
}

impl Drop for SoundAsset {
    fn drop(&mut self) {
        if let AssetKind::Buffered(data) = &self.kind {
            for buffer in [data.normal, data.muffled] {
                if let Err(e) = self.device.delete_buffer(buffer) {
                    warn!("Failed to release buffer of {}: {}", self.name, e);
                }
            }
        }
    }
}

impl std::fmt::Debug for SoundAsset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoundAsset")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("streaming", &self.is_streaming())
            .field("sample_rate", &self.sample_rate)
            .field("channels", &self.channels)
            .finish()
    }
}

#[cfg(test)]
mod tests;
