//! Playback channels
//!
//! A [`PlaybackChannel`] is one live instance of a [`SoundAsset`] bound to a
//! hardware source from a [`SourcePool`](crate::pool::SourcePool). Buffered
//! channels play straight from the asset's precomputed buffers; streaming
//! channels own a private set of buffers that the streaming worker rotates.
//!
//! All hardware access for a channel happens under the channel's own lock, so
//! a refill on the worker thread can never interleave with a disposal or a
//! parameter change from a caller.

mod stream;

pub(crate) use stream::StreamState;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use glam::Vec3;
use tracing::{debug, warn};

use crate::asset::{SoundAsset, StreamKind};
use crate::category::CategoryTable;
use crate::config::AudioConfig;
use crate::device::{AudioDevice, SourceId, SourceState, clamp_safe};
use crate::error::{AudioError, DeviceError, Result};
use crate::worker::StreamingWorker;

/// Gain removed per worker tick while fading out
const FADE_STEP: f32 = 0.1;

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Never obtained a source
    Unassigned,
    /// Holds a source but has not started
    Assigned,
    Playing,
    /// Holds a source that finished or was stopped
    Stopped,
    Disposed,
}

/// Initial parameters of a new channel
#[derive(Debug, Clone)]
pub struct ChannelParams {
    pub gain: f32,
    /// World position, or `None` for a listener-relative sound
    pub position: Option<Vec3>,
    pub category: String,
    pub muffled: bool,
    pub looping: bool,
}

impl Default for ChannelParams {
    fn default() -> Self {
        Self {
            gain: 1.0,
            position: None,
            category: "default".to_string(),
            muffled: false,
            looping: false,
        }
    }
}

struct ChannelInner {
    source: Option<SourceId>,
    started: bool,
    disposed: bool,
    gain: f32,
    position: Option<Vec3>,
    near: f32,
    far: f32,
    category: String,
    muffled: bool,
    /// Muffle state currently bound to the source
    applied_muffle: bool,
    looping: bool,
    fading: bool,
    stream: Option<StreamState>,
}

/// One playback instance of an asset.
pub struct PlaybackChannel {
    id: u64,
    asset: Arc<SoundAsset>,
    device: Arc<dyn AudioDevice>,
    categories: Arc<CategoryTable>,
    inner: Mutex<ChannelInner>,
}

impl PlaybackChannel {
    pub(crate) fn new(
        asset: Arc<SoundAsset>,
        device: Arc<dyn AudioDevice>,
        categories: Arc<CategoryTable>,
        params: ChannelParams,
    ) -> Self {
        let inner = ChannelInner {
            source: None,
            started: false,
            disposed: false,
            gain: clamp_safe(params.gain, 0.0, 1.0),
            position: params.position,
            near: asset.near(),
            far: asset.far(),
            category: params.category.to_ascii_lowercase(),
            muffled: params.muffled,
            applied_muffle: false,
            looping: params.looping,
            fading: false,
            stream: None,
        };
        Self {
            id: NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed),
            asset,
            device,
            categories,
            inner: Mutex::new(inner),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ChannelInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn asset(&self) -> &Arc<SoundAsset> {
        &self.asset
    }

    pub fn is_streaming(&self) -> bool {
        self.asset.is_streaming()
    }

    fn effective_gain(&self, inner: &ChannelInner) -> f32 {
        let gain = inner.gain * self.asset.gain() * self.categories.gain(&inner.category);
        clamp_safe(gain, 0.0, 1.0)
    }

    fn effective_muffle(&self, inner: &ChannelInner) -> bool {
        inner.muffled || self.categories.muted(&inner.category)
    }

    /// Bind to `source` and start playback.
    ///
    /// Streaming channels fill every buffer before the source starts. On
    /// error the channel is left disposed.
    pub(crate) fn start(&self, source: SourceId, config: &AudioConfig) -> Result<()> {
        let mut inner = self.lock();
        if inner.disposed {
            return Err(DeviceError::InvalidOperation("channel was disposed").into());
        }
        inner.source = Some(source);
        inner.started = true;
        let result = self.start_locked(&mut inner, source, config);
        if let Err(e) = &result {
            warn!("Failed to start {}: {}", self.asset.name(), e);
            self.release(&mut inner);
        }
        result
    }

    fn start_locked(
        &self,
        inner: &mut ChannelInner,
        source: SourceId,
        config: &AudioConfig,
    ) -> Result<()> {
        let device = self.device.as_ref();
        let muffle = self.effective_muffle(inner);

        device.stop(source)?;
        device.bind_buffer(source, None)?;
        device.set_position(source, inner.position)?;
        device.set_distances(source, inner.near, inner.far)?;
        device.set_gain(source, self.effective_gain(inner))?;

        if let Some(data) = self.asset.buffered_data() {
            device.set_looping(source, inner.looping)?;
            let buffer = if muffle { data.muffled } else { data.normal };
            device.bind_buffer(source, Some(buffer))?;
            device.set_sample_offset(source, 0)?;
            inner.applied_muffle = muffle;
            device.play(source)?;
            return Ok(());
        }

        // Streams loop in the reader, never in the source
        device.set_looping(source, false)?;
        let Some(reader) = self.asset.open_reader()? else {
            return Ok(());
        };
        let mut stream = StreamState::new(
            device,
            reader,
            self.asset.channels(),
            self.asset.sample_rate(),
            self.asset.chunk_samples(config),
            config.voice.miss_threshold,
        )?;
        // Stored before the fill so a failure still releases the buffers
        let fill = stream.refill(device, source, muffle, inner.looping);
        inner.stream = Some(stream);
        inner.applied_muffle = muffle;
        fill
    }

    /// True while the channel holds a source and has not finished.
    ///
    /// A stream that reached its end reports false at once, even while its
    /// last queued buffers are still audible.
    pub fn is_playing(&self) -> bool {
        let inner = self.lock();
        self.is_playing_locked(&inner)
    }

    fn is_playing_locked(&self, inner: &ChannelInner) -> bool {
        let Some(source) = inner.source else {
            return false;
        };
        match &inner.stream {
            Some(stream) => !stream.reached_end(),
            None => matches!(self.device.source_state(source), Ok(SourceState::Playing)),
        }
    }

    pub fn state(&self) -> ChannelState {
        let inner = self.lock();
        if inner.disposed {
            ChannelState::Disposed
        } else if inner.source.is_none() {
            ChannelState::Unassigned
        } else if !inner.started {
            ChannelState::Assigned
        } else if self.is_playing_locked(&inner) {
            ChannelState::Playing
        } else {
            ChannelState::Stopped
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.lock().disposed
    }

    pub fn gain(&self) -> f32 {
        self.lock().gain
    }

    pub fn set_gain(&self, gain: f32) -> Result<()> {
        let mut inner = self.lock();
        inner.gain = clamp_safe(gain, 0.0, 1.0);
        self.apply_gain(&inner)
    }

    fn apply_gain(&self, inner: &ChannelInner) -> Result<()> {
        if let Some(source) = inner.source {
            self.device.set_gain(source, self.effective_gain(inner))?;
        }
        Ok(())
    }

    pub fn position(&self) -> Option<Vec3> {
        self.lock().position
    }

    pub fn set_position(&self, position: Option<Vec3>) -> Result<()> {
        let mut inner = self.lock();
        inner.position = position;
        if let Some(source) = inner.source {
            self.device.set_position(source, position)?;
        }
        Ok(())
    }

    pub fn distances(&self) -> (f32, f32) {
        let inner = self.lock();
        (inner.near, inner.far)
    }

    pub fn set_distances(&self, near: f32, far: f32) -> Result<()> {
        let mut inner = self.lock();
        inner.near = clamp_safe(near, 0.0, f32::MAX);
        inner.far = clamp_safe(far, inner.near, f32::MAX);
        if let Some(source) = inner.source {
            self.device.set_distances(source, inner.near, inner.far)?;
        }
        Ok(())
    }

    pub fn muffled(&self) -> bool {
        self.lock().muffled
    }

    pub fn set_muffled(&self, muffled: bool) -> Result<()> {
        let mut inner = self.lock();
        inner.muffled = muffled;
        self.apply_muffle(&mut inner)
    }

    /// Bind whichever buffer the channel and category flags call for.
    fn apply_muffle(&self, inner: &mut ChannelInner) -> Result<()> {
        let muffle = self.effective_muffle(inner);
        if muffle == inner.applied_muffle {
            return Ok(());
        }
        let Some(source) = inner.source else {
            inner.applied_muffle = muffle;
            return Ok(());
        };
        // Streams pick the flag up on their next refill
        let Some(data) = self.asset.buffered_data() else {
            inner.applied_muffle = muffle;
            return Ok(());
        };

        let device = self.device.as_ref();
        let buffer = if muffle { data.muffled } else { data.normal };
        let playing = device.source_state(source)? == SourceState::Playing;
        if playing {
            let offset = device.sample_offset(source)?;
            device.stop(source)?;
            device.bind_buffer(source, Some(buffer))?;
            device.set_sample_offset(source, offset.min(data.frames))?;
            device.play(source)?;
        } else {
            device.bind_buffer(source, Some(buffer))?;
        }
        inner.applied_muffle = muffle;
        debug!(channel = self.id, muffle, "Rebound channel buffer");
        Ok(())
    }

    /// Muffle state currently bound to the hardware
    pub fn is_muffle_applied(&self) -> bool {
        self.lock().applied_muffle
    }

    pub fn looping(&self) -> bool {
        self.lock().looping
    }

    pub fn set_looping(&self, looping: bool) -> Result<()> {
        let mut inner = self.lock();
        inner.looping = looping;
        if let Some(source) = inner.source
            && inner.stream.is_none()
        {
            self.device.set_looping(source, looping)?;
        }
        Ok(())
    }

    pub fn category(&self) -> String {
        self.lock().category.clone()
    }

    /// Re-read category gain and mute state.
    pub(crate) fn refresh_category(&self) -> Result<()> {
        let mut inner = self.lock();
        if inner.disposed {
            return Ok(());
        }
        self.apply_gain(&inner)?;
        self.apply_muffle(&mut inner)
    }

    pub(crate) fn in_category(&self, category: &str) -> bool {
        self.lock().category.eq_ignore_ascii_case(category)
    }

    /// Stop playback but keep the source until the slot is reclaimed.
    pub fn stop(&self) -> Result<()> {
        let mut inner = self.lock();
        if let Some(stream) = inner.stream.as_mut() {
            stream.end();
        }
        if let Some(source) = inner.source {
            self.device.stop(source)?;
        }
        Ok(())
    }

    /// Release the source and any stream buffers. Idempotent.
    pub fn dispose(&self) {
        let mut inner = self.lock();
        self.release(&mut inner);
    }

    fn release(&self, inner: &mut ChannelInner) {
        if inner.disposed {
            return;
        }
        inner.disposed = true;
        inner.fading = false;
        let device = self.device.as_ref();
        if let Some(source) = inner.source.take() {
            if let Err(e) = device.stop(source) {
                warn!("Failed to stop source {:?}: {}", source, e);
            }
            if let Err(e) = device.bind_buffer(source, None) {
                warn!("Failed to unbind source {:?}: {}", source, e);
            }
        }
        if let Some(stream) = inner.stream.take() {
            stream.release(device);
        }
        debug!(channel = self.id, "Disposed channel of {}", self.asset.name());
    }

    /// Hardware playback position of a buffered channel, in frames
    pub fn sample_offset(&self) -> Option<usize> {
        let inner = self.lock();
        if inner.stream.is_some() {
            return None;
        }
        inner
            .source
            .and_then(|source| self.device.sample_offset(source).ok())
    }

    /// Peak amplitude around the current playback position
    pub fn current_amplitude(&self) -> f32 {
        let inner = self.lock();
        if let Some(stream) = &inner.stream {
            return if stream.reached_end() { 0.0 } else { stream.amplitude() };
        }
        if !self.is_playing_locked(&inner) {
            return 0.0;
        }
        inner
            .source
            .and_then(|source| self.device.sample_offset(source).ok())
            .map_or(0.0, |offset| self.asset.amplitude_at(offset))
    }

    /// Amplitude scaled by gain and linear distance falloff from `listener`
    pub(crate) fn loudness(&self, listener: Vec3) -> f32 {
        let amplitude = self.current_amplitude();
        if amplitude <= 0.0 {
            return 0.0;
        }
        let inner = self.lock();
        let falloff = match inner.position {
            Some(position) => {
                let range = (inner.far - inner.near).max(f32::EPSILON);
                let distance = position.distance(listener);
                clamp_safe(1.0 - (distance - inner.near) / range, 0.0, 1.0)
            }
            None => 1.0,
        };
        amplitude * self.effective_gain(&inner) * falloff
    }

    pub fn stream_position(&self) -> Option<u64> {
        self.lock().stream.as_ref().map(StreamState::position)
    }

    pub fn set_stream_position(&self, frame: u64) -> Result<()> {
        let mut inner = self.lock();
        match inner.stream.as_mut() {
            Some(stream) => stream.seek(frame),
            None if self.asset.is_streaming() => Ok(()),
            None => Err(AudioError::NotStreaming),
        }
    }

    pub fn stream_kind(&self) -> Option<StreamKind> {
        self.lock().stream.as_ref().map(StreamState::kind)
    }

    pub fn stream_misses(&self) -> Option<u32> {
        self.lock().stream.as_ref().map(StreamState::misses)
    }

    pub fn is_fading(&self) -> bool {
        self.lock().fading
    }

    pub(crate) fn begin_fade(&self) {
        let mut inner = self.lock();
        if !inner.disposed {
            inner.fading = true;
        }
    }

    /// One worker tick of a fade-out. Returns true once the channel is disposed.
    pub(crate) fn step_fade(&self) -> bool {
        let mut inner = self.lock();
        if inner.disposed {
            return true;
        }
        inner.gain = (inner.gain - FADE_STEP).max(0.0);
        if inner.gain <= 0.0 {
            self.release(&mut inner);
            return true;
        }
        if let Err(e) = self.apply_gain(&inner) {
            warn!("Fade failed on {}: {}", self.asset.name(), e);
            self.release(&mut inner);
            return true;
        }
        false
    }

    /// Refill a streaming channel, disposing it once it has played out or a
    /// refill fails.
    ///
    /// Returns false when the worker should forget the channel.
    pub(crate) fn service_stream(&self) -> Result<bool> {
        let mut inner = self.lock();
        let (Some(source), false) = (inner.source, inner.disposed) else {
            return Ok(false);
        };
        let muffle = self.effective_muffle(&inner);
        let looping = inner.looping;
        let Some(stream) = inner.stream.as_mut() else {
            return Ok(false);
        };
        let device = self.device.as_ref();

        if stream.drained(device, source) {
            self.release(&mut inner);
            return Ok(false);
        }
        if let Err(e) = stream.refill(device, source, muffle, looping) {
            // A failed refill ends the stream; the slot goes back to the pool
            stream.end();
            self.release(&mut inner);
            return Err(e);
        }
        inner.applied_muffle = muffle;
        Ok(true)
    }
}

impl std::fmt::Debug for PlaybackChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackChannel")
            .field("id", &self.id)
            .field("asset", &self.asset.name())
            .finish_non_exhaustive()
    }
}

/// Caller-facing handle to a channel.
///
/// A handle created without a free slot is inert: every setter succeeds and
/// does nothing, and every query reports a silent, stopped channel.
#[derive(Clone, Default)]
pub struct ChannelHandle {
    channel: Option<Arc<PlaybackChannel>>,
    worker: Option<Arc<StreamingWorker>>,
}

impl ChannelHandle {
    pub(crate) fn new(channel: Arc<PlaybackChannel>, worker: Arc<StreamingWorker>) -> Self {
        Self {
            channel: Some(channel),
            worker: Some(worker),
        }
    }

    pub fn inert() -> Self {
        Self::default()
    }

    pub fn is_inert(&self) -> bool {
        self.channel.is_none()
    }

    pub fn channel(&self) -> Option<&Arc<PlaybackChannel>> {
        self.channel.as_ref()
    }

    pub fn asset(&self) -> Option<&Arc<SoundAsset>> {
        self.channel.as_ref().map(|c| c.asset())
    }

    pub fn is_playing(&self) -> bool {
        self.channel.as_ref().is_some_and(|c| c.is_playing())
    }

    pub fn state(&self) -> ChannelState {
        self.channel
            .as_ref()
            .map_or(ChannelState::Unassigned, |c| c.state())
    }

    pub fn gain(&self) -> f32 {
        self.channel.as_ref().map_or(0.0, |c| c.gain())
    }

    pub fn set_gain(&self, gain: f32) -> Result<()> {
        self.channel.as_ref().map_or(Ok(()), |c| c.set_gain(gain))
    }

    pub fn position(&self) -> Option<Vec3> {
        self.channel.as_ref().and_then(|c| c.position())
    }

    pub fn set_position(&self, position: Option<Vec3>) -> Result<()> {
        self.channel
            .as_ref()
            .map_or(Ok(()), |c| c.set_position(position))
    }

    pub fn set_distances(&self, near: f32, far: f32) -> Result<()> {
        self.channel
            .as_ref()
            .map_or(Ok(()), |c| c.set_distances(near, far))
    }

    pub fn muffled(&self) -> bool {
        self.channel.as_ref().is_some_and(|c| c.muffled())
    }

    pub fn set_muffled(&self, muffled: bool) -> Result<()> {
        self.channel
            .as_ref()
            .map_or(Ok(()), |c| c.set_muffled(muffled))
    }

    pub fn looping(&self) -> bool {
        self.channel.as_ref().is_some_and(|c| c.looping())
    }

    pub fn set_looping(&self, looping: bool) -> Result<()> {
        self.channel
            .as_ref()
            .map_or(Ok(()), |c| c.set_looping(looping))
    }

    pub fn category(&self) -> Option<String> {
        self.channel.as_ref().map(|c| c.category())
    }

    pub fn current_amplitude(&self) -> f32 {
        self.channel.as_ref().map_or(0.0, |c| c.current_amplitude())
    }

    pub fn sample_offset(&self) -> Option<usize> {
        self.channel.as_ref().and_then(|c| c.sample_offset())
    }

    pub fn stream_position(&self) -> Option<u64> {
        self.channel.as_ref().and_then(|c| c.stream_position())
    }

    /// Seek a streaming channel to `frame`.
    pub fn set_stream_position(&self, frame: u64) -> Result<()> {
        self.channel
            .as_ref()
            .map_or(Ok(()), |c| c.set_stream_position(frame))
    }

    pub fn stop(&self) -> Result<()> {
        self.channel.as_ref().map_or(Ok(()), |c| c.stop())
    }

    pub fn dispose(&self) {
        if let Some(channel) = &self.channel {
            channel.dispose();
        }
    }

    /// Lower the gain over a few worker ticks, then dispose.
    pub fn fade_out_and_dispose(&self) {
        let (Some(channel), Some(worker)) = (&self.channel, &self.worker) else {
            return;
        };
        channel.begin_fade();
        worker.register(channel.clone());
    }
}

impl std::fmt::Debug for ChannelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.channel {
            Some(channel) => f.debug_tuple("ChannelHandle").field(channel).finish(),
            None => f.write_str("ChannelHandle(inert)"),
        }
    }
}

#[cfg(test)]
mod tests;
