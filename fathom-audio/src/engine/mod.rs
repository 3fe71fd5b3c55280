//! The engine context
//!
//! [`AudioEngine`] owns the device, both source pools, the category table,
//! the listener and the streaming worker. It is constructed once and passed
//! to whatever needs to play sound.
//!
//! Lock order, outermost first: pool, channel, category table, device. The
//! worker thread only ever takes channel locks.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use glam::Vec3;
use tracing::{debug, error, info, warn};

use crate::asset::SoundAsset;
use crate::capture::{CaptureDevice, CpalCapture};
use crate::category::{CategoryTable, USER_LAYER, VOICE_ATTENUATION_LAYER};
use crate::channel::{ChannelHandle, ChannelParams, PlaybackChannel};
use crate::config::AudioConfig;
use crate::device::{AudioDevice, Listener, SoftwareDevice, clamp_safe};
use crate::error::Result;
use crate::output::DeviceOutput;
use crate::pool::{PoolKind, SourcePool};
use crate::voice::{QoaCodec, SpeechCodec, VoiceCapture, VoiceFrameQueue};
use crate::worker::StreamingWorker;

/// Categories ducked while voice chat is active
pub const ATTENUATED_CATEGORIES: [&str; 4] = ["default", "ui", "waterambience", "music"];

/// Time after the last attenuation request before ducking starts to relax
const ATTENUATION_HOLD: Duration = Duration::from_millis(200);

/// Per-update smoothing of compression recovery
const COMPRESSION_RECOVERY: f32 = 0.05;

struct Dynamics {
    voice_attenuation: f32,
    last_attenuation: Option<Instant>,
    compression: f32,
    disconnected: bool,
}

impl Default for Dynamics {
    fn default() -> Self {
        Self {
            voice_attenuation: 1.0,
            last_attenuation: None,
            compression: 1.0,
            disconnected: false,
        }
    }
}

/// Compression gain for an aggregate playback amplitude
fn compression_target(amplitude: f32) -> f32 {
    if amplitude <= 0.0 {
        return 1.0;
    }
    ((1.0 / amplitude).min(1.0) - 1.0) * 0.5 + 1.0
}

pub struct AudioEngine {
    config: AudioConfig,
    device: Arc<dyn AudioDevice>,
    general: SourcePool,
    voice: SourcePool,
    categories: Arc<CategoryTable>,
    worker: Arc<StreamingWorker>,
    listener: Mutex<Listener>,
    dynamics: Mutex<Dynamics>,
    shut_down: AtomicBool,
}

impl AudioEngine {
    /// Build an engine on `device` with a background streaming worker.
    pub fn new(config: AudioConfig, device: Arc<dyn AudioDevice>) -> Result<Self> {
        let period = Duration::from_millis(config.streaming.worker_period_ms);
        Self::with_worker(config, device, StreamingWorker::new(period))
    }

    /// Build an engine whose streams only advance on [`pump_streams`](Self::pump_streams).
    ///
    /// Used for offline rendering and deterministic tests.
    pub fn with_manual_streaming(config: AudioConfig, device: Arc<dyn AudioDevice>) -> Result<Self> {
        Self::with_worker(config, device, StreamingWorker::manual())
    }

    fn with_worker(
        config: AudioConfig,
        device: Arc<dyn AudioDevice>,
        worker: StreamingWorker,
    ) -> Result<Self> {
        config.validate()?;
        let general = SourcePool::new(PoolKind::General, device.as_ref(), config.pools.general)?;
        let voice = match SourcePool::new(PoolKind::Voice, device.as_ref(), config.pools.voice) {
            Ok(pool) => pool,
            Err(e) => {
                general.delete_sources(device.as_ref());
                return Err(e);
            }
        };

        let listener = Listener {
            gain: clamp_safe(config.output.master_volume, 0.0, 1.0),
            ..Listener::default()
        };
        device.set_listener(listener)?;

        info!(
            "Audio engine ready ({} general, {} voice sources)",
            general.capacity(),
            voice.capacity()
        );

        Ok(Self {
            config,
            device,
            general,
            voice,
            categories: Arc::new(CategoryTable::new()),
            worker: Arc::new(worker),
            listener: Mutex::new(listener),
            dynamics: Mutex::new(Dynamics::default()),
            shut_down: AtomicBool::new(false),
        })
    }

    /// Software device played through the configured cpal output.
    ///
    /// The returned [`DeviceOutput`] must be kept alive for sound to be heard.
    pub fn open_default(config: AudioConfig) -> Result<(Self, DeviceOutput)> {
        let device = Arc::new(SoftwareDevice::new());
        let output = DeviceOutput::open(device.clone(), config.output.device.as_deref())?;
        let engine = Self::new(config, device)?;
        Ok((engine, output))
    }

    pub fn config(&self) -> &AudioConfig {
        &self.config
    }

    pub fn device(&self) -> &Arc<dyn AudioDevice> {
        &self.device
    }

    pub fn categories(&self) -> &Arc<CategoryTable> {
        &self.categories
    }

    fn pool(&self, kind: PoolKind) -> &SourcePool {
        match kind {
            PoolKind::General => &self.general,
            PoolKind::Voice => &self.voice,
        }
    }

    fn all_channels(&self) -> impl Iterator<Item = Arc<PlaybackChannel>> {
        self.general
            .channels()
            .into_iter()
            .chain(self.voice.channels())
    }

    // Assets

    pub fn load_asset(&self, path: &Path, streaming: bool) -> Result<Arc<SoundAsset>> {
        Ok(Arc::new(SoundAsset::load(&self.device, path, streaming)?))
    }

    pub fn asset_from_pcm(
        &self,
        name: &str,
        samples: Vec<i16>,
        channels: u16,
        sample_rate: u32,
        streaming: bool,
    ) -> Result<Arc<SoundAsset>> {
        let asset =
            SoundAsset::from_pcm(&self.device, name, samples, channels, sample_rate, streaming)?;
        Ok(Arc::new(asset))
    }

    /// Empty incoming queue sized from the voice config
    pub fn create_voice_queue(&self) -> Arc<VoiceFrameQueue> {
        Arc::new(VoiceFrameQueue::new(self.config.voice.queue_capacity))
    }

    /// Network voice asset decoded with the default codec
    pub fn voice_asset(&self, queue: Arc<VoiceFrameQueue>) -> Arc<SoundAsset> {
        self.voice_asset_with_codec(queue, Arc::new(QoaCodec))
    }

    pub fn voice_asset_with_codec(
        &self,
        queue: Arc<VoiceFrameQueue>,
        codec: Arc<dyn SpeechCodec>,
    ) -> Arc<SoundAsset> {
        Arc::new(SoundAsset::voice(
            &self.device,
            queue,
            codec,
            self.config.voice.sample_rate,
        ))
    }

    /// Voice capture over `device`, publishing into a fresh outgoing queue
    pub fn voice_capture(&self, device: Box<dyn CaptureDevice>) -> VoiceCapture {
        VoiceCapture::new(
            device,
            Arc::new(QoaCodec),
            self.create_voice_queue(),
            &self.config.voice,
        )
    }

    /// Voice capture on the configured microphone
    pub fn open_microphone(&self) -> Result<VoiceCapture> {
        let mic = CpalCapture::open(
            self.config.voice.capture_device.as_deref(),
            self.config.voice.sample_rate,
        )?;
        Ok(self.voice_capture(Box::new(mic)))
    }

    pub fn loopback_asset(&self, capture: VoiceCapture) -> Arc<SoundAsset> {
        Arc::new(SoundAsset::loopback(&self.device, capture))
    }

    // Playback

    /// Play `asset` once, unmuffled.
    ///
    /// Returns an inert handle when no source is free; errors only on
    /// hardware failure.
    pub fn play(
        &self,
        asset: &Arc<SoundAsset>,
        gain: f32,
        position: Option<Vec3>,
        category: &str,
    ) -> Result<ChannelHandle> {
        self.create_channel(
            asset,
            ChannelParams {
                gain,
                position,
                category: category.to_string(),
                ..ChannelParams::default()
            },
        )
    }

    pub fn create_channel(
        &self,
        asset: &Arc<SoundAsset>,
        params: ChannelParams,
    ) -> Result<ChannelHandle> {
        if self.shut_down.load(Ordering::Acquire) {
            return Ok(ChannelHandle::inert());
        }
        let assigned = self.pool(asset.pool()).assign(asset, |source| {
            let channel = Arc::new(PlaybackChannel::new(
                asset.clone(),
                self.device.clone(),
                self.categories.clone(),
                params,
            ));
            channel.start(source, &self.config)?;
            Ok(channel)
        })?;

        let Some(channel) = assigned else {
            return Ok(ChannelHandle::inert());
        };
        if channel.is_streaming() {
            self.worker.register(channel.clone());
        }
        Ok(ChannelHandle::new(channel, self.worker.clone()))
    }

    // Categories

    pub fn set_category_gain(&self, category: &str, gain: f32) -> Result<()> {
        self.set_category_gain_layer(category, USER_LAYER, gain)
    }

    pub fn set_category_gain_layer(&self, category: &str, layer: usize, gain: f32) -> Result<()> {
        self.categories.set_gain(category, layer, gain);
        self.refresh_category(category)
    }

    pub fn category_gain(&self, category: &str) -> f32 {
        self.categories.gain(category)
    }

    /// Mute a category by muffling every channel in it.
    pub fn set_category_mute(&self, category: &str, muted: bool) -> Result<()> {
        self.categories.set_muted(category, muted);
        self.refresh_category(category)
    }

    pub fn category_muted(&self, category: &str) -> bool {
        self.categories.muted(category)
    }

    fn refresh_category(&self, category: &str) -> Result<()> {
        for channel in self.all_channels().filter(|c| c.in_category(category)) {
            channel.refresh_category()?;
        }
        Ok(())
    }

    // Listener

    fn lock_listener(&self) -> MutexGuard<'_, Listener> {
        self.listener.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_dynamics(&self) -> MutexGuard<'_, Dynamics> {
        self.dynamics.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn push_listener(&self, listener: Listener) -> Result<()> {
        let compression = if self.config.output.dynamic_range_compression {
            self.lock_dynamics().compression
        } else {
            1.0
        };
        let applied = Listener {
            gain: listener.gain * compression,
            ..listener
        };
        self.device.set_listener(applied)?;
        Ok(())
    }

    pub fn listener(&self) -> Listener {
        *self.lock_listener()
    }

    pub fn set_listener_position(&self, position: Vec3) -> Result<()> {
        let mut listener = self.lock_listener();
        listener.position = position;
        self.push_listener(*listener)
    }

    pub fn set_listener_orientation(&self, target: Vec3, up: Vec3) -> Result<()> {
        let mut listener = self.lock_listener();
        listener.target = target;
        listener.up = up;
        self.push_listener(*listener)
    }

    /// Master gain, clamped to 0.0-1.0
    pub fn set_listener_gain(&self, gain: f32) -> Result<()> {
        let mut listener = self.lock_listener();
        listener.gain = clamp_safe(gain, 0.0, 1.0);
        self.push_listener(*listener)
    }

    // Voice ducking and dynamics

    /// Duck the ambient categories to `gain` while someone speaks.
    pub fn attenuate_for_voice(&self, gain: f32) -> Result<()> {
        if !self.config.voice.attenuation_enabled {
            return Ok(());
        }
        let gain = clamp_safe(gain, 0.0, 1.0);
        {
            let mut dynamics = self.lock_dynamics();
            dynamics.voice_attenuation = gain;
            dynamics.last_attenuation = Some(Instant::now());
        }
        self.apply_voice_attenuation(gain)
    }

    pub fn voice_attenuation(&self) -> f32 {
        self.lock_dynamics().voice_attenuation
    }

    fn apply_voice_attenuation(&self, gain: f32) -> Result<()> {
        for category in ATTENUATED_CATEGORIES {
            self.set_category_gain_layer(category, VOICE_ATTENUATION_LAYER, gain)?;
        }
        Ok(())
    }

    /// Sum of every playing channel's amplitude as heard by the listener
    pub fn playback_amplitude(&self) -> f32 {
        let listener = self.lock_listener().position;
        self.all_channels().map(|c| c.loudness(listener)).sum()
    }

    pub fn compression_gain(&self) -> f32 {
        self.lock_dynamics().compression
    }

    /// Periodic housekeeping; call once per frame.
    ///
    /// Detects device loss, relaxes voice ducking, updates dynamic range
    /// compression and relaunches the streaming worker if needed.
    pub fn update(&self) -> Result<()> {
        if self.shut_down.load(Ordering::Acquire) {
            return Ok(());
        }
        {
            let mut dynamics = self.lock_dynamics();
            if dynamics.disconnected {
                return Ok(());
            }
            if !self.device.is_connected() {
                error!("Audio device disconnected");
                dynamics.disconnected = true;
                return Ok(());
            }
        }

        let relaxed = {
            let mut dynamics = self.lock_dynamics();
            let held = dynamics
                .last_attenuation
                .is_some_and(|t| t.elapsed() < ATTENUATION_HOLD);
            if !held && dynamics.voice_attenuation < 1.0 {
                let g = dynamics.voice_attenuation * 0.9 + 0.1;
                dynamics.voice_attenuation = if g > 0.99 { 1.0 } else { g };
                Some(dynamics.voice_attenuation)
            } else {
                None
            }
        };
        if let Some(gain) = relaxed {
            self.apply_voice_attenuation(gain)?;
        }

        if self.config.output.dynamic_range_compression {
            let target = compression_target(self.playback_amplitude());
            {
                let mut dynamics = self.lock_dynamics();
                dynamics.compression = if target < dynamics.compression {
                    target
                } else {
                    dynamics.compression + (target - dynamics.compression) * COMPRESSION_RECOVERY
                };
            }
            let listener = *self.lock_listener();
            self.push_listener(listener)?;
        }

        self.worker.ensure_running();
        Ok(())
    }

    pub fn is_disconnected(&self) -> bool {
        self.lock_dynamics().disconnected
    }

    /// Service streams once on the calling thread (manual streaming mode).
    pub fn pump_streams(&self) -> usize {
        self.worker.tick()
    }

    pub fn streaming_worker(&self) -> &Arc<StreamingWorker> {
        &self.worker
    }

    // Queries

    pub fn is_playing(&self, asset: &SoundAsset) -> bool {
        self.all_channels()
            .any(|c| c.asset().id() == asset.id() && c.is_playing())
    }

    pub fn count_playing_instances(&self, asset: &SoundAsset) -> usize {
        self.all_channels()
            .filter(|c| c.asset().id() == asset.id() && c.is_playing())
            .count()
    }

    /// A playing channel of `asset`, if any
    pub fn channel_for(&self, asset: &SoundAsset) -> Option<ChannelHandle> {
        self.all_channels()
            .find(|c| c.asset().id() == asset.id() && c.is_playing())
            .map(|c| ChannelHandle::new(c, self.worker.clone()))
    }

    /// Dispose every channel of `asset`.
    pub fn kill_channels(&self, asset: &SoundAsset) {
        for channel in self.all_channels().filter(|c| c.asset().id() == asset.id()) {
            channel.dispose();
        }
    }

    /// Playing channels in both pools
    pub fn playing_channels(&self) -> usize {
        self.general.playing_count() + self.voice.playing_count()
    }

    /// Dispose all channels, stop the worker and free every source.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        for channel in self.worker.shutdown() {
            channel.dispose();
        }
        for pool in [&self.general, &self.voice] {
            pool.release_all();
            pool.delete_sources(self.device.as_ref());
        }
        if let Err(e) = self.device.set_listener(Listener {
            gain: 0.0,
            ..self.listener()
        }) {
            warn!("Failed to silence listener: {}", e);
        }
        debug!("Audio engine shut down");
    }
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests;
