//! In-process software implementation of [`AudioDevice`]
//!
//! Sources and buffers live behind one mutex. [`SoftwareDevice::render`]
//! advances every playing source and mixes it into interleaved stereo; the
//! cpal output thread calls it, and tests call it directly to move playback
//! forward without a sound card.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use glam::Vec3;
use hashbrown::HashMap;
use tracing::{trace, warn};

use super::mixing::{apply_pan, distance_gain, read_frame, soft_clip};
use super::{
    AudioDevice, BufferId, Listener, ProcessedBuffers, SourceId, SourceState, clamp_safe,
};
use crate::error::DeviceError;

struct Buffer {
    data: Vec<i16>,
    channels: u16,
    sample_rate: u32,
}

impl Buffer {
    fn frames(&self) -> usize {
        self.data.len() / self.channels.max(1) as usize
    }
}

struct Source {
    state: SourceState,
    static_buffer: Option<BufferId>,
    queue: VecDeque<BufferId>,
    /// Buffers at the head of `queue` that have been fully played
    processed: usize,
    /// Fractional frame position inside the current buffer
    cursor: f64,
    gain: f32,
    position: Option<Vec3>,
    near: f32,
    far: f32,
    looping: bool,
}

impl Default for Source {
    fn default() -> Self {
        Self {
            state: SourceState::Initial,
            static_buffer: None,
            queue: VecDeque::new(),
            processed: 0,
            cursor: 0.0,
            gain: 1.0,
            position: None,
            near: 1.0,
            far: f32::MAX,
            looping: false,
        }
    }
}

impl Source {
    fn current_buffer(&self) -> Option<BufferId> {
        self.static_buffer
            .or_else(|| self.queue.get(self.processed).copied())
    }

    fn references(&self, buffer: BufferId) -> bool {
        self.static_buffer == Some(buffer) || self.queue.contains(&buffer)
    }

    /// Step past the end of the current buffer. Returns false when playback stops.
    fn advance(&mut self, frames: usize) -> bool {
        if self.static_buffer.is_some() {
            if self.looping && frames > 0 {
                self.cursor -= frames as f64;
                return true;
            }
            self.state = SourceState::Stopped;
            self.cursor = 0.0;
            return false;
        }

        self.processed += 1;
        self.cursor = (self.cursor - frames as f64).max(0.0);
        if self.processed >= self.queue.len() {
            trace!("Queued source ran dry");
            self.state = SourceState::Stopped;
            self.cursor = 0.0;
            return false;
        }
        true
    }
}

#[derive(Default)]
struct DeviceState {
    next_id: u32,
    sources: HashMap<u32, Source>,
    buffers: HashMap<u32, Buffer>,
    listener: Listener,
}

impl DeviceState {
    fn allocate_id(&mut self) -> u32 {
        self.next_id = self.next_id.wrapping_add(1).max(1);
        self.next_id
    }

    fn source(&self, id: SourceId) -> Result<&Source, DeviceError> {
        self.sources.get(&id.0).ok_or(DeviceError::InvalidSource)
    }

    fn source_mut(&mut self, id: SourceId) -> Result<&mut Source, DeviceError> {
        self.sources.get_mut(&id.0).ok_or(DeviceError::InvalidSource)
    }

    fn buffer(&self, id: BufferId) -> Result<&Buffer, DeviceError> {
        self.buffers.get(&id.0).ok_or(DeviceError::InvalidBuffer)
    }

    fn buffer_in_use(&self, id: BufferId) -> bool {
        self.sources.values().any(|s| s.references(id))
    }
}

/// Pure-Rust mixing device.
pub struct SoftwareDevice {
    state: Mutex<DeviceState>,
    connected: AtomicBool,
}

impl Default for SoftwareDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftwareDevice {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(DeviceState::default()),
            connected: AtomicBool::new(true),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(|e| {
            warn!("Software device mutex poisoned; continuing");
            e.into_inner()
        })
    }

    /// Flag the device as lost (called from output stream error callbacks).
    pub fn mark_disconnected(&self) {
        if self.connected.swap(false, Ordering::AcqRel) {
            warn!("Audio device marked disconnected");
        }
    }

    /// Number of live sources
    pub fn source_count(&self) -> usize {
        self.lock().sources.len()
    }

    /// Number of live buffers
    pub fn buffer_count(&self) -> usize {
        self.lock().buffers.len()
    }

    /// Mix every playing source into `out` (interleaved stereo) at `output_rate`.
    ///
    /// Advances playback by `out.len() / 2` frames.
    pub fn render(&self, out: &mut [f32], output_rate: u32) {
        out.fill(0.0);
        if output_rate == 0 {
            return;
        }

        let mut guard = self.lock();
        let DeviceState {
            sources,
            buffers,
            listener,
            ..
        } = &mut *guard;
        let listener = *listener;
        let right = listener.right();

        for source in sources.values_mut() {
            if source.state == SourceState::Playing {
                mix_source(source, buffers, &listener, right, out, output_rate);
            }
        }

        for sample in out.iter_mut() {
            *sample = soft_clip(*sample * listener.gain);
        }
    }
}

/// Per-source gain and pan relative to the listener
fn spatialize(source: &Source, listener: &Listener, right: Vec3) -> (f32, f32) {
    let Some(position) = source.position else {
        return (source.gain, 0.0);
    };
    let relative = position - listener.position;
    let distance = relative.length();
    let gain = source.gain * distance_gain(distance, source.near, source.far);
    let pan = if distance > f32::EPSILON {
        relative.dot(right) / distance
    } else {
        0.0
    };
    (gain, pan)
}

fn mix_source(
    source: &mut Source,
    buffers: &HashMap<u32, Buffer>,
    listener: &Listener,
    right: Vec3,
    out: &mut [f32],
    output_rate: u32,
) {
    let (gain, pan) = spatialize(source, listener, right);
    let frames_out = out.len() / 2;
    let mut i = 0;

    while i < frames_out {
        let Some(buffer) = source
            .current_buffer()
            .and_then(|id| buffers.get(&id.0))
        else {
            source.state = SourceState::Stopped;
            return;
        };

        let frames = buffer.frames();
        let frame = source.cursor as usize;
        if frame >= frames {
            if !source.advance(frames) {
                return;
            }
            continue;
        }

        let frac = (source.cursor - frame as f64) as f32;
        let wrap = source.looping && source.static_buffer.is_some();
        let (l, r) = read_frame(&buffer.data, buffer.channels, frame, frac, wrap);
        if buffer.channels == 1 {
            let (pl, pr) = apply_pan(l, pan, gain);
            out[i * 2] += pl;
            out[i * 2 + 1] += pr;
        } else {
            out[i * 2] += l * gain;
            out[i * 2 + 1] += r * gain;
        }

        source.cursor += buffer.sample_rate as f64 / output_rate as f64;
        i += 1;
    }
}

impl AudioDevice for SoftwareDevice {
    fn create_source(&self) -> Result<SourceId, DeviceError> {
        let mut state = self.lock();
        let id = state.allocate_id();
        state.sources.insert(id, Source::default());
        Ok(SourceId(id))
    }

    fn delete_source(&self, source: SourceId) -> Result<(), DeviceError> {
        self.lock()
            .sources
            .remove(&source.0)
            .map(|_| ())
            .ok_or(DeviceError::InvalidSource)
    }

    fn create_buffer(&self) -> Result<BufferId, DeviceError> {
        let mut state = self.lock();
        let id = state.allocate_id();
        state.buffers.insert(
            id,
            Buffer {
                data: Vec::new(),
                channels: 1,
                sample_rate: 44_100,
            },
        );
        Ok(BufferId(id))
    }

    fn delete_buffer(&self, buffer: BufferId) -> Result<(), DeviceError> {
        let mut state = self.lock();
        state.buffer(buffer)?;
        if state.buffer_in_use(buffer) {
            return Err(DeviceError::InvalidOperation("buffer is attached to a source"));
        }
        state.buffers.remove(&buffer.0);
        Ok(())
    }

    fn buffer_data(
        &self,
        buffer: BufferId,
        samples: &[i16],
        channels: u16,
        sample_rate: u32,
    ) -> Result<(), DeviceError> {
        if !(1..=2).contains(&channels) || sample_rate == 0 {
            return Err(DeviceError::InvalidOperation("unsupported buffer format"));
        }
        let mut state = self.lock();
        state.buffer(buffer)?;
        if state.buffer_in_use(buffer) {
            return Err(DeviceError::InvalidOperation("buffer is attached to a source"));
        }
        let slot = state
            .buffers
            .get_mut(&buffer.0)
            .ok_or(DeviceError::InvalidBuffer)?;
        slot.data.clear();
        slot.data.extend_from_slice(samples);
        slot.channels = channels;
        slot.sample_rate = sample_rate;
        Ok(())
    }

    fn buffer_len(&self, buffer: BufferId) -> Result<usize, DeviceError> {
        Ok(self.lock().buffer(buffer)?.frames())
    }

    fn bind_buffer(&self, source: SourceId, buffer: Option<BufferId>) -> Result<(), DeviceError> {
        let mut state = self.lock();
        if let Some(buffer) = buffer {
            state.buffer(buffer)?;
        }
        let src = state.source_mut(source)?;
        if matches!(src.state, SourceState::Playing | SourceState::Paused) {
            return Err(DeviceError::InvalidOperation("cannot rebind a playing source"));
        }
        src.static_buffer = buffer;
        src.queue.clear();
        src.processed = 0;
        src.cursor = 0.0;
        Ok(())
    }

    fn queue_buffer(&self, source: SourceId, buffer: BufferId) -> Result<(), DeviceError> {
        let mut state = self.lock();
        state.buffer(buffer)?;
        let src = state.source_mut(source)?;
        if src.static_buffer.is_some() {
            return Err(DeviceError::InvalidOperation("source has a static buffer"));
        }
        if src.queue.contains(&buffer) {
            return Err(DeviceError::InvalidOperation("buffer is already queued"));
        }
        src.queue.push_back(buffer);
        Ok(())
    }

    fn unqueue_processed(&self, source: SourceId) -> Result<ProcessedBuffers, DeviceError> {
        let mut state = self.lock();
        let src = state.source_mut(source)?;
        let count = src.processed.min(src.queue.len());
        let drained = src.queue.drain(..count).collect();
        src.processed = 0;
        Ok(drained)
    }

    fn buffers_processed(&self, source: SourceId) -> Result<usize, DeviceError> {
        let state = self.lock();
        let src = state.source(source)?;
        Ok(src.processed.min(src.queue.len()))
    }

    fn buffers_queued(&self, source: SourceId) -> Result<usize, DeviceError> {
        Ok(self.lock().source(source)?.queue.len())
    }

    fn play(&self, source: SourceId) -> Result<(), DeviceError> {
        let mut state = self.lock();
        let src = state.source_mut(source)?;
        match src.state {
            SourceState::Playing => {}
            SourceState::Paused => src.state = SourceState::Playing,
            SourceState::Initial | SourceState::Stopped => {
                src.processed = 0;
                src.state = if src.current_buffer().is_some() {
                    SourceState::Playing
                } else {
                    SourceState::Stopped
                };
            }
        }
        Ok(())
    }

    fn stop(&self, source: SourceId) -> Result<(), DeviceError> {
        let mut state = self.lock();
        let src = state.source_mut(source)?;
        src.state = SourceState::Stopped;
        src.processed = src.queue.len();
        src.cursor = 0.0;
        Ok(())
    }

    fn source_state(&self, source: SourceId) -> Result<SourceState, DeviceError> {
        Ok(self.lock().source(source)?.state)
    }

    fn sample_offset(&self, source: SourceId) -> Result<usize, DeviceError> {
        let state = self.lock();
        let src = state.source(source)?;
        let mut offset = src.cursor as usize;
        if src.static_buffer.is_none() {
            for id in src.queue.iter().take(src.processed) {
                offset += state.buffer(*id).map(Buffer::frames).unwrap_or(0);
            }
        }
        Ok(offset)
    }

    fn set_sample_offset(&self, source: SourceId, offset: usize) -> Result<(), DeviceError> {
        let mut state = self.lock();
        let src = state.source(source)?;
        let Some(buffer) = src.static_buffer else {
            return Err(DeviceError::InvalidOperation("offset requires a static buffer"));
        };
        if offset > state.buffer(buffer)?.frames() {
            return Err(DeviceError::InvalidOperation("sample offset out of range"));
        }
        state.source_mut(source)?.cursor = offset as f64;
        Ok(())
    }

    fn set_gain(&self, source: SourceId, gain: f32) -> Result<(), DeviceError> {
        self.lock().source_mut(source)?.gain = clamp_safe(gain, 0.0, 1.0);
        Ok(())
    }

    fn set_position(&self, source: SourceId, position: Option<Vec3>) -> Result<(), DeviceError> {
        if position.is_some_and(|p| !p.is_finite()) {
            return Err(DeviceError::InvalidOperation("source position must be finite"));
        }
        self.lock().source_mut(source)?.position = position;
        Ok(())
    }

    fn set_distances(&self, source: SourceId, near: f32, far: f32) -> Result<(), DeviceError> {
        if near.is_nan() || far.is_nan() || near < 0.0 || far < near {
            return Err(DeviceError::InvalidOperation("invalid distance range"));
        }
        let mut state = self.lock();
        let src = state.source_mut(source)?;
        src.near = near;
        src.far = far;
        Ok(())
    }

    fn set_looping(&self, source: SourceId, looping: bool) -> Result<(), DeviceError> {
        self.lock().source_mut(source)?.looping = looping;
        Ok(())
    }

    fn set_listener(&self, listener: Listener) -> Result<(), DeviceError> {
        let mut state = self.lock();
        state.listener = Listener {
            gain: clamp_safe(listener.gain, 0.0, 1.0),
            ..listener
        };
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}
