//! Hardware abstraction: playback sources and sample buffers
//!
//! The engine talks to audio hardware through [`AudioDevice`], a slot/buffer
//! API in the shape of OpenAL. A *source* is one hardware voice that renders
//! either a single bound buffer or a queue of buffers. A *buffer* holds PCM
//! data and may be shared by many sources.
//!
//! # Source lifecycle
//!
//! ```text
//! Initial ──play──► Playing ──(end of data)──► Stopped
//!                     │  ▲                        │
//!                   stop │                        │
//!                     ▼  └──────────play──────────┘
//!                  Stopped
//! ```
//!
//! A queued source marks each fully consumed buffer as *processed*; the owner
//! unqueues processed buffers, refills them and queues them again. When the
//! queue runs dry the source stops (underrun) and must be restarted with
//! [`AudioDevice::play`].

mod mixing;
mod software;

pub use mixing::{apply_pan, distance_gain, soft_clip};
pub use software::SoftwareDevice;

use glam::Vec3;
use smallvec::SmallVec;

use crate::error::DeviceError;

/// Handle to a hardware playback source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceId(pub u32);

/// Handle to a hardware sample buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(pub u32);

/// Buffers returned by a single unqueue call (never more than a stream owns)
pub type ProcessedBuffers = SmallVec<[BufferId; 4]>;

/// Playback state reported by a source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceState {
    #[default]
    Initial,
    Playing,
    Paused,
    Stopped,
}

/// Listener pose and master gain
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Listener {
    pub position: Vec3,
    /// Direction the listener faces
    pub target: Vec3,
    pub up: Vec3,
    pub gain: f32,
}

impl Default for Listener {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            target: Vec3::NEG_Z,
            up: Vec3::Y,
            gain: 1.0,
        }
    }
}

impl Listener {
    /// Unit vector pointing to the listener's right
    pub fn right(&self) -> Vec3 {
        self.target.cross(self.up).normalize_or_zero()
    }
}

/// Slot/buffer audio hardware.
///
/// Every method takes `&self`; implementations synchronize internally so the
/// engine's caller threads and its streaming worker can share one device.
pub trait AudioDevice: Send + Sync {
    fn create_source(&self) -> Result<SourceId, DeviceError>;
    fn delete_source(&self, source: SourceId) -> Result<(), DeviceError>;

    fn create_buffer(&self) -> Result<BufferId, DeviceError>;
    /// Fails with `InvalidOperation` while any source still references the buffer.
    fn delete_buffer(&self, buffer: BufferId) -> Result<(), DeviceError>;
    /// Replace a buffer's contents with interleaved 16-bit PCM.
    fn buffer_data(
        &self,
        buffer: BufferId,
        samples: &[i16],
        channels: u16,
        sample_rate: u32,
    ) -> Result<(), DeviceError>;
    /// Length of a buffer in frames
    fn buffer_len(&self, buffer: BufferId) -> Result<usize, DeviceError>;

    /// Bind a single static buffer (or clear the source with `None`).
    /// The source must not be playing.
    fn bind_buffer(&self, source: SourceId, buffer: Option<BufferId>) -> Result<(), DeviceError>;
    fn queue_buffer(&self, source: SourceId, buffer: BufferId) -> Result<(), DeviceError>;
    /// Remove and return every processed buffer at the head of the queue.
    fn unqueue_processed(&self, source: SourceId) -> Result<ProcessedBuffers, DeviceError>;
    fn buffers_processed(&self, source: SourceId) -> Result<usize, DeviceError>;
    fn buffers_queued(&self, source: SourceId) -> Result<usize, DeviceError>;

    fn play(&self, source: SourceId) -> Result<(), DeviceError>;
    fn stop(&self, source: SourceId) -> Result<(), DeviceError>;
    fn source_state(&self, source: SourceId) -> Result<SourceState, DeviceError>;

    /// Playback position in frames
    fn sample_offset(&self, source: SourceId) -> Result<usize, DeviceError>;
    fn set_sample_offset(&self, source: SourceId, offset: usize) -> Result<(), DeviceError>;

    fn set_gain(&self, source: SourceId, gain: f32) -> Result<(), DeviceError>;
    /// World position, or `None` for a listener-relative (omnidirectional) source
    fn set_position(&self, source: SourceId, position: Option<Vec3>) -> Result<(), DeviceError>;
    fn set_distances(&self, source: SourceId, near: f32, far: f32) -> Result<(), DeviceError>;
    fn set_looping(&self, source: SourceId, looping: bool) -> Result<(), DeviceError>;

    fn set_listener(&self, listener: Listener) -> Result<(), DeviceError>;
    fn is_connected(&self) -> bool;
}

/// Clamp a float value, treating NaN as the minimum value
#[inline]
pub fn clamp_safe(value: f32, min: f32, max: f32) -> f32 {
    if value.is_nan() {
        min
    } else {
        value.clamp(min, max)
    }
}

#[cfg(test)]
mod tests;
