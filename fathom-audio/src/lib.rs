//! Fathom real-time audio engine
//!
//! Plays buffered and streamed sounds through a finite set of hardware
//! sources, keeps streams fed from a background worker and carries voice chat
//! between a microphone, a speech codec and network frame queues.
//!
//! # Architecture
//!
//! ```text
//! AudioEngine ─┬─ SourcePool (general) ──► PlaybackChannel ──► AudioDevice
//!              ├─ SourcePool (voice)   ──► PlaybackChannel ──► AudioDevice
//!              ├─ CategoryTable
//!              └─ StreamingWorker ── refills ──► streaming channels
//!
//! SoundAsset: buffered │ pcm / file stream │ network voice │ mic loopback
//! ```
//!
//! [`SoftwareDevice`](device::SoftwareDevice) is the default [`AudioDevice`]
//! and renders in-process; [`DeviceOutput`] plays it through cpal.

pub mod asset;
pub mod capture;
pub mod category;
pub mod channel;
pub mod config;
pub mod device;
pub mod engine;
pub mod error;
pub mod output;
pub mod pool;
pub mod voice;
pub mod worker;

pub use asset::{SoundAsset, StreamKind};
pub use capture::{CaptureDevice, CpalCapture, input_device_names};
pub use category::CategoryTable;
pub use channel::{ChannelHandle, ChannelParams, ChannelState, PlaybackChannel};
pub use config::AudioConfig;
pub use device::{AudioDevice, Listener, SoftwareDevice, SourceState};
pub use engine::AudioEngine;
pub use error::{AudioError, DeviceError, Result};
pub use output::{DeviceOutput, output_device_names};
pub use pool::{PoolKind, SourcePool};
pub use voice::{QoaCodec, SpeechCodec, VoiceCapture, VoiceFrameQueue};
pub use worker::StreamingWorker;
