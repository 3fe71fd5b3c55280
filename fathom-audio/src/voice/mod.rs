//! Voice chat plumbing
//!
//! ```text
//! Microphone ──► VoiceCapture ──encode──► outgoing VoiceFrameQueue ──► transport
//!                    │
//!                    └──monitor──► loopback channel
//!
//! transport ──receive(id, bytes)──► incoming VoiceFrameQueue ──► voice channel
//! ```
//!
//! The network transport itself is not part of this crate; it only has to
//! move `(frame_id, bytes)` pairs between queues.

mod capture;
mod codec;
mod queue;

pub use capture::VoiceCapture;
pub use codec::{QoaCodec, SpeechCodec};
pub use queue::VoiceFrameQueue;
