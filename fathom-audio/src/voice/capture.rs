//! Microphone egress: fixed-size chunks, encoded into an outgoing queue

use std::sync::Arc;

use tracing::trace;

use super::codec::SpeechCodec;
use super::queue::VoiceFrameQueue;
use crate::capture::CaptureDevice;
use crate::config::VoiceConfig;
use crate::device::clamp_safe;
use crate::error::Result;

/// Pulls voice frames from a [`CaptureDevice`] and publishes them encoded.
///
/// A short read is padded with the trailing `repeat_margin` samples of the
/// previous frame (then silence) so a momentary underrun does not produce an
/// audible gap. Every frame is encoded and pushed to the outgoing queue; the
/// raw frame and the codec round trip are both available for monitoring.
pub struct VoiceCapture {
    device: Box<dyn CaptureDevice>,
    codec: Arc<dyn SpeechCodec>,
    outgoing: Arc<VoiceFrameQueue>,
    frame_samples: usize,
    repeat_margin: usize,
    gain: f32,
    frame: Vec<i16>,
    previous: Vec<i16>,
    packet: Vec<u8>,
    underruns: u64,
}

impl VoiceCapture {
    pub fn new(
        device: Box<dyn CaptureDevice>,
        codec: Arc<dyn SpeechCodec>,
        outgoing: Arc<VoiceFrameQueue>,
        config: &VoiceConfig,
    ) -> Self {
        let frame_samples = config.frame_samples.max(1);
        Self {
            device,
            codec,
            outgoing,
            frame_samples,
            repeat_margin: config.repeat_margin.min(frame_samples),
            gain: clamp_safe(config.microphone_gain, 0.0, 4.0),
            frame: vec![0; frame_samples],
            previous: vec![0; frame_samples],
            packet: Vec::new(),
            underruns: 0,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.device.sample_rate()
    }

    pub fn frame_samples(&self) -> usize {
        self.frame_samples
    }

    pub fn outgoing(&self) -> &Arc<VoiceFrameQueue> {
        &self.outgoing
    }

    pub fn set_gain(&mut self, gain: f32) {
        self.gain = clamp_safe(gain, 0.0, 4.0);
    }

    /// Short reads padded so far
    pub fn underruns(&self) -> u64 {
        self.underruns
    }

    /// Capture, encode and publish one frame.
    ///
    /// Returns `Ok(None)` when the device produced nothing at all; otherwise
    /// the raw (gain-adjusted) frame that was sent.
    pub fn capture_frame(&mut self) -> Result<Option<&[i16]>> {
        let read = self.device.read(&mut self.frame);
        if read == 0 {
            return Ok(None);
        }

        if read < self.frame_samples {
            self.underruns += 1;
            let gap = self.frame_samples - read;
            let reuse = gap.min(self.repeat_margin);
            let tail = &self.previous[self.frame_samples - reuse..];
            self.frame[read..read + reuse].copy_from_slice(tail);
            self.frame[read + reuse..].fill(0);
            trace!(read, reuse, "Microphone underrun padded");
        }

        if (self.gain - 1.0).abs() > f32::EPSILON {
            for sample in self.frame.iter_mut() {
                *sample = (*sample as f32 * self.gain).clamp(-32768.0, 32767.0) as i16;
            }
        }

        self.packet.clear();
        self.codec.encode(&self.frame, &mut self.packet)?;
        self.outgoing.push(&self.packet);
        self.previous.copy_from_slice(&self.frame);

        Ok(Some(&self.frame))
    }

    /// Decode the most recently published frame, as a listener would hear it.
    pub fn monitor(&self, out: &mut Vec<i16>) -> Result<usize> {
        if self.packet.is_empty() {
            return Ok(0);
        }
        self.codec.decode(&self.packet, out)
    }
}
