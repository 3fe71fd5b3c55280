//! Per-channel chunk producers for streaming assets

use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use super::decode::FileDecoder;
use crate::error::Result;
use crate::voice::{SpeechCodec, VoiceCapture, VoiceFrameQueue};

/// How a stream behaves when it has nothing to give
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// Decoded from memory or disk; a short chunk means end of data
    Reliable,
    /// Fed by the network; a missing frame is silence with bounded patience
    Network,
    /// Fed by a local microphone; a missing frame is simply skipped
    Live,
}

/// Result of one pull
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Pulled {
    /// `n` samples were written to the front of the chunk
    Data(usize),
    /// Nothing available yet
    Missing,
}

pub(crate) enum StreamReader {
    Pcm {
        samples: Arc<[i16]>,
        channels: u16,
        cursor: usize,
    },
    File(FileDecoder),
    Voice {
        queue: Arc<VoiceFrameQueue>,
        codec: Arc<dyn SpeechCodec>,
        next_frame: u64,
        packet: Vec<u8>,
        decoded: Vec<i16>,
    },
    Loopback {
        capture: Arc<Mutex<VoiceCapture>>,
        decoded: Vec<i16>,
    },
}

impl StreamReader {
    pub fn kind(&self) -> StreamKind {
        match self {
            StreamReader::Pcm { .. } | StreamReader::File(_) => StreamKind::Reliable,
            StreamReader::Voice { .. } => StreamKind::Network,
            StreamReader::Loopback { .. } => StreamKind::Live,
        }
    }

    /// Write the next chunk into `out`.
    pub fn pull(&mut self, out: &mut [i16]) -> Result<Pulled> {
        match self {
            StreamReader::Pcm {
                samples, cursor, ..
            } => {
                let n = (samples.len() - *cursor).min(out.len());
                out[..n].copy_from_slice(&samples[*cursor..*cursor + n]);
                *cursor += n;
                Ok(Pulled::Data(n))
            }
            StreamReader::File(decoder) => Ok(Pulled::Data(decoder.read(out)?)),
            StreamReader::Voice {
                queue,
                codec,
                next_frame,
                packet,
                decoded,
            } => {
                let id = queue.clamp_read_id(*next_frame);
                if !queue.read(id, packet) {
                    // A frame that should have arrived by now is lost; skip it
                    if id <= queue.latest_frame_id() {
                        *next_frame = id.saturating_add(1);
                    }
                    return Ok(Pulled::Missing);
                }
                *next_frame = id.saturating_add(1);

                decoded.clear();
                if let Err(e) = codec.decode(packet, decoded) {
                    warn!("Dropping undecodable voice frame {}: {}", id, e);
                    return Ok(Pulled::Missing);
                }
                Ok(copy_decoded(decoded, out))
            }
            StreamReader::Loopback { capture, decoded } => {
                let mut capture = capture.lock().unwrap_or_else(|e| e.into_inner());
                if capture.capture_frame()?.is_none() {
                    return Ok(Pulled::Missing);
                }
                decoded.clear();
                capture.monitor(decoded)?;
                Ok(copy_decoded(decoded, out))
            }
        }
    }

    /// Move to `frame`. Live and network streams have no position to seek.
    pub fn seek(&mut self, frame: u64) -> Result<()> {
        match self {
            StreamReader::Pcm {
                samples,
                channels,
                cursor,
            } => {
                let target = (frame as usize).saturating_mul(*channels as usize);
                *cursor = target.min(samples.len());
                Ok(())
            }
            StreamReader::File(decoder) => decoder.seek(frame),
            StreamReader::Voice { .. } | StreamReader::Loopback { .. } => {
                debug!("Ignoring seek on a live stream");
                Ok(())
            }
        }
    }

    pub fn rewind(&mut self) -> Result<()> {
        self.seek(0)
    }

    /// Read position in frames (voice streams report the next frame id)
    pub fn position(&self) -> u64 {
        match self {
            StreamReader::Pcm {
                channels, cursor, ..
            } => (*cursor / *channels as usize) as u64,
            StreamReader::File(decoder) => decoder.position(),
            StreamReader::Voice { next_frame, .. } => *next_frame,
            StreamReader::Loopback { .. } => 0,
        }
    }
}

fn copy_decoded(decoded: &[i16], out: &mut [i16]) -> Pulled {
    let n = decoded.len().min(out.len());
    out[..n].copy_from_slice(&decoded[..n]);
    if n == 0 {
        Pulled::Missing
    } else {
        Pulled::Data(n)
    }
}
