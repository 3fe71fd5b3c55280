//! fathom-qoa: frame codec for voice chat
//!
//! A mono QOA (Quite OK Audio) variant tuned for short, self-describing voice
//! frames. Every frame carries its own sample count so a receiver can decode a
//! packet in isolation, without any container around it.
//!
//! # Frame Format
//!
//! ```text
//! Frame header (4 bytes):
//!   0x00: samples_in_frame (u16 BE, 1..=5120)
//!   0x02: frame_size       (u16 BE, header + LMS state + slices)
//!
//! LMS state (16 bytes):
//!   history[4] as i16 BE, weights[4] as i16 BE
//!
//! Slices (8 bytes each):
//!   4-bit scalefactor + 20 x 3-bit quantized residuals
//! ```
//!
//! A packet is one or more frames back to back. Sample rate is not stored;
//! voice frames always use the rate negotiated by the voice configuration.
//!
//! # Usage
//!
//! ```
//! let pcm: Vec<i16> = (0..960).map(|i| ((i % 64) * 200) as i16).collect();
//! let packet = fathom_qoa::encode(&pcm);
//!
//! let mut decoded = Vec::new();
//! let count = fathom_qoa::decode(&packet, &mut decoded).unwrap();
//! assert_eq!(count, pcm.len());
//! ```

mod decode;
mod encode;

pub use decode::{decode, decode_frame};
pub use encode::{encode, encode_frame};

/// Samples per slice (each slice packs into 64 bits)
pub const SLICE_LEN: usize = 20;

/// Maximum samples in one frame (256 slices)
pub const MAX_FRAME_SAMPLES: usize = 5120;

/// Frame header size in bytes
pub const FRAME_HEADER_SIZE: usize = 4;

/// Serialized LMS state size in bytes
pub const LMS_STATE_SIZE: usize = 16;

const LMS_LEN: usize = 4;

/// Scalefactors: round((s + 1) ^ 2.75) for s in 0..16
const SCALEFACTORS: [i32; 16] = [
    1, 7, 21, 45, 84, 138, 211, 304, 421, 562, 731, 928, 1157, 1419, 1715, 2048,
];

/// 65536 / scalefactor, used to divide with rounding away from zero
const RECIPROCALS: [i32; 16] = [
    65536, 9363, 3121, 1457, 781, 475, 311, 216, 156, 117, 90, 71, 57, 47, 39, 32,
];

/// Maps a clamped residual quotient (-8..=8) to its 3-bit code
const QUANT: [u8; 17] = [7, 7, 7, 5, 5, 3, 3, 1, 0, 0, 2, 2, 4, 4, 6, 6, 6];

/// Dequantization multipliers, in quarters: 0.75, -0.75, 2.5, -2.5, 4.5, -4.5, 7, -7
const DEQUANT_QUARTERS: [i32; 8] = [3, -3, 10, -10, 18, -18, 28, -28];

const fn build_dequant() -> [[i32; 8]; 16] {
    let mut table = [[0i32; 8]; 16];
    let mut s = 0;
    while s < 16 {
        let mut q = 0;
        while q < 8 {
            let m = DEQUANT_QUARTERS[q];
            let magnitude = (SCALEFACTORS[s] * m.abs() + 2) / 4;
            table[s][q] = if m < 0 { -magnitude } else { magnitude };
            q += 1;
        }
        s += 1;
    }
    table
}

/// `DEQUANT[sf][code]`: reconstructed residual for a scalefactor and 3-bit code
const DEQUANT: [[i32; 8]; 16] = build_dequant();

/// Errors produced while decoding a packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum QoaError {
    /// The packet ends in the middle of a frame
    #[error("truncated QOA frame")]
    Truncated,
    /// The frame header declares a size that disagrees with its sample count
    #[error("frame size {declared} does not match {expected} expected bytes")]
    BadFrameSize { declared: usize, expected: usize },
    /// The frame header declares zero samples or more than one frame can hold
    #[error("frame declares {0} samples (must be 1..=5120)")]
    BadSampleCount(usize),
}

/// Sign-sign LMS predictor shared by encoder and decoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lms {
    pub history: [i32; LMS_LEN],
    pub weights: [i32; LMS_LEN],
}

impl Default for Lms {
    fn default() -> Self {
        Self {
            history: [0; LMS_LEN],
            weights: [0, 0, -(1 << 13), 1 << 14],
        }
    }
}

impl Lms {
    #[inline]
    pub(crate) fn predict(&self) -> i32 {
        let sum: i32 = self
            .history
            .iter()
            .zip(&self.weights)
            .map(|(h, w)| h.wrapping_mul(*w))
            .fold(0i32, i32::wrapping_add);
        sum >> 13
    }

    #[inline]
    pub(crate) fn update(&mut self, sample: i32, residual: i32) {
        let delta = residual >> 4;
        for (w, h) in self.weights.iter_mut().zip(&self.history) {
            *w = w.wrapping_add(if *h < 0 { -delta } else { delta });
        }
        self.history.rotate_left(1);
        self.history[LMS_LEN - 1] = sample;
    }

    pub(crate) fn write(&self, out: &mut Vec<u8>) {
        for v in self.history.iter().chain(&self.weights) {
            out.extend_from_slice(&(*v as i16).to_be_bytes());
        }
    }

    pub(crate) fn read(bytes: &[u8]) -> Self {
        let word = |i: usize| i16::from_be_bytes([bytes[i * 2], bytes[i * 2 + 1]]) as i32;
        Self {
            history: [word(0), word(1), word(2), word(3)],
            weights: [word(4), word(5), word(6), word(7)],
        }
    }
}

#[inline]
fn clamp_sample(v: i32) -> i32 {
    v.clamp(i16::MIN as i32, i16::MAX as i32)
}

/// Divide by a scalefactor, rounding away from zero
#[inline]
fn div_scalefactor(v: i32, sf: usize) -> i32 {
    let n = (v * RECIPROCALS[sf] + (1 << 15)) >> 16;
    n + (v.signum() - n.signum())
}

/// Total encoded size of a frame holding `samples` samples
pub fn frame_size(samples: usize) -> usize {
    FRAME_HEADER_SIZE + LMS_STATE_SIZE + samples.div_ceil(SLICE_LEN) * 8
}
