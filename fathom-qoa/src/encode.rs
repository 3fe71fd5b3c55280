//! Frame encoder

use crate::{
    DEQUANT, Lms, MAX_FRAME_SAMPLES, QUANT, SLICE_LEN, clamp_sample, div_scalefactor, frame_size,
};

/// Encode up to 20 samples into one 64-bit slice.
///
/// Every scalefactor is tried and the one with the lowest squared error wins;
/// `lms` is left in the state matching the chosen encoding.
fn encode_slice(samples: &[i16], lms: &mut Lms) -> u64 {
    let mut best = (u64::MAX, 0u64, *lms);

    for sf in 0..16 {
        let mut trial = *lms;
        let mut slice = (sf as u64) << 60;
        let mut error = 0u64;

        for (i, &sample) in samples.iter().take(SLICE_LEN).enumerate() {
            let predicted = trial.predict();
            let residual = sample as i32 - predicted;
            let code = QUANT[(div_scalefactor(residual, sf).clamp(-8, 8) + 8) as usize];
            let dequantized = DEQUANT[sf][code as usize];
            let reconstructed = clamp_sample(predicted + dequantized);

            let diff = (sample as i32 - reconstructed) as i64;
            error = error.saturating_add((diff * diff) as u64);
            if error >= best.0 {
                break;
            }

            trial.update(reconstructed, dequantized);
            slice |= (code as u64) << (57 - i * 3);
        }

        if error < best.0 {
            best = (error, slice, trial);
        }
    }

    *lms = best.2;
    best.1
}

/// Encode one frame (at most [`MAX_FRAME_SAMPLES`] samples), appending to `out`.
///
/// The predictor carries over from the previous frame when encoding a packet
/// in several pieces.
pub fn encode_frame(samples: &[i16], lms: &mut Lms, out: &mut Vec<u8>) {
    debug_assert!(!samples.is_empty() && samples.len() <= MAX_FRAME_SAMPLES);

    let size = frame_size(samples.len());
    out.reserve(size);
    out.extend_from_slice(&(samples.len() as u16).to_be_bytes());
    out.extend_from_slice(&(size as u16).to_be_bytes());

    // The decoder only sees the i16-truncated state, so continue from that
    let state_start = out.len();
    lms.write(out);
    *lms = Lms::read(&out[state_start..]);

    for chunk in samples.chunks(SLICE_LEN) {
        out.extend_from_slice(&encode_slice(chunk, lms).to_be_bytes());
    }
}

/// Encode mono PCM into a packet of one or more frames.
pub fn encode(samples: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(frame_size(samples.len().min(MAX_FRAME_SAMPLES)));
    let mut lms = Lms::default();
    for frame in samples.chunks(MAX_FRAME_SAMPLES) {
        encode_frame(frame, &mut lms, &mut out);
    }
    out
}
