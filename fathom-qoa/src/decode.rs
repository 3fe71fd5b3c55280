//! Frame decoder

use crate::{
    DEQUANT, FRAME_HEADER_SIZE, LMS_STATE_SIZE, Lms, MAX_FRAME_SAMPLES, QoaError, SLICE_LEN,
    clamp_sample, frame_size,
};

fn decode_slice(slice: u64, lms: &mut Lms, out: &mut Vec<i16>, count: usize) {
    let sf = ((slice >> 60) & 0xF) as usize;
    for i in 0..count {
        let code = ((slice >> (57 - i * 3)) & 0x7) as usize;
        let predicted = lms.predict();
        let dequantized = DEQUANT[sf][code];
        let sample = clamp_sample(predicted + dequantized);
        lms.update(sample, dequantized);
        out.push(sample as i16);
    }
}

/// Decode the frame at the start of `data`, appending samples to `out`.
///
/// Returns `(samples_decoded, bytes_consumed)`.
pub fn decode_frame(data: &[u8], out: &mut Vec<i16>) -> Result<(usize, usize), QoaError> {
    if data.len() < FRAME_HEADER_SIZE + LMS_STATE_SIZE {
        return Err(QoaError::Truncated);
    }

    let samples = u16::from_be_bytes([data[0], data[1]]) as usize;
    let declared = u16::from_be_bytes([data[2], data[3]]) as usize;
    if samples == 0 || samples > MAX_FRAME_SAMPLES {
        return Err(QoaError::BadSampleCount(samples));
    }
    let expected = frame_size(samples);
    if declared != expected {
        return Err(QoaError::BadFrameSize { declared, expected });
    }
    if data.len() < expected {
        return Err(QoaError::Truncated);
    }

    let mut lms = Lms::read(&data[FRAME_HEADER_SIZE..FRAME_HEADER_SIZE + LMS_STATE_SIZE]);
    out.reserve(samples);

    let slices = &data[FRAME_HEADER_SIZE + LMS_STATE_SIZE..expected];
    let mut remaining = samples;
    for bytes in slices.chunks_exact(8) {
        let mut word = [0u8; 8];
        word.copy_from_slice(bytes);
        let count = remaining.min(SLICE_LEN);
        decode_slice(u64::from_be_bytes(word), &mut lms, out, count);
        remaining -= count;
    }

    Ok((samples, expected))
}

/// Decode every frame in a packet, appending samples to `out`.
///
/// Returns the number of samples appended.
pub fn decode(data: &[u8], out: &mut Vec<i16>) -> Result<usize, QoaError> {
    let mut offset = 0;
    let mut total = 0;
    while offset < data.len() {
        let (samples, consumed) = decode_frame(&data[offset..], out)?;
        offset += consumed;
        total += samples;
    }
    Ok(total)
}
