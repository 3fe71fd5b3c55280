//! Mixing helpers for the software device: interpolation, panning, distance
//! falloff and soft clipping

/// Read one interpolated frame from interleaved PCM.
///
/// `frame` is the integer frame index and `frac` the fractional position
/// toward the next frame. Mono data is returned on both sides. When
/// `wrap` is set the last frame interpolates toward frame 0.
#[inline]
pub(super) fn read_frame(data: &[i16], channels: u16, frame: usize, frac: f32, wrap: bool) -> (f32, f32) {
    let ch = channels.max(1) as usize;
    let frames = data.len() / ch;
    debug_assert!(frame < frames);

    let next = if frame + 1 < frames {
        frame + 1
    } else if wrap {
        0
    } else {
        frame
    };

    let at = |f: usize, c: usize| data[f * ch + c.min(ch - 1)] as f32 / 32768.0;
    let lerp = |c: usize| {
        let a = at(frame, c);
        a + (at(next, c) - a) * frac
    };

    (lerp(0), lerp(1))
}

/// Linear falloff between `near` (full gain) and `far` (silent).
#[inline]
pub fn distance_gain(distance: f32, near: f32, far: f32) -> f32 {
    if distance <= near {
        1.0
    } else if distance >= far || far <= near {
        0.0
    } else {
        1.0 - (distance - near) / (far - near)
    }
}

/// cos(i * PI/32) for i = 0..=16, scaled to 0-255
const PAN_COS_LUT: [u8; 17] = [
    255, 254, 251, 245, 237, 226, 213, 198, 181, 162, 142, 121, 98, 75, 51, 26, 0,
];

#[inline]
fn pan_gains(pan: f32) -> (f32, f32) {
    let pos = (pan.clamp(-1.0, 1.0) + 1.0) * 8.0;
    let idx = (pos as usize).min(15);
    let frac = pos - idx as f32;

    let left = PAN_COS_LUT[idx] as f32 * (1.0 - frac) + PAN_COS_LUT[idx + 1] as f32 * frac;
    let right = PAN_COS_LUT[16 - idx] as f32 * (1.0 - frac) + PAN_COS_LUT[15 - idx] as f32 * frac;

    (left / 255.0, right / 255.0)
}

/// Equal-power pan of a mono sample: -1 is hard left, 0 is centre (-3 dB per
/// side), +1 is hard right.
#[inline]
pub fn apply_pan(sample: f32, pan: f32, volume: f32) -> (f32, f32) {
    let (left, right) = pan_gains(pan);
    let scaled = sample * volume;
    (scaled * left, scaled * right)
}

/// tanh(t) for t = 0.00, 0.25, ..., 7.00
const TANH_LUT: [f32; 29] = [
    0.0, 0.244919, 0.462117, 0.635149, 0.761594, 0.848284, 0.905148, 0.941389, 0.964028,
    0.978034, 0.986614, 0.991815, 0.995055, 0.997109, 0.998396, 0.999198, 0.999665, 0.999892,
    0.999988, 0.999998, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0,
];

/// Pass [-1, 1] through untouched and squash anything louder toward ±2.
#[inline]
pub fn soft_clip(x: f32) -> f32 {
    if x.abs() <= 1.0 {
        return x;
    }

    let pos = (x.abs() - 1.0).min(7.0) * 4.0;
    let idx = (pos as usize).min(27);
    let frac = pos - idx as f32;
    let tanh = TANH_LUT[idx] * (1.0 - frac) + TANH_LUT[idx + 1] * frac;

    x.signum() * (1.0 + tanh)
}
