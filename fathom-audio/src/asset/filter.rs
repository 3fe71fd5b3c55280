//! Low-pass filtering for muffled playback

use smallvec::SmallVec;

/// Cutoff used for muffled buffers and muffled streams
pub const MUFFLE_CUTOFF_HZ: f32 = 1600.0;

/// Second-order low-pass (RBJ biquad, Q = 1/sqrt(2))
#[derive(Debug, Clone, Copy)]
pub(crate) struct LowPass {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
    x1: f32,
    x2: f32,
    y1: f32,
    y2: f32,
}

impl LowPass {
    pub fn new(sample_rate: u32, cutoff: f32) -> Self {
        let nyquist = sample_rate as f32 * 0.5;
        let cutoff = cutoff.clamp(1.0, nyquist * 0.99);
        let w0 = std::f32::consts::TAU * cutoff / sample_rate as f32;
        let (sin, cos) = w0.sin_cos();
        let alpha = sin / (2.0 * std::f32::consts::FRAC_1_SQRT_2);
        let a0 = 1.0 + alpha;

        Self {
            b0: (1.0 - cos) * 0.5 / a0,
            b1: (1.0 - cos) / a0,
            b2: (1.0 - cos) * 0.5 / a0,
            a1: -2.0 * cos / a0,
            a2: (1.0 - alpha) / a0,
            x1: 0.0,
            x2: 0.0,
            y1: 0.0,
            y2: 0.0,
        }
    }

    #[inline]
    pub fn process(&mut self, x: f32) -> f32 {
        let y = self.b0 * x + self.b1 * self.x1 + self.b2 * self.x2 - self.a1 * self.y1
            - self.a2 * self.y2;
        self.x2 = self.x1;
        self.x1 = x;
        self.y2 = self.y1;
        self.y1 = y;
        y
    }

    pub fn reset(&mut self) {
        self.x1 = 0.0;
        self.x2 = 0.0;
        self.y1 = 0.0;
        self.y2 = 0.0;
    }
}

/// One low-pass per interleaved channel, carrying state across chunks
#[derive(Debug, Clone)]
pub(crate) struct MuffleFilter {
    sides: SmallVec<[LowPass; 2]>,
}

impl MuffleFilter {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        let lp = LowPass::new(sample_rate, MUFFLE_CUTOFF_HZ);
        Self {
            sides: (0..channels.max(1)).map(|_| lp).collect(),
        }
    }

    /// Filter interleaved samples in place.
    pub fn apply(&mut self, samples: &mut [i16]) {
        let ch = self.sides.len();
        for (i, sample) in samples.iter_mut().enumerate() {
            let y = self.sides[i % ch].process(*sample as f32);
            *sample = y.round().clamp(i16::MIN as f32, i16::MAX as f32) as i16;
        }
    }

    pub fn reset(&mut self) {
        self.sides.iter_mut().for_each(LowPass::reset);
    }
}

/// Build the muffled rendering of a fully decoded sound.
pub(crate) fn muffle(samples: &[i16], channels: u16, sample_rate: u32) -> Vec<i16> {
    let mut out = samples.to_vec();
    MuffleFilter::new(sample_rate, channels).apply(&mut out);
    out
}
