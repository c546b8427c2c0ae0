use std::sync::Arc;

use rand::prelude::*;
use rand_distr::StandardNormal;

use crate::error::Result;
use crate::samples::{Complex32, SampleFormat, SamplesMut};
use crate::stream::ReadStream;

/// A receiver stand-in that replays a periodic signal
///
/// Sample `n` of the stream is `signal[(n + delay) mod len] * rotator`, plus
/// optional independent noise. Several streams built on one shared signal
/// with different delays and rotations model receivers that are skewed in
/// time and carrier phase.
pub struct SyntheticStream {
    signal: Arc<Vec<Complex32>>,
    sample_rate: u32,
    pos: usize,
    rotator: Complex32,
    noise: Option<(f32, StdRng)>,
    remaining: Option<usize>,
}

impl SyntheticStream {
    pub fn new(signal: Arc<Vec<Complex32>>, sample_rate: u32) -> Self {
        Self {
            signal,
            sample_rate,
            pos: 0,
            rotator: Complex32::new(1.0, 0.0),
            noise: None,
            remaining: None,
        }
    }

    /// Start `delay` samples into the signal. Positive delays make this
    /// stream lead one built with delay 0.
    pub fn with_delay(mut self, delay: isize) -> Self {
        let len = self.signal.len() as isize;
        if len > 0 {
            self.pos = (self.pos as isize + delay).rem_euclid(len) as usize;
        }
        self
    }

    /// Rotate every sample by `phase` radians
    pub fn with_rotation(mut self, phase: f32) -> Self {
        self.rotator = Complex32::from_polar(1.0, phase);
        self
    }

    /// Add complex Gaussian noise of power `sigma^2`, seeded per stream
    pub fn with_noise(mut self, sigma: f32, seed: u64) -> Self {
        self.noise = Some((sigma / std::f32::consts::SQRT_2, StdRng::seed_from_u64(seed)));
        self
    }

    /// End the stream after `samples` samples
    pub fn with_limit(mut self, samples: usize) -> Self {
        self.remaining = Some(samples);
        self
    }
}

impl ReadStream for SyntheticStream {
    fn read(&mut self, buf: SamplesMut<'_>) -> Result<usize> {
        let out = buf.into_c64()?;
        let len = self.signal.len();
        if len == 0 {
            return Ok(0);
        }
        let n = match self.remaining {
            Some(remaining) => out.len().min(remaining),
            None => out.len(),
        };

        for s in out[..n].iter_mut() {
            *s = self.signal[self.pos] * self.rotator;
            self.pos += 1;
            if self.pos == len {
                self.pos = 0;
            }
        }
        if let Some((scale, rng)) = self.noise.as_mut() {
            for s in out[..n].iter_mut() {
                let i: f32 = rng.sample(StandardNormal);
                let q: f32 = rng.sample(StandardNormal);
                *s += Complex32::new(i * *scale, q * *scale);
            }
        }
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining -= n;
        }
        Ok(n)
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn sample_format(&self) -> SampleFormat {
        SampleFormat::C64
    }
}
