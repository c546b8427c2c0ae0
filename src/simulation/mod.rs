//! Synthetic IQ sources for tests and benchmarks
//!
//! **Module Organization**:
//! - `noise` - seeded complex Gaussian noise and power helpers
//! - `stream` - [`SyntheticStream`], a periodic signal replayed with a
//!   configurable delay, phase rotation, noise and length
//!
//! Noise-like reference signals are preferred for alignment tests: a pure
//! tone correlates equally well at every multiple of its period.

mod noise;
mod stream;

pub use noise::{add_noise, complex_noise, rms_power, sigma_for_snr};
pub use stream::SyntheticStream;

use crate::fft::Hz;
use crate::samples::Complex32;

/// `len` samples of a unit-amplitude complex tone at `freq`
///
/// Negative frequencies rotate clockwise. The phase is computed in `f64` so
/// long tones stay on frequency.
pub fn cw(freq: Hz, sample_rate: u32, len: usize) -> Vec<Complex32> {
    let step = 2.0 * std::f64::consts::PI * freq / sample_rate as f64;
    (0..len)
        .map(|n| {
            let phase = (step * n as f64).rem_euclid(2.0 * std::f64::consts::PI);
            Complex32::from_polar(1.0, phase as f32)
        })
        .collect()
}
