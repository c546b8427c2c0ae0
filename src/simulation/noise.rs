use rand::prelude::*;
use rand_distr::StandardNormal;

use crate::samples::Complex32;

/// Seeded circular complex Gaussian noise
///
/// Each of I and Q is drawn from N(0, sigma / sqrt 2), so the mean power
/// `E|z|^2` is `sigma^2`. The same seed always yields the same samples.
pub fn complex_noise(len: usize, sigma: f32, seed: u64) -> Vec<Complex32> {
    let mut rng = StdRng::seed_from_u64(seed);
    let scale = sigma / std::f32::consts::SQRT_2;
    (0..len)
        .map(|_| {
            let i: f32 = rng.sample(StandardNormal);
            let q: f32 = rng.sample(StandardNormal);
            Complex32::new(i * scale, q * scale)
        })
        .collect()
}

/// Add seeded complex Gaussian noise of power `sigma^2` to `signal` in place
pub fn add_noise(signal: &mut [Complex32], sigma: f32, seed: u64) {
    let noise = complex_noise(signal.len(), sigma, seed);
    for (s, n) in signal.iter_mut().zip(noise) {
        *s += n;
    }
}

/// Root mean square magnitude of an IQ signal
pub fn rms_power(signal: &[Complex32]) -> f32 {
    if signal.is_empty() {
        return 0.0;
    }
    let sum: f32 = signal.iter().map(|s| s.norm_sqr()).sum();
    (sum / signal.len() as f32).sqrt()
}

/// Noise `sigma` that puts `signal` at `snr_db` above the noise floor
pub fn sigma_for_snr(signal: &[Complex32], snr_db: f32) -> f32 {
    rms_power(signal) / 10.0_f32.powf(snr_db / 20.0)
}
