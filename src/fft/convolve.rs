//! Convolution and cross-correlation over planned transforms
//!
//! Both operations run the same pipeline: forward-transform each operand,
//! combine the spectra bin by bin, then transform the product back. The
//! combine step folds in the `1/len` normalization, so a convolution with a
//! unit impulse at index 0 returns the other operand unchanged.
//!
//! **Cross-correlation lag convention**: `cross_correlate(a, b)` peaks at
//! index `d` when `b[n] == a[n + d]` (circularly), i.e. when `b` leads `a`
//! by `d` samples. Indices past the midpoint are read as negative lags.

use tracing::trace;

use crate::error::{Error, Result};
use crate::samples::{Complex32, SampleFormat, Samples};

use super::{Direction, Plan, Planner};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Combine {
    Multiply,
    Correlate,
}

/// Lengths and formats of every operand must agree, and must be C64
fn validate_operands(operands: &[&Samples]) -> Result<usize> {
    let len = operands[0].len();
    if operands.iter().any(|s| s.len() != len) {
        return Err(Error::LengthMismatch {
            lengths: operands.iter().map(|s| s.len()).collect(),
        });
    }
    let format = operands[0].format();
    if let Some(other) = operands.iter().find(|s| s.format() != format) {
        return Err(Error::SampleFormatMismatch {
            expected: format,
            actual: other.format(),
        });
    }
    if format != SampleFormat::C64 {
        return Err(Error::SampleFormatUnknown { format });
    }
    Ok(len)
}

fn check_run_lengths(len: usize, buffers: &[usize]) -> Result<()> {
    if buffers.iter().any(|&l| l != len) {
        let mut lengths = vec![len];
        lengths.extend_from_slice(buffers);
        return Err(Error::LengthMismatch { lengths });
    }
    Ok(())
}

/// Reusable circular convolution (or cross-correlation) of two buffers
///
/// Built once for a fixed length and run repeatedly; all plans and frequency
/// buffers are allocated at construction.
pub struct Convolution {
    forward_a: Box<dyn Plan>,
    forward_b: Box<dyn Plan>,
    backward: Box<dyn Plan>,
    freq_a: Vec<Complex32>,
    freq_b: Vec<Complex32>,
    combine: Combine,
    len: usize,
}

impl Convolution {
    /// Set up `dst = a (*) b`
    ///
    /// # Errors
    /// `LengthMismatch`, `SampleFormatMismatch` or `SampleFormatUnknown` if
    /// the buffers disagree or are not C64, and any planner error.
    pub fn convolve(planner: &dyn Planner, dst: &Samples, a: &Samples, b: &Samples) -> Result<Self> {
        Self::build(planner, dst, a, b, Combine::Multiply)
    }

    /// Set up `dst = a (x) b`, multiplying `a`'s spectrum by the conjugate
    /// of `b`'s
    pub fn cross_correlate(
        planner: &dyn Planner,
        dst: &Samples,
        a: &Samples,
        b: &Samples,
    ) -> Result<Self> {
        Self::build(planner, dst, a, b, Combine::Correlate)
    }

    fn build(
        planner: &dyn Planner,
        dst: &Samples,
        a: &Samples,
        b: &Samples,
        combine: Combine,
    ) -> Result<Self> {
        let len = validate_operands(&[dst, a, b])?;
        let freq_a = vec![Complex32::new(0.0, 0.0); len];
        let freq_b = vec![Complex32::new(0.0, 0.0); len];

        let forward_a = planner.plan(a, &freq_a, Direction::Forward)?;
        let forward_b = planner.plan(b, &freq_b, Direction::Forward)?;
        // the product is accumulated in freq_a, so backward reads from it
        let backward = planner.plan(dst, &freq_a, Direction::Backward)?;

        trace!(len, ?combine, "convolution planned");
        Ok(Self {
            forward_a,
            forward_b,
            backward,
            freq_a,
            freq_b,
            combine,
            len,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// Run on owned sample buffers
    pub fn run(&mut self, dst: &mut Samples, a: &mut Samples, b: &mut Samples) -> Result<()> {
        self.run_c64(dst.as_c64_mut()?, a.as_c64_mut()?, b.as_c64_mut()?)
    }

    /// Run directly on C64 slices
    pub fn run_c64(
        &mut self,
        dst: &mut [Complex32],
        a: &mut [Complex32],
        b: &mut [Complex32],
    ) -> Result<()> {
        check_run_lengths(self.len, &[dst.len(), a.len(), b.len()])?;

        self.forward_a.transform(a, &mut self.freq_a)?;
        self.forward_b.transform(b, &mut self.freq_b)?;

        let scale = 1.0 / self.len as f32;
        match self.combine {
            Combine::Multiply => {
                for (x, y) in self.freq_a.iter_mut().zip(self.freq_b.iter()) {
                    *x = *x * y * scale;
                }
            }
            Combine::Correlate => {
                for (x, y) in self.freq_a.iter_mut().zip(self.freq_b.iter()) {
                    *x = *x * y.conj() * scale;
                }
            }
        }

        self.backward.transform(dst, &mut self.freq_a)
    }

    /// Release all three plans
    pub fn close(&mut self) -> Result<()> {
        let results = [
            self.forward_a.close(),
            self.forward_b.close(),
            self.backward.close(),
        ];
        results.into_iter().collect()
    }
}

/// Convolution against a fixed, already transformed kernel
///
/// Saves one forward transform per run when the same filter is applied to
/// many buffers.
pub struct FreqConvolution {
    forward: Box<dyn Plan>,
    backward: Box<dyn Plan>,
    kernel: Vec<Complex32>,
    freq: Vec<Complex32>,
}

impl FreqConvolution {
    /// `freq_kernel` must be the unnormalized forward transform of the
    /// time-domain kernel, the same length as `src`.
    pub fn new(
        planner: &dyn Planner,
        dst: &Samples,
        src: &Samples,
        freq_kernel: Vec<Complex32>,
    ) -> Result<Self> {
        let len = validate_operands(&[dst, src])?;
        if freq_kernel.len() != len {
            return Err(Error::LengthMismatch {
                lengths: vec![len, freq_kernel.len()],
            });
        }
        let freq = vec![Complex32::new(0.0, 0.0); len];
        let forward = planner.plan(src, &freq, Direction::Forward)?;
        let backward = planner.plan(dst, &freq, Direction::Backward)?;
        Ok(Self {
            forward,
            backward,
            kernel: freq_kernel,
            freq,
        })
    }

    pub fn run(&mut self, dst: &mut Samples, src: &mut Samples) -> Result<()> {
        let dst = dst.as_c64_mut()?;
        let src = src.as_c64_mut()?;
        check_run_lengths(self.kernel.len(), &[dst.len(), src.len()])?;

        self.forward.transform(src, &mut self.freq)?;
        let scale = 1.0 / self.kernel.len() as f32;
        for (x, k) in self.freq.iter_mut().zip(self.kernel.iter()) {
            *x = *x * k * scale;
        }
        self.backward.transform(dst, &mut self.freq)
    }

    pub fn close(&mut self) -> Result<()> {
        let forward = self.forward.close();
        let backward = self.backward.close();
        forward.and(backward)
    }
}

/// Plan, run and close a single convolution
pub fn convolve_once(
    planner: &dyn Planner,
    dst: &mut Samples,
    a: &mut Samples,
    b: &mut Samples,
) -> Result<()> {
    let mut conv = Convolution::convolve(planner, dst, a, b)?;
    let result = conv.run(dst, a, b);
    conv.close()?;
    result
}

/// Persistent cross-correlator for a fixed buffer length
///
/// Owns its output buffer so repeated lag measurements allocate nothing.
pub struct CrossCorrelator {
    conv: Convolution,
    out: Vec<Complex32>,
}

impl CrossCorrelator {
    pub fn new(planner: &dyn Planner, len: usize) -> Result<Self> {
        let template = Samples::new(SampleFormat::C64, len);
        let conv = Convolution::cross_correlate(planner, &template, &template, &template)?;
        Ok(Self {
            conv,
            out: vec![Complex32::new(0.0, 0.0); len],
        })
    }

    pub fn len(&self) -> usize {
        self.out.len()
    }

    /// Signed lag of `stream` relative to `reference`
    ///
    /// Positive means `stream` leads the reference by that many samples.
    /// `stream_index` only labels a [`Error::NoCorrelationPeak`] failure.
    pub fn lag(
        &mut self,
        reference: &mut [Complex32],
        stream: &mut [Complex32],
        stream_index: usize,
    ) -> Result<isize> {
        self.conv.run_c64(&mut self.out, reference, stream)?;
        let peak = peak_index(&self.out).ok_or(Error::NoCorrelationPeak {
            stream: stream_index,
        })?;
        Ok(signed_lag(peak, self.out.len()))
    }

    /// Correlation output of the last [`lag`](Self::lag) call
    pub fn output(&self) -> &[Complex32] {
        &self.out
    }

    pub fn close(&mut self) -> Result<()> {
        self.conv.close()
    }
}

/// Index of the largest squared magnitude; `None` when every bin is zero
pub fn peak_index(data: &[Complex32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, v) in data.iter().enumerate() {
        let power = v.norm_sqr();
        if power == 0.0 {
            continue;
        }
        match best {
            Some((_, p)) if p >= power => {}
            _ => best = Some((i, power)),
        }
    }
    best.map(|(i, _)| i)
}

/// Read a circular index as a signed offset: indices past `len / 2` wrap
/// negative
pub fn signed_lag(index: usize, len: usize) -> isize {
    if index > len / 2 {
        index as isize - len as isize
    } else {
        index as isize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fft::RustFftPlanner;
    use crate::simulation::complex_noise;

    fn c64(v: Vec<Complex32>) -> Samples {
        Samples::C64(v)
    }

    #[test]
    fn test_convolve_with_unit_impulse_is_identity() {
        let planner = RustFftPlanner::new();
        let signal = complex_noise(128, 1.0, 7);
        let mut impulse = vec![Complex32::new(0.0, 0.0); 128];
        impulse[0] = Complex32::new(1.0, 0.0);

        let mut a = c64(signal.clone());
        let mut b = c64(impulse);
        let mut dst = Samples::new(SampleFormat::C64, 128);
        convolve_once(&planner, &mut dst, &mut a, &mut b).unwrap();

        for (got, want) in dst.as_c64().unwrap().iter().zip(signal.iter()) {
            assert!((got - want).norm() < 1e-4, "{} != {}", got, want);
        }
    }

    #[test]
    fn test_delayed_impulse_rotates() {
        let planner = RustFftPlanner::new();
        let signal = complex_noise(64, 1.0, 3);
        let mut impulse = vec![Complex32::new(0.0, 0.0); 64];
        impulse[5] = Complex32::new(1.0, 0.0);

        let mut a = c64(signal.clone());
        let mut b = c64(impulse);
        let mut dst = Samples::new(SampleFormat::C64, 64);
        convolve_once(&planner, &mut dst, &mut a, &mut b).unwrap();

        let out = dst.as_c64().unwrap();
        for n in 0..64 {
            assert!((out[(n + 5) % 64] - signal[n]).norm() < 1e-4);
        }
    }

    #[test]
    fn test_cross_correlation_peaks_at_signed_shift() {
        let planner = RustFftPlanner::new();
        let len = 1024;
        let reference = complex_noise(len, 1.0, 11);
        let mut xc = CrossCorrelator::new(&planner, len).unwrap();

        for shift in [0isize, 5, 200, -1, -300] {
            // stream[n] = reference[n + shift]
            let mut stream: Vec<Complex32> = (0..len as isize)
                .map(|n| reference[(n + shift).rem_euclid(len as isize) as usize])
                .collect();
            let mut r = reference.clone();
            assert_eq!(xc.lag(&mut r, &mut stream, 1).unwrap(), shift);
        }
    }

    #[test]
    fn test_silent_stream_has_no_peak() {
        let planner = RustFftPlanner::new();
        let mut xc = CrossCorrelator::new(&planner, 32).unwrap();
        let mut reference = complex_noise(32, 1.0, 1);
        let mut silent = vec![Complex32::new(0.0, 0.0); 32];
        assert!(matches!(
            xc.lag(&mut reference, &mut silent, 3),
            Err(Error::NoCorrelationPeak { stream: 3 })
        ));
    }

    #[test]
    fn test_freq_convolution_matches_time_kernel() {
        let planner = RustFftPlanner::new();
        let mut kernel = vec![Complex32::new(0.0, 0.0); 32];
        kernel[2] = Complex32::new(0.0, 1.0);
        let mut freq_kernel = vec![Complex32::new(0.0, 0.0); 32];
        let mut kernel_samples = c64(kernel);
        crate::fft::transform_once(&planner, &mut kernel_samples, &mut freq_kernel, Direction::Forward)
            .unwrap();

        let signal = complex_noise(32, 1.0, 5);
        let mut src = c64(signal.clone());
        let mut dst = Samples::new(SampleFormat::C64, 32);
        let mut conv = FreqConvolution::new(&planner, &dst, &src, freq_kernel).unwrap();
        conv.run(&mut dst, &mut src).unwrap();
        conv.close().unwrap();

        let out = dst.as_c64().unwrap();
        for n in 0..32 {
            let want = signal[n] * Complex32::new(0.0, 1.0);
            assert!((out[(n + 2) % 32] - want).norm() < 1e-4);
        }
    }

    #[test]
    fn test_setup_errors() {
        let planner = RustFftPlanner::new();
        let a = Samples::new(SampleFormat::C64, 16);
        let short = Samples::new(SampleFormat::C64, 8);
        assert!(matches!(
            Convolution::convolve(&planner, &a, &a, &short),
            Err(Error::LengthMismatch { .. })
        ));

        let raw = Samples::new(SampleFormat::I16, 16);
        assert!(matches!(
            Convolution::convolve(&planner, &a, &a, &raw),
            Err(Error::SampleFormatMismatch { .. })
        ));
        assert!(matches!(
            Convolution::cross_correlate(&planner, &raw, &raw, &raw),
            Err(Error::SampleFormatUnknown { .. })
        ));
    }

    #[test]
    fn test_signed_lag_wraps_past_midpoint() {
        assert_eq!(signed_lag(0, 100), 0);
        assert_eq!(signed_lag(50, 100), 50);
        assert_eq!(signed_lag(51, 100), -49);
        assert_eq!(signed_lag(99, 100), -1);
    }
}
