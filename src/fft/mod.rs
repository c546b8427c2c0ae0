//! Frequency-domain primitives
//!
//! The crate never calls an FFT library directly. Everything goes through the
//! [`Planner`] / [`Plan`] pair, so a different backend can be dropped in
//! without touching the aligner or the grafter. [`RustFftPlanner`] is the
//! backend shipped with the crate.
//!
//! **Module Organization**:
//! - `bins` - bin index to frequency arithmetic
//! - `convolve` - convolution and cross-correlation over planned transforms
//! - `rustfft_backend` - `Planner` implemented on the `rustfft` crate
//!
//! **Normalization**: plans are unnormalized in both directions, so a
//! forward then backward round trip returns the input scaled by its length.
//! Callers that need true amplitudes scale explicitly.

pub mod bins;
pub mod convolve;
mod rustfft_backend;

pub use bins::{FrequencyRange, FrequencySlice, Hz, Order};
pub use convolve::{convolve_once, Convolution, CrossCorrelator, FreqConvolution};
pub use rustfft_backend::RustFftPlanner;

use crate::error::{Error, Result};
use crate::samples::{Complex32, SampleFormat, Samples};

/// Which way a plan transforms
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Time domain to frequency domain
    Forward,
    /// Frequency domain to time domain
    Backward,
}

/// A transform bound to one length and one direction
///
/// A plan is driven through `&mut self`; it owns its scratch space and can
/// not be shared between threads while running.
pub trait Plan: Send {
    /// Run the transform.
    ///
    /// `Forward` reads `time` and writes the first `len()` bins of `freq`.
    /// `Backward` reads the first `len()` bins of `freq` and writes `time`.
    /// Buffer shapes are checked on every call.
    fn transform(&mut self, time: &mut [Complex32], freq: &mut [Complex32]) -> Result<()>;

    /// Number of points in the transform
    fn len(&self) -> usize;

    fn direction(&self) -> Direction;

    /// Release backend resources. Transforms after close fail.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Creates plans for concrete buffer shapes
pub trait Planner: Send + Sync {
    /// Plan a transform between `time` and `freq`
    ///
    /// # Errors
    /// * `SampleFormatUnknown` - `time` is not C64
    /// * `DstTooSmall` - `freq` is shorter than `time`
    fn plan(
        &self,
        time: &Samples,
        freq: &[Complex32],
        direction: Direction,
    ) -> Result<Box<dyn Plan>>;
}

/// Shape checks shared by every backend at plan time
pub(crate) fn validate_shapes(time: &Samples, freq: &[Complex32]) -> Result<usize> {
    if time.format() != SampleFormat::C64 {
        return Err(Error::SampleFormatUnknown {
            format: time.format(),
        });
    }
    if time.is_empty() {
        return Err(Error::InvalidConfig {
            message: "cannot plan a zero length transform".into(),
        });
    }
    if freq.len() < time.len() {
        return Err(Error::DstTooSmall {
            needed: time.len(),
            available: freq.len(),
        });
    }
    Ok(time.len())
}

/// Plan, run and close a single transform
pub fn transform_once(
    planner: &dyn Planner,
    time: &mut Samples,
    freq: &mut [Complex32],
    direction: Direction,
) -> Result<()> {
    let mut plan = planner.plan(time, freq, direction)?;
    let result = plan.transform(time.as_c64_mut()?, freq);
    plan.close()?;
    result
}
