use rayon::prelude::*;
use tracing::{debug, instrument};

use crate::error::{Error, Result, Stage};
use crate::samples::{Complex32, SampleFormat, Samples};
use crate::stream::ReadStream;

use super::read_buffers;

/// Estimate the constant phase rotator of every stream relative to stream 0
///
/// Reads one synchronized buffer of `buffer_len` samples per stream, so the
/// readers must already be in sample lock. Returns one unit-magnitude
/// rotator per stream; multiplying a stream by its rotator removes its
/// carrier-phase offset. The rotator of stream 0 is exactly 1.
#[instrument(skip_all, fields(streams = readers.len(), buffer_len = buffer_len))]
pub fn phase_offsets<R: ReadStream>(readers: &mut [R], buffer_len: usize) -> Result<Vec<Complex32>> {
    if buffer_len == 0 {
        return Err(Error::InvalidConfig {
            message: "phase estimation needs a non-empty buffer".into(),
        });
    }
    let mut buffers: Vec<Samples> = readers
        .iter()
        .map(|_| Samples::new(SampleFormat::C64, buffer_len))
        .collect();
    read_buffers(readers, &mut buffers, Stage::PhaseEstimation)?;

    let views = buffers
        .iter()
        .map(|b| b.as_c64())
        .collect::<Result<Vec<_>>>()?;
    let rotators = phase_offsets_of(&views);
    debug!(?rotators, "phase rotators");
    Ok(rotators)
}

/// Phase rotators for buffers that are already sample aligned
///
/// For each non-reference stream the per-sample angle of
/// `reference[k] * conj(stream[k])` is averaged on the unit circle (the
/// argument of the summed unit phasors), not as a plain arithmetic mean of
/// the angles. Both agree for a constant offset, but only the circular mean
/// keeps an offset near +/-pi from wrapping to zero. Samples where either
/// stream is zero carry no phase and are skipped.
pub fn phase_offsets_of(buffers: &[&[Complex32]]) -> Vec<Complex32> {
    let Some((reference, streams)) = buffers.split_first() else {
        return Vec::new();
    };

    let mut rotators = vec![Complex32::new(1.0, 0.0)];
    rotators.par_extend(streams.par_iter().map(|stream| {
        let sum = reference
            .iter()
            .zip(stream.iter())
            .map(|(r, s)| r * s.conj())
            .filter(|p| p.norm_sqr() > 0.0)
            .fold(Complex32::new(0.0, 0.0), |acc, p| acc + p / p.norm());
        if sum.norm_sqr() == 0.0 {
            Complex32::new(1.0, 0.0)
        } else {
            Complex32::from_polar(1.0, sum.arg())
        }
    }));
    rotators
}
