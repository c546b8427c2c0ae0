use crate::error::{Error, Result};
use crate::samples::{Complex32, SampleFormat, SamplesMut};

use super::ReadStream;

/// Multiplies every sample read by a constant complex value
///
/// With a unit-magnitude multiplier this rotates each IQ sample by a fixed
/// phase, which is how phase rotators from the estimator are applied.
pub struct MultiplyReader<R> {
    inner: R,
    multiplier: Complex32,
}

impl<R: ReadStream> MultiplyReader<R> {
    /// Wrap a C64 reader; other formats must go through `ConvertReader` first
    pub fn new(inner: R, multiplier: Complex32) -> Result<Self> {
        if inner.sample_format() != SampleFormat::C64 {
            return Err(Error::SampleFormatUnknown {
                format: inner.sample_format(),
            });
        }
        Ok(Self { inner, multiplier })
    }

    pub fn set_multiplier(&mut self, multiplier: Complex32) {
        self.multiplier = multiplier;
    }

    pub fn multiplier(&self) -> Complex32 {
        self.multiplier
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: ReadStream> ReadStream for MultiplyReader<R> {
    fn read(&mut self, buf: SamplesMut<'_>) -> Result<usize> {
        let out = buf.into_c64()?;
        let n = self.inner.read(SamplesMut::C64(&mut *out))?;
        if self.multiplier != Complex32::new(1.0, 0.0) {
            for s in out[..n].iter_mut() {
                *s *= self.multiplier;
            }
        }
        Ok(n)
    }

    fn sample_rate(&self) -> u32 {
        self.inner.sample_rate()
    }

    fn sample_format(&self) -> SampleFormat {
        SampleFormat::C64
    }

    fn close(&mut self) -> Result<()> {
        self.inner.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::SyntheticStream;
    use crate::stream::read_full;
    use std::f32::consts::FRAC_PI_2;
    use std::sync::Arc;

    #[test]
    fn test_rotates_by_multiplier() {
        let signal = Arc::new(vec![Complex32::new(1.0, 0.0); 8]);
        let stream = SyntheticStream::new(signal, 1000);
        let mut r = MultiplyReader::new(stream, Complex32::from_polar(1.0, FRAC_PI_2)).unwrap();

        let mut buf = vec![Complex32::new(0.0, 0.0); 4];
        read_full(&mut r, (&mut buf).into()).unwrap();
        for s in buf {
            assert!((s - Complex32::new(0.0, 1.0)).norm() < 1e-6);
        }
    }
}
