//! IQ sample buffers
//!
//! A sample buffer is a fixed-length run of IQ pairs tagged with the format
//! it is stored in. Receivers hand back whatever their hardware produces
//! (the rtl-sdr speaks interleaved `u8`, most others `i16`), while all of the
//! DSP in this crate runs on [`SampleFormat::C64`], pairs of `f32` held as
//! [`Complex32`].
//!
//! **Conversions to C64**:
//! - `U8`: `(x - 127.5) / 127.5`
//! - `I8`: `x / 128` (so -128 maps to exactly -1.0)
//! - `I16`: `x / 32767`

use std::fmt;
use std::ops::Range;

pub use num::complex::Complex32;

use crate::error::{Error, Result};

/// Storage format of an IQ buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleFormat {
    /// `Complex32`, interleaved `f32` I/Q
    C64,
    /// Interleaved `u8`, 127.5 is zero
    U8,
    /// Interleaved `i8`
    I8,
    /// Interleaved `i16`
    I16,
}

impl SampleFormat {
    /// Bytes needed for one IQ pair
    pub fn size(&self) -> usize {
        match self {
            SampleFormat::U8 | SampleFormat::I8 => 2,
            SampleFormat::I16 => 4,
            SampleFormat::C64 => 8,
        }
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SampleFormat::C64 => "complex64",
            SampleFormat::U8 => "interleaved uint8",
            SampleFormat::I8 => "interleaved int8",
            SampleFormat::I16 => "interleaved int16",
        };
        f.write_str(name)
    }
}

/// An owned IQ buffer
#[derive(Debug, Clone, PartialEq)]
pub enum Samples {
    C64(Vec<Complex32>),
    U8(Vec<[u8; 2]>),
    I8(Vec<[i8; 2]>),
    I16(Vec<[i16; 2]>),
}

impl Samples {
    /// Allocate a zeroed buffer of `len` IQ pairs
    pub fn new(format: SampleFormat, len: usize) -> Self {
        match format {
            SampleFormat::C64 => Samples::C64(vec![Complex32::new(0.0, 0.0); len]),
            SampleFormat::U8 => Samples::U8(vec![[127, 127]; len]),
            SampleFormat::I8 => Samples::I8(vec![[0, 0]; len]),
            SampleFormat::I16 => Samples::I16(vec![[0, 0]; len]),
        }
    }

    pub fn format(&self) -> SampleFormat {
        match self {
            Samples::C64(_) => SampleFormat::C64,
            Samples::U8(_) => SampleFormat::U8,
            Samples::I8(_) => SampleFormat::I8,
            Samples::I16(_) => SampleFormat::I16,
        }
    }

    /// Number of IQ pairs (not bytes)
    pub fn len(&self) -> usize {
        match self {
            Samples::C64(s) => s.len(),
            Samples::U8(s) => s.len(),
            Samples::I8(s) => s.len(),
            Samples::I16(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Size of the buffer in bytes
    pub fn size(&self) -> usize {
        self.len() * self.format().size()
    }

    /// Borrow the whole buffer as a mutable view
    pub fn as_mut(&mut self) -> SamplesMut<'_> {
        match self {
            Samples::C64(s) => SamplesMut::C64(s),
            Samples::U8(s) => SamplesMut::U8(s),
            Samples::I8(s) => SamplesMut::I8(s),
            Samples::I16(s) => SamplesMut::I16(s),
        }
    }

    pub fn as_c64(&self) -> Result<&[Complex32]> {
        match self {
            Samples::C64(s) => Ok(s),
            other => Err(Error::SampleFormatMismatch {
                expected: SampleFormat::C64,
                actual: other.format(),
            }),
        }
    }

    pub fn as_c64_mut(&mut self) -> Result<&mut [Complex32]> {
        match self {
            Samples::C64(s) => Ok(s),
            other => Err(Error::SampleFormatMismatch {
                expected: SampleFormat::C64,
                actual: other.format(),
            }),
        }
    }
}

impl From<Vec<Complex32>> for Samples {
    fn from(samples: Vec<Complex32>) -> Self {
        Samples::C64(samples)
    }
}

/// A borrowed, mutable view over part of an IQ buffer
///
/// This is what stream readers fill. It can be narrowed with
/// [`SamplesMut::slice`] so a reader can be asked for the tail of a
/// partially filled buffer.
#[derive(Debug)]
pub enum SamplesMut<'a> {
    C64(&'a mut [Complex32]),
    U8(&'a mut [[u8; 2]]),
    I8(&'a mut [[i8; 2]]),
    I16(&'a mut [[i16; 2]]),
}

impl<'a> SamplesMut<'a> {
    pub fn format(&self) -> SampleFormat {
        match self {
            SamplesMut::C64(_) => SampleFormat::C64,
            SamplesMut::U8(_) => SampleFormat::U8,
            SamplesMut::I8(_) => SampleFormat::I8,
            SamplesMut::I16(_) => SampleFormat::I16,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            SamplesMut::C64(s) => s.len(),
            SamplesMut::U8(s) => s.len(),
            SamplesMut::I8(s) => s.len(),
            SamplesMut::I16(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reborrow a sub-range of this view
    ///
    /// Panics if `range` is out of bounds, like slice indexing.
    pub fn slice(&mut self, range: Range<usize>) -> SamplesMut<'_> {
        match self {
            SamplesMut::C64(s) => SamplesMut::C64(&mut s[range]),
            SamplesMut::U8(s) => SamplesMut::U8(&mut s[range]),
            SamplesMut::I8(s) => SamplesMut::I8(&mut s[range]),
            SamplesMut::I16(s) => SamplesMut::I16(&mut s[range]),
        }
    }

    /// Unwrap a C64 view, or fail with a format mismatch
    pub fn into_c64(self) -> Result<&'a mut [Complex32]> {
        match self {
            SamplesMut::C64(s) => Ok(s),
            other => Err(Error::SampleFormatMismatch {
                expected: SampleFormat::C64,
                actual: other.format(),
            }),
        }
    }
}

impl<'a> From<&'a mut [Complex32]> for SamplesMut<'a> {
    fn from(samples: &'a mut [Complex32]) -> Self {
        SamplesMut::C64(samples)
    }
}

impl<'a> From<&'a mut Vec<Complex32>> for SamplesMut<'a> {
    fn from(samples: &'a mut Vec<Complex32>) -> Self {
        SamplesMut::C64(samples.as_mut_slice())
    }
}

/// Convert the first `count` pairs of `src` into `dst` as C64
///
/// Returns the number of samples written. `dst` must hold at least `count`
/// samples.
pub fn convert_to_c64(src: &Samples, count: usize, dst: &mut [Complex32]) -> Result<usize> {
    if count > src.len() {
        return Err(Error::DstTooSmall {
            needed: count,
            available: src.len(),
        });
    }
    if count > dst.len() {
        return Err(Error::DstTooSmall {
            needed: count,
            available: dst.len(),
        });
    }
    let dst = &mut dst[..count];
    match src {
        Samples::C64(s) => dst.copy_from_slice(&s[..count]),
        Samples::U8(s) => {
            for (out, iq) in dst.iter_mut().zip(s.iter()) {
                *out = Complex32::new(
                    (iq[0] as f32 - 127.5) / 127.5,
                    (iq[1] as f32 - 127.5) / 127.5,
                );
            }
        }
        Samples::I8(s) => {
            for (out, iq) in dst.iter_mut().zip(s.iter()) {
                *out = Complex32::new(iq[0] as f32 / 128.0, iq[1] as f32 / 128.0);
            }
        }
        Samples::I16(s) => {
            for (out, iq) in dst.iter_mut().zip(s.iter()) {
                *out = Complex32::new(
                    iq[0] as f32 / i16::MAX as f32,
                    iq[1] as f32 / i16::MAX as f32,
                );
            }
        }
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_buffers_are_zero_valued() {
        let s = Samples::new(SampleFormat::U8, 4);
        assert_eq!(s.len(), 4);
        assert_eq!(s.size(), 8);

        let mut out = vec![Complex32::new(9.0, 9.0); 4];
        convert_to_c64(&s, 4, &mut out).unwrap();
        for c in out {
            assert!(c.norm() < 0.01, "u8 midpoint should be ~0, got {}", c);
        }
    }

    #[test]
    fn test_convert_extremes() {
        let u8s = Samples::U8(vec![[0, 255]]);
        let i8s = Samples::I8(vec![[-128, 64]]);
        let i16s = Samples::I16(vec![[i16::MAX, 0]]);
        let mut out = [Complex32::new(0.0, 0.0)];

        convert_to_c64(&u8s, 1, &mut out).unwrap();
        assert_eq!(out[0], Complex32::new(-1.0, 1.0));

        convert_to_c64(&i8s, 1, &mut out).unwrap();
        assert_eq!(out[0], Complex32::new(-1.0, 0.5));

        convert_to_c64(&i16s, 1, &mut out).unwrap();
        assert_eq!(out[0], Complex32::new(1.0, 0.0));
    }

    #[test]
    fn test_convert_dst_too_small() {
        let s = Samples::new(SampleFormat::I16, 8);
        let mut out = vec![Complex32::new(0.0, 0.0); 4];
        assert!(matches!(
            convert_to_c64(&s, 8, &mut out),
            Err(Error::DstTooSmall { needed: 8, available: 4 })
        ));
    }

    #[test]
    fn test_slice_narrows_view() {
        let mut s = Samples::new(SampleFormat::C64, 10);
        let mut view = s.as_mut();
        let tail = view.slice(6..10);
        assert_eq!(tail.len(), 4);
        assert_eq!(tail.format(), SampleFormat::C64);
    }

    #[test]
    fn test_as_c64_rejects_other_formats() {
        let mut s = Samples::new(SampleFormat::I8, 2);
        assert!(matches!(
            s.as_c64_mut(),
            Err(Error::SampleFormatMismatch { expected: SampleFormat::C64, actual: SampleFormat::I8 })
        ));
    }
}
