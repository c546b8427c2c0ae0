//! Uniform stream interface over live sample sources and sinks
//!
//! Every receiver, file, pipe and adapter in the crate speaks
//! [`ReadStream`] / [`WriteStream`]. A stream has a fixed sample rate and a
//! fixed sample format; buffers handed to it must match that format.
//!
//! **Module Organization**:
//! - `convert` - adapt any reader to C64
//! - `multiply` - apply a constant complex rotator
//! - `pipe` - bounded, fail-fast producer/consumer hand-off

mod convert;
mod multiply;
pub mod pipe;

pub use convert::ConvertReader;
pub use multiply::MultiplyReader;
pub use pipe::{pipe, PipeReader, PipeWriter};

use crate::error::{Error, Result};
use crate::samples::{Complex32, SampleFormat, Samples, SamplesMut};

/// A blocking source of IQ samples
///
/// Reads take `&mut self`, so a reader can only ever be driven by one
/// thread at a time.
pub trait ReadStream: Send {
    /// Read up to `buf.len()` samples, returning how many were written.
    ///
    /// `Ok(0)` on a non-empty buffer means the stream has ended.
    fn read(&mut self, buf: SamplesMut<'_>) -> Result<usize>;

    /// Samples per second
    fn sample_rate(&self) -> u32;

    fn sample_format(&self) -> SampleFormat;

    /// Release the underlying source
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// A blocking sink of IQ samples
pub trait WriteStream: Send {
    /// Write the whole of `buf`, returning how many samples were accepted
    fn write(&mut self, buf: &Samples) -> Result<usize>;

    fn sample_rate(&self) -> u32;

    fn sample_format(&self) -> SampleFormat;

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<R: ReadStream + ?Sized> ReadStream for Box<R> {
    fn read(&mut self, buf: SamplesMut<'_>) -> Result<usize> {
        (**self).read(buf)
    }

    fn sample_rate(&self) -> u32 {
        (**self).sample_rate()
    }

    fn sample_format(&self) -> SampleFormat {
        (**self).sample_format()
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

impl<W: WriteStream + ?Sized> WriteStream for Box<W> {
    fn write(&mut self, buf: &Samples) -> Result<usize> {
        (**self).write(buf)
    }

    fn sample_rate(&self) -> u32 {
        (**self).sample_rate()
    }

    fn sample_format(&self) -> SampleFormat {
        (**self).sample_format()
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

/// Owned, type-erased reader
pub type BoxedReader = Box<dyn ReadStream>;

/// Read until `buf` is completely filled
///
/// Short reads are retried. A reader that returns `Ok(0)` before the buffer
/// is full fails with [`Error::UnexpectedEof`].
pub fn read_full<R: ReadStream + ?Sized>(reader: &mut R, mut buf: SamplesMut<'_>) -> Result<usize> {
    let len = buf.len();
    let mut n = 0;
    while n < len {
        let read = reader.read(buf.slice(n..len))?;
        if read == 0 {
            return Err(Error::UnexpectedEof);
        }
        n += read;
    }
    Ok(n)
}

/// Read and throw away exactly `count` C64 samples, using `scratch` as the
/// landing buffer
pub fn discard<R: ReadStream + ?Sized>(
    reader: &mut R,
    count: usize,
    scratch: &mut [Complex32],
) -> Result<()> {
    if count > 0 && scratch.is_empty() {
        return Err(Error::DstTooSmall {
            needed: 1,
            available: 0,
        });
    }
    let mut remaining = count;
    while remaining > 0 {
        let chunk = remaining.min(scratch.len());
        read_full(reader, SamplesMut::C64(&mut scratch[..chunk]))?;
        remaining -= chunk;
    }
    Ok(())
}

/// Shared sample rate of a set of readers
///
/// Fails with [`Error::SampleRateMismatch`] naming the first reader that
/// disagrees with reader 0.
pub fn common_sample_rate<R: ReadStream>(readers: &[R]) -> Result<u32> {
    let Some(first) = readers.first() else {
        return Err(Error::InvalidConfig {
            message: "at least one stream is required".into(),
        });
    };
    let expected = first.sample_rate();
    for (index, reader) in readers.iter().enumerate().skip(1) {
        let actual = reader.sample_rate();
        if actual != expected {
            return Err(Error::SampleRateMismatch {
                index,
                expected,
                actual,
            });
        }
    }
    Ok(expected)
}

/// Close every reader, returning the first failure
pub fn close_all<R: ReadStream>(readers: &mut [R]) -> Result<()> {
    let mut first_err = None;
    for reader in readers.iter_mut() {
        if let Err(e) = reader.close() {
            first_err.get_or_insert(e);
        }
    }
    match first_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
