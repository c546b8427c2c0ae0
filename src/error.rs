//! Crate-wide error type
//!
//! Every fallible operation in the crate returns [`Error`]. The enum is
//! `Clone` so that a latched failure (a pipe overrun, a grafter that died on
//! a read error) can be handed back to every later caller unchanged.

use std::fmt;
use std::sync::Arc;

use snafu::Snafu;

use crate::samples::SampleFormat;

/// Which part of a coherent session a stream error came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Cross-correlation trials of the stream aligner
    Measuring,
    /// Discarding samples to slide streams into lock
    Draining,
    /// Synchronized read for the phase estimator
    PhaseEstimation,
    /// Block reads of the grafter
    Grafting,
    /// A plain parallel fetch
    Fetch,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Measuring => "measuring",
            Stage::Draining => "draining",
            Stage::PhaseEstimation => "phase estimation",
            Stage::Grafting => "grafting",
            Stage::Fetch => "fetch",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    /// Two buffers or a buffer and a stream disagree on sample format
    #[snafu(display("iq sample formats do not match: expected {expected}, got {actual}"))]
    SampleFormatMismatch {
        expected: SampleFormat,
        actual: SampleFormat,
    },

    /// The operation is not implemented for this sample format
    #[snafu(display("iq sample format {format} is not supported here"))]
    SampleFormatUnknown { format: SampleFormat },

    /// Destination buffer cannot hold the result
    #[snafu(display("destination sample buffer is too small: need {needed}, have {available}"))]
    DstTooSmall { needed: usize, available: usize },

    /// Buffers that must be the same length are not
    #[snafu(display("buffer lengths do not match exactly: {lengths:?}"))]
    LengthMismatch { lengths: Vec<usize> },

    /// Frequency is outside (-nyquist, +nyquist]
    #[snafu(display("frequency {freq} Hz is out of the sampling range (nyquist {nyquist} Hz)"))]
    FrequencyOutOfRange { freq: f64, nyquist: f64 },

    /// Bin index is outside the frequency buffer
    #[snafu(display("bin {bin} is out of range for a {len} bin buffer"))]
    BinOutOfRange { bin: usize, len: usize },

    /// Frequency range with low above high
    #[snafu(display("invalid frequency range: {low} Hz to {high} Hz"))]
    InvalidRange { low: f64, high: f64 },

    /// The FFT backend failed to plan or run a transform
    #[snafu(display("fft backend error: {message}"))]
    Fft { message: String },

    /// A pipe write found the queue full; latched until the pipe is dropped
    #[snafu(display("buffer overrun"))]
    BufferOverrun,

    /// The pipe was closed
    #[snafu(display("pipe is closed"))]
    PipeClosed,

    /// A stream ended before a full buffer could be read
    #[snafu(display("unexpected end of stream"))]
    UnexpectedEof,

    /// A stream failed during a multi-stream operation
    #[snafu(display("stream {index} failed during {stage}: {source}"))]
    Stream {
        index: usize,
        stage: Stage,
        #[snafu(source(from(Error, Box::new)))]
        source: Box<Error>,
    },

    /// The stream aligner hit its attempt limit without reaching sample lock
    #[snafu(display("streams failed to converge after {attempts} attempts"))]
    ConvergenceFailed { attempts: usize },

    /// Cross-correlation was identically zero, usually a silent stream
    #[snafu(display("no correlation peak between stream {stream} and the reference"))]
    NoCorrelationPeak { stream: usize },

    /// The session was cancelled through its token
    #[snafu(display("operation cancelled"))]
    Cancelled,

    /// Streams that must share a sample rate do not
    #[snafu(display("stream {index} runs at {actual} sps, expected {expected} sps"))]
    SampleRateMismatch {
        index: usize,
        expected: u32,
        actual: u32,
    },

    /// A config value is unusable
    #[snafu(display("invalid configuration: {message}"))]
    InvalidConfig { message: String },

    /// The receiver does not offer the requested capability
    #[snafu(display("feature not supported by this device: {feature}"))]
    NotSupported { feature: &'static str },

    /// I/O failure from a file or socket backed stream
    #[snafu(display("i/o error: {source}"))]
    Io {
        #[snafu(source(from(std::io::Error, Arc::new)))]
        source: Arc<std::io::Error>,
    },

    /// WAV container error
    #[snafu(display("wav error: {message}"))]
    Wav { message: String },
}

impl From<std::io::Error> for Error {
    fn from(source: std::io::Error) -> Self {
        Error::Io {
            source: Arc::new(source),
        }
    }
}

impl From<hound::Error> for Error {
    fn from(err: hound::Error) -> Self {
        match err {
            hound::Error::IoError(source) => Error::Io {
                source: Arc::new(source),
            },
            other => Error::Wav {
                message: other.to_string(),
            },
        }
    }
}

impl Error {
    /// Strip any stream/stage wrapping and return the underlying cause
    pub fn root(&self) -> &Error {
        match self {
            Error::Stream { source, .. } => source.root(),
            other => other,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_unwraps_nested_stream_errors() {
        let err = Error::Stream {
            index: 2,
            stage: Stage::Draining,
            source: Box::new(Error::UnexpectedEof),
        };
        assert!(matches!(err.root(), Error::UnexpectedEof));
        assert_eq!(
            err.to_string(),
            "stream 2 failed during draining: unexpected end of stream"
        );
    }

    #[test]
    fn test_errors_clone_for_latching() {
        let err = Error::from(std::io::Error::new(std::io::ErrorKind::Other, "usb gone"));
        let copy = err.clone();
        assert_eq!(err.to_string(), copy.to_string());
    }
}
