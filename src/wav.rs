//! IQ recordings in WAV files
//!
//! I and Q travel as the left and right channels of a stereo WAV.
//!
//! **Reading**: 8, 16, 24 and 32 bit integer files and 32 bit float files
//! are accepted and scaled to C64 (`x / (2^(bits-1) - 1)` for 16 bits and
//! wider, `x / 128` for 8 bit).
//!
//! **Writing**: always 32 bit float, so a recording of a C64 stream is
//! lossless.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use hound::{SampleFormat as WavFormat, WavReader, WavSpec, WavWriter};
use tracing::debug;

use crate::error::{Error, Result};
use crate::samples::{Complex32, SampleFormat, Samples, SamplesMut};
use crate::stream::{ReadStream, WriteStream};

/// Streams a two-channel WAV file as C64 samples
pub struct WavIqReader {
    inner: WavReader<BufReader<File>>,
    spec: WavSpec,
    divisor: f32,
}

impl WavIqReader {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let inner = WavReader::open(path)?;
        let spec = inner.spec();
        if spec.channels != 2 {
            return Err(Error::Wav {
                message: format!("expected 2 channels (I/Q), found {}", spec.channels),
            });
        }
        let divisor = match (spec.sample_format, spec.bits_per_sample) {
            (WavFormat::Float, 32) => 1.0,
            (WavFormat::Int, 8) => 128.0,
            (WavFormat::Int, bits @ 16..=32) => ((1u32 << (bits - 1)) - 1) as f32,
            (format, bits) => {
                return Err(Error::Wav {
                    message: format!("unsupported sample layout {:?} {} bit", format, bits),
                })
            }
        };
        debug!(?spec, "opened iq wav");
        Ok(Self {
            inner,
            spec,
            divisor,
        })
    }

    /// Total IQ pairs in the file
    pub fn len(&self) -> usize {
        self.inner.duration() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn fill<I>(out: &mut [Complex32], values: I, divisor: f32) -> Result<usize>
where
    I: Iterator<Item = hound::Result<f32>>,
{
    let mut values = values;
    let mut n = 0;
    while n < out.len() {
        let Some(i) = values.next() else { break };
        let Some(q) = values.next() else {
            return Err(Error::UnexpectedEof);
        };
        out[n] = Complex32::new(i? / divisor, q? / divisor);
        n += 1;
    }
    Ok(n)
}

impl ReadStream for WavIqReader {
    fn read(&mut self, buf: SamplesMut<'_>) -> Result<usize> {
        let out = buf.into_c64()?;
        let divisor = self.divisor;
        match self.spec.sample_format {
            WavFormat::Float => fill(out, self.inner.samples::<f32>(), divisor),
            WavFormat::Int => fill(
                out,
                self.inner.samples::<i32>().map(|s| s.map(|v| v as f32)),
                divisor,
            ),
        }
    }

    fn sample_rate(&self) -> u32 {
        self.spec.sample_rate
    }

    fn sample_format(&self) -> SampleFormat {
        SampleFormat::C64
    }
}

/// Records C64 samples to a two-channel 32 bit float WAV file
///
/// The header is finalized on [`close`](WriteStream::close) or drop.
pub struct WavIqWriter {
    inner: Option<WavWriter<BufWriter<File>>>,
    sample_rate: u32,
}

impl WavIqWriter {
    pub fn create<P: AsRef<Path>>(path: P, sample_rate: u32) -> Result<Self> {
        let spec = WavSpec {
            channels: 2,
            sample_rate,
            bits_per_sample: 32,
            sample_format: WavFormat::Float,
        };
        Ok(Self {
            inner: Some(WavWriter::create(path, spec)?),
            sample_rate,
        })
    }
}

impl WriteStream for WavIqWriter {
    fn write(&mut self, buf: &Samples) -> Result<usize> {
        let samples = buf.as_c64()?;
        let writer = self.inner.as_mut().ok_or(Error::PipeClosed)?;
        for s in samples {
            writer.write_sample(s.re)?;
            writer.write_sample(s.im)?;
        }
        Ok(samples.len())
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn sample_format(&self) -> SampleFormat {
        SampleFormat::C64
    }

    fn close(&mut self) -> Result<()> {
        match self.inner.take() {
            Some(writer) => Ok(writer.finalize()?),
            None => Ok(()),
        }
    }
}
