//! Grafter
//!
//! Stitches N sample-locked, phase-corrected streams tuned to adjacent bands
//! into one stream at N times the sample rate.
//!
//! **Per block** (M samples per input, N inputs):
//! 1. read one M-sample buffer from every input (concurrently)
//! 2. forward transform each buffer into its own M-bin segment of an
//!    N*M frequency vector
//! 3. shift each segment so its negative frequencies come first, scaling by
//!    1/M
//! 4. inverse transform the whole N*M vector once
//! 5. hand the N*M-sample block to the backpressure pipe
//!
//! Segment `k` lands in output bins `k*M..(k+1)*M`, so input `k` must be
//! tuned to the band those bins cover (see [`crate::coherent::band_plan`]).
//!
//! The loop runs on a background thread. Any read or transform error ends
//! it and is latched into the pipe, where the consumer sees it on its next
//! read. The pipe never blocks the loop; a consumer that falls behind gets
//! [`Error::BufferOverrun`].

use std::thread::{self, JoinHandle};

use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::error::{Error, Result, Stage};
use crate::fft::{Direction, FrequencySlice, Order, Plan, Planner};
use crate::samples::{Complex32, SampleFormat, Samples, SamplesMut};
use crate::stream::{close_all, common_sample_rate, pipe, PipeReader, PipeWriter, ReadStream};
use crate::align::read_buffers;

/// Grafter configuration
#[derive(Debug, Clone)]
pub struct GraftConfig {
    /// Samples read from each input per block (M)
    pub block_len: usize,
    /// Output blocks the pipe may queue before latching an overrun
    pub pipe_capacity: usize,
}

impl Default for GraftConfig {
    fn default() -> Self {
        Self {
            block_len: 64 * 1024,
            pipe_capacity: 16,
        }
    }
}

impl GraftConfig {
    pub fn validate(&self) -> Result<()> {
        if self.block_len < 2 {
            return Err(Error::InvalidConfig {
                message: format!("block_len must be at least 2, got {}", self.block_len),
            });
        }
        if self.pipe_capacity == 0 {
            return Err(Error::InvalidConfig {
                message: "pipe_capacity must be at least 1".into(),
            });
        }
        Ok(())
    }
}

pub struct Grafter;

impl Grafter {
    /// Plan every transform, then start the graft loop on its own thread
    ///
    /// Setup problems (no inputs, mismatched rates, non-C64 inputs, planner
    /// failures) are returned here rather than through the pipe.
    ///
    /// # Arguments
    /// * `planner` - FFT backend
    /// * `readers` - aligned inputs, in band order
    /// * `config` - block and queue sizes
    /// * `cancel` - stops the loop at its next block
    pub fn start<R>(
        planner: &dyn Planner,
        readers: Vec<R>,
        config: GraftConfig,
        cancel: CancelToken,
    ) -> Result<GraftReader>
    where
        R: ReadStream + 'static,
    {
        config.validate()?;
        let streams = readers.len();
        let input_rate = common_sample_rate(&readers)?;
        if let Some(reader) = readers.iter().find(|r| r.sample_format() != SampleFormat::C64) {
            return Err(Error::SampleFormatUnknown {
                format: reader.sample_format(),
            });
        }
        let output_rate = u32::try_from(streams)
            .ok()
            .and_then(|n| input_rate.checked_mul(n))
            .ok_or_else(|| Error::InvalidConfig {
                message: format!("{} streams at {} sps overflows the output rate", streams, input_rate),
            })?;

        let m = config.block_len;
        let buffers: Vec<Samples> = (0..streams)
            .map(|_| Samples::new(SampleFormat::C64, m))
            .collect();
        let freq = vec![Complex32::new(0.0, 0.0); m * streams];
        let out = Samples::new(SampleFormat::C64, m * streams);

        let forward = buffers
            .iter()
            .zip(freq.chunks(m))
            .map(|(buf, segment)| planner.plan(buf, segment, Direction::Forward))
            .collect::<Result<Vec<_>>>()?;
        let backward = planner.plan(&out, &freq, Direction::Backward)?;

        let (pipe_reader, pipe_writer) = pipe(config.pipe_capacity, output_rate)?;

        let worker = GraftWorker {
            readers,
            buffers,
            freq,
            out,
            forward,
            backward,
            writer: pipe_writer,
            input_rate,
            cancel: cancel.clone(),
        };
        let handle = thread::Builder::new()
            .name("grafter".into())
            .spawn(move || worker.run())
            .map_err(Error::from)?;

        info!(streams, input_rate, output_rate, block_len = m, "grafter started");
        Ok(GraftReader {
            pipe: pipe_reader,
            cancel,
            worker: Some(handle),
        })
    }
}

struct GraftWorker<R> {
    readers: Vec<R>,
    buffers: Vec<Samples>,
    freq: Vec<Complex32>,
    out: Samples,
    forward: Vec<Box<dyn Plan>>,
    backward: Box<dyn Plan>,
    writer: PipeWriter,
    input_rate: u32,
    cancel: CancelToken,
}

impl<R: ReadStream> GraftWorker<R> {
    fn run(mut self) {
        let mut blocks = 0u64;
        let err = loop {
            match self.graft_block() {
                Ok(()) => blocks += 1,
                Err(e) => break e,
            }
        };
        match err {
            Error::Cancelled | Error::PipeClosed => debug!(blocks, "grafter stopped"),
            ref other => warn!(blocks, error = %other, "grafter failed"),
        }
        self.writer.close_with_error(err);

        for plan in self.forward.iter_mut().chain(std::iter::once(&mut self.backward)) {
            if let Err(e) = plan.close() {
                debug!(error = %e, "closing plan");
            }
        }
        if let Err(e) = close_all(&mut self.readers) {
            warn!(error = %e, "closing grafter inputs");
        }
    }

    fn graft_block(&mut self) -> Result<()> {
        self.cancel.check()?;
        read_buffers(&mut self.readers, &mut self.buffers, Stage::Grafting)?;

        let m = self.buffers[0].len();
        let rate = self.input_rate;
        let scale = 1.0 / m as f32;
        self.freq
            .par_chunks_mut(m)
            .zip(self.forward.par_iter_mut())
            .zip(self.buffers.par_iter_mut())
            .try_for_each(|((segment, plan), buf)| -> Result<()> {
                plan.transform(buf.as_c64_mut()?, segment)?;
                FrequencySlice::new(segment, rate, Order::ZeroFirst).shift_and_scale(scale);
                Ok(())
            })?;

        self.backward.transform(self.out.as_c64_mut()?, &mut self.freq)?;
        self.writer.write_c64(self.out.as_c64()?)?;
        Ok(())
    }
}

/// Consumer side of a running grafter
///
/// Reads C64 samples at N times the input rate. Closing it cancels the
/// graft loop and closes the pipe; the loop exits after any read already in
/// progress and then closes its inputs.
pub struct GraftReader {
    pipe: PipeReader,
    cancel: CancelToken,
    worker: Option<JoinHandle<()>>,
}

impl GraftReader {
    /// Block until the graft loop has exited
    ///
    /// Only returns once something has stopped the loop (close, cancel, an
    /// input error or an overrun).
    pub fn join(&mut self) {
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                warn!("grafter thread panicked");
            }
        }
    }
}

impl ReadStream for GraftReader {
    fn read(&mut self, buf: SamplesMut<'_>) -> Result<usize> {
        self.pipe.read(buf)
    }

    fn sample_rate(&self) -> u32 {
        self.pipe.sample_rate()
    }

    fn sample_format(&self) -> SampleFormat {
        SampleFormat::C64
    }

    fn close(&mut self) -> Result<()> {
        self.cancel.cancel();
        self.pipe.close()
    }
}

impl Drop for GraftReader {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.pipe.handle().close();
    }
}
