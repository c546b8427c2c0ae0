//! Stream aligner
//!
//! Drives N streams into exact integer-sample lock. Stream 0 is the
//! reference; every other stream is measured against it.
//!
//! **Algorithm**:
//! 1. *Measuring*: run `trials` cross-correlation trials. Each trial reads a
//!    fresh buffer from every stream and records the signed lag of each
//!    stream against stream 0. If any trial disagrees the round is thrown
//!    away and measured again.
//! 2. *Draining*: with `max` the largest offset, if `max > 0` discard `max`
//!    samples from stream 0 and subtract `max` from every offset. Then
//!    discard `|offset|` samples from every stream left negative.
//! 3. A round whose agreed offsets were all zero means lock (*Converged*).
//!    Otherwise measure again to confirm.
//!
//! Each round counts against `max_attempts`. Cancellation is polled between
//! trials and before draining.

use snafu::ResultExt;
use tracing::{debug, info, instrument, trace, warn};

use crate::cancel::CancelToken;
use crate::error::{Error, Result, Stage, StreamSnafu};
use crate::fft::{CrossCorrelator, Planner};
use crate::samples::{Complex32, SampleFormat, Samples};
use crate::stream::{common_sample_rate, discard, ReadStream};

use super::{read_buffers, AlignConfig};

/// Where the aligner is in its state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlignState {
    Measuring,
    /// Agreed offsets waiting to be drained
    Draining(Vec<isize>),
    Converged,
}

/// Outcome of a successful alignment
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlignReport {
    /// Measurement rounds run, including rounds without consensus
    pub attempts: usize,
    /// Rounds where the trials disagreed
    pub rejected: usize,
    /// Samples discarded from each stream in total
    pub drained: Vec<usize>,
}

/// Cross-correlation driven sample aligner
///
/// Owns every buffer and plan it needs; build once, then [`run`](Self::run).
pub struct StreamAligner {
    config: AlignConfig,
    correlator: CrossCorrelator,
    buffers: Vec<Samples>,
    scratch: Vec<Complex32>,
    state: AlignState,
    report: AlignReport,
}

impl StreamAligner {
    pub fn new(planner: &dyn Planner, streams: usize, config: AlignConfig) -> Result<Self> {
        config.validate()?;
        if streams == 0 {
            return Err(Error::InvalidConfig {
                message: "at least one stream is required".into(),
            });
        }
        let correlator = CrossCorrelator::new(planner, config.buffer_len)?;
        let buffers = (0..streams)
            .map(|_| Samples::new(SampleFormat::C64, config.buffer_len))
            .collect();
        Ok(Self {
            scratch: vec![Complex32::new(0.0, 0.0); config.buffer_len],
            correlator,
            buffers,
            state: AlignState::Measuring,
            report: AlignReport {
                drained: vec![0; streams],
                ..Default::default()
            },
            config,
        })
    }

    pub fn state(&self) -> &AlignState {
        &self.state
    }

    /// Run the state machine until every stream is in sample lock
    ///
    /// # Errors
    /// * `ConvergenceFailed` - `max_attempts` rounds without lock
    /// * `Cancelled` - `cancel` fired between steps
    /// * `Stream` - a read failed, tagged with stream index and stage
    #[instrument(skip_all, fields(streams = readers.len()))]
    pub fn run<R: ReadStream>(
        &mut self,
        readers: &mut [R],
        cancel: &CancelToken,
    ) -> Result<AlignReport> {
        if readers.len() != self.buffers.len() {
            return Err(Error::LengthMismatch {
                lengths: vec![self.buffers.len(), readers.len()],
            });
        }
        for (index, reader) in readers.iter().enumerate() {
            if reader.sample_format() != SampleFormat::C64 {
                return Err(Error::SampleFormatMismatch {
                    expected: SampleFormat::C64,
                    actual: reader.sample_format(),
                })
                .context(StreamSnafu {
                    index,
                    stage: Stage::Measuring,
                });
            }
        }
        common_sample_rate(readers)?;

        loop {
            match std::mem::replace(&mut self.state, AlignState::Measuring) {
                AlignState::Measuring => {
                    if let Some(max) = self.config.max_attempts {
                        if self.report.attempts >= max {
                            warn!(attempts = self.report.attempts, "alignment did not converge");
                            return Err(Error::ConvergenceFailed {
                                attempts: self.report.attempts,
                            });
                        }
                    }
                    self.report.attempts += 1;
                    match self.measure(readers, cancel)? {
                        Some(offsets) => {
                            debug!(attempt = self.report.attempts, ?offsets, "offsets agreed");
                            self.state = AlignState::Draining(offsets);
                        }
                        None => {
                            self.report.rejected += 1;
                            debug!(attempt = self.report.attempts, "trials disagree, re-measuring");
                        }
                    }
                }
                AlignState::Draining(offsets) => {
                    cancel.check()?;
                    if offsets.iter().all(|&o| o == 0) {
                        self.state = AlignState::Converged;
                    } else {
                        self.drain(readers, offsets)?;
                    }
                }
                AlignState::Converged => {
                    self.state = AlignState::Converged;
                    info!(
                        attempts = self.report.attempts,
                        drained = ?self.report.drained,
                        "streams in sample lock"
                    );
                    return Ok(self.report.clone());
                }
            }
        }
    }

    /// One measurement round; `None` when the trials disagree
    fn measure<R: ReadStream>(
        &mut self,
        readers: &mut [R],
        cancel: &CancelToken,
    ) -> Result<Option<Vec<isize>>> {
        let mut agreed: Option<Vec<isize>> = None;
        for trial in 0..self.config.trials {
            cancel.check()?;
            read_buffers(readers, &mut self.buffers, Stage::Measuring)?;
            let offsets = self.correlate()?;
            trace!(trial, ?offsets, "trial offsets");
            match &agreed {
                None => agreed = Some(offsets),
                Some(first) if *first == offsets => {}
                Some(_) => return Ok(None),
            }
        }
        Ok(agreed)
    }

    /// Signed lag of every stream against stream 0 for the current buffers
    fn correlate(&mut self) -> Result<Vec<isize>> {
        let mut offsets = vec![0isize; self.buffers.len()];
        let (head, tail) = self.buffers.split_at_mut(1);
        let reference = head[0].as_c64_mut()?;
        for (i, buf) in tail.iter_mut().enumerate() {
            let index = i + 1;
            offsets[index] = self.correlator.lag(reference, buf.as_c64_mut()?, index)?;
        }
        Ok(offsets)
    }

    fn drain<R: ReadStream>(&mut self, readers: &mut [R], mut offsets: Vec<isize>) -> Result<()> {
        let max = offsets.iter().copied().max().unwrap_or(0);
        if max > 0 {
            self.discard(readers, 0, max as usize)?;
            for offset in offsets.iter_mut().skip(1) {
                *offset -= max;
            }
        }
        for (index, &offset) in offsets.iter().enumerate() {
            if offset < 0 {
                self.discard(readers, index, offset.unsigned_abs())?;
            }
        }
        debug!(drained = ?self.report.drained, "drained streams");
        Ok(())
    }

    fn discard<R: ReadStream>(&mut self, readers: &mut [R], index: usize, count: usize) -> Result<()> {
        trace!(index, count, "discarding samples");
        discard(&mut readers[index], count, &mut self.scratch).context(StreamSnafu {
            index,
            stage: Stage::Draining,
        })?;
        self.report.drained[index] += count;
        Ok(())
    }

    pub fn close(&mut self) -> Result<()> {
        self.correlator.close()
    }
}

/// Build a [`StreamAligner`] for `readers` and run it to lock
pub fn align_readers<R: ReadStream>(
    planner: &dyn Planner,
    readers: &mut [R],
    config: &AlignConfig,
    cancel: &CancelToken,
) -> Result<AlignReport> {
    let mut aligner = StreamAligner::new(planner, readers.len(), config.clone())?;
    let report = aligner.run(readers, cancel);
    aligner.close()?;
    report
}
