//! Backpressure pipe
//!
//! A bounded queue of pre-copied C64 blocks between one producer and one
//! consumer. Writes never block: a write that finds the queue full latches
//! [`Error::BufferOverrun`] and from then on every read and write on either
//! end fails with that error. Samples are never dropped silently.
//!
//! Closing either end (or the shared [`PipeHandle`]) latches
//! [`Error::PipeClosed`] and wakes a reader blocked waiting for data.
//!
//! A producer that stops on its own failure hands it over with
//! `close_with_error`. The reader first drains the blocks queued before the
//! failure, then sees the error. Dropping the writer without closing drains
//! the same way and ends in `PipeClosed`.

use std::sync::{Arc, Mutex};

use crossbeam::channel::{self, select, Receiver, Sender, TryRecvError, TrySendError};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::samples::{Complex32, SampleFormat, Samples, SamplesMut};

use super::{ReadStream, WriteStream};

#[derive(Debug)]
struct Shared {
    state: Mutex<Option<Error>>,
    // Never sent on; dropping it disconnects `done` and wakes the reader.
    done: Mutex<Option<Sender<()>>>,
}

impl Shared {
    fn latched(&self) -> Option<Error> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Record `err` unless an earlier error is already latched; returns the
    /// error that is in effect afterwards
    fn latch(&self, err: Error) -> Error {
        let effective = {
            let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
            state.get_or_insert(err).clone()
        };
        self.done
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        effective
    }
}

/// Clonable handle that can close the pipe from any thread
#[derive(Debug, Clone)]
pub struct PipeHandle {
    shared: Arc<Shared>,
}

impl PipeHandle {
    /// Idempotent
    pub fn close(&self) {
        self.shared.latch(Error::PipeClosed);
    }

    /// Close the pipe so that every later call reports `err`
    ///
    /// The first latched error wins; closing an overrun pipe keeps reporting
    /// the overrun.
    pub fn close_with_error(&self, err: Error) {
        self.shared.latch(err);
    }

    /// The latched error, if the pipe has failed or been closed
    pub fn error(&self) -> Option<Error> {
        self.shared.latched()
    }
}

/// Create a pipe that can queue `capacity` blocks of C64 samples at
/// `sample_rate`
pub fn pipe(capacity: usize, sample_rate: u32) -> Result<(PipeReader, PipeWriter)> {
    if capacity == 0 {
        return Err(Error::InvalidConfig {
            message: "pipe capacity must be at least one block".into(),
        });
    }
    let (tx, rx) = channel::bounded(capacity);
    let (done_tx, done_rx) = channel::bounded(0);
    let shared = Arc::new(Shared {
        state: Mutex::new(None),
        done: Mutex::new(Some(done_tx)),
    });

    let reader = PipeReader {
        rx,
        done: done_rx,
        pending: Vec::new(),
        pos: 0,
        sample_rate,
        shared: Arc::clone(&shared),
    };
    let writer = PipeWriter {
        tx,
        sample_rate,
        shared,
    };
    Ok((reader, writer))
}

/// Consumer end of a [`pipe`]
pub struct PipeReader {
    rx: Receiver<Vec<Complex32>>,
    done: Receiver<()>,
    pending: Vec<Complex32>,
    pos: usize,
    sample_rate: u32,
    shared: Arc<Shared>,
}

impl PipeReader {
    pub fn handle(&self) -> PipeHandle {
        PipeHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    fn closed_error(&self) -> Error {
        self.shared.latched().unwrap_or(Error::PipeClosed)
    }

    /// Wait for the next queued block; `Err` once the pipe has nothing more
    /// to give
    fn next_block(&mut self) -> Result<Vec<Complex32>> {
        match self.rx.try_recv() {
            Ok(block) => return Ok(block),
            Err(TryRecvError::Disconnected) => return Err(self.closed_error()),
            Err(TryRecvError::Empty) => {}
        }
        if let Some(err) = self.shared.latched() {
            return Err(err);
        }
        select! {
            recv(self.rx) -> block => block.map_err(|_| self.closed_error()),
            recv(self.done) -> _ => match self.rx.try_recv() {
                Ok(block) => Ok(block),
                Err(_) => Err(self.closed_error()),
            },
        }
    }
}

/// Errors that discard whatever is still queued
fn is_terminal(err: &Error) -> bool {
    matches!(err, Error::BufferOverrun | Error::PipeClosed)
}

impl ReadStream for PipeReader {
    fn read(&mut self, buf: SamplesMut<'_>) -> Result<usize> {
        let out = buf.into_c64()?;
        if let Some(err) = self.shared.latched().filter(is_terminal) {
            return Err(err);
        }
        if out.is_empty() {
            return Ok(0);
        }

        if self.pos >= self.pending.len() {
            self.pending = self.next_block()?;
            self.pos = 0;
        }

        let n = out.len().min(self.pending.len() - self.pos);
        out[..n].copy_from_slice(&self.pending[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn sample_format(&self) -> SampleFormat {
        SampleFormat::C64
    }

    fn close(&mut self) -> Result<()> {
        self.shared.latch(Error::PipeClosed);
        Ok(())
    }
}

/// Producer end of a [`pipe`]
pub struct PipeWriter {
    tx: Sender<Vec<Complex32>>,
    sample_rate: u32,
    shared: Arc<Shared>,
}

impl PipeWriter {
    pub fn handle(&self) -> PipeHandle {
        PipeHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Enqueue a copy of `samples` without blocking
    pub fn write_c64(&mut self, samples: &[Complex32]) -> Result<usize> {
        if let Some(err) = self.shared.latched() {
            return Err(err);
        }
        match self.tx.try_send(samples.to_vec()) {
            Ok(()) => Ok(samples.len()),
            Err(TrySendError::Full(_)) => {
                warn!(capacity = ?self.tx.capacity(), "pipe queue full, latching overrun");
                Err(self.shared.latch(Error::BufferOverrun))
            }
            Err(TrySendError::Disconnected(_)) => {
                debug!("pipe reader dropped");
                Err(self.shared.latch(Error::PipeClosed))
            }
        }
    }

    /// Close the pipe so the reader sees `err` on its next call
    pub fn close_with_error(&mut self, err: Error) {
        self.shared.latch(err);
    }
}

impl WriteStream for PipeWriter {
    fn write(&mut self, buf: &Samples) -> Result<usize> {
        let samples = buf.as_c64()?;
        self.write_c64(samples)
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn sample_format(&self) -> SampleFormat {
        SampleFormat::C64
    }

    fn close(&mut self) -> Result<()> {
        self.shared.latch(Error::PipeClosed);
        Ok(())
    }
}
