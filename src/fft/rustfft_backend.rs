use std::sync::{Arc, Mutex};

use rustfft::{Fft, FftPlanner};
use tracing::trace;

use crate::error::{Error, Result};
use crate::samples::{Complex32, Samples};

use super::{validate_shapes, Direction, Plan, Planner};

/// [`Planner`] backed by `rustfft`
///
/// The underlying `FftPlanner` caches twiddle tables per length, so plans
/// for the same length created from one planner share them.
pub struct RustFftPlanner {
    inner: Mutex<FftPlanner<f32>>,
}

impl RustFftPlanner {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(FftPlanner::new()),
        }
    }
}

impl Default for RustFftPlanner {
    fn default() -> Self {
        Self::new()
    }
}

impl Planner for RustFftPlanner {
    fn plan(
        &self,
        time: &Samples,
        freq: &[Complex32],
        direction: Direction,
    ) -> Result<Box<dyn Plan>> {
        let len = validate_shapes(time, freq)?;
        let fft = {
            let mut planner = self.inner.lock().map_err(|_| Error::Fft {
                message: "planner lock poisoned".into(),
            })?;
            match direction {
                Direction::Forward => planner.plan_fft_forward(len),
                Direction::Backward => planner.plan_fft_inverse(len),
            }
        };
        let scratch = vec![Complex32::new(0.0, 0.0); fft.get_inplace_scratch_len()];
        trace!(len, ?direction, "planned rustfft transform");
        Ok(Box::new(RustFftPlan {
            fft,
            direction,
            scratch,
            closed: false,
        }))
    }
}

struct RustFftPlan {
    fft: Arc<dyn Fft<f32>>,
    direction: Direction,
    scratch: Vec<Complex32>,
    closed: bool,
}

impl Plan for RustFftPlan {
    fn transform(&mut self, time: &mut [Complex32], freq: &mut [Complex32]) -> Result<()> {
        if self.closed {
            return Err(Error::Fft {
                message: "transform on a closed plan".into(),
            });
        }
        let len = self.fft.len();
        if time.len() != len {
            return Err(Error::LengthMismatch {
                lengths: vec![len, time.len()],
            });
        }
        if freq.len() < len {
            return Err(Error::DstTooSmall {
                needed: len,
                available: freq.len(),
            });
        }

        let freq = &mut freq[..len];
        match self.direction {
            Direction::Forward => {
                freq.copy_from_slice(time);
                self.fft.process_with_scratch(freq, &mut self.scratch);
            }
            Direction::Backward => {
                time.copy_from_slice(freq);
                self.fft.process_with_scratch(time, &mut self.scratch);
            }
        }
        Ok(())
    }

    fn len(&self) -> usize {
        self.fft.len()
    }

    fn direction(&self) -> Direction {
        self.direction
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        self.scratch = Vec::new();
        Ok(())
    }
}
