//! Sample and phase alignment of independent receivers
//!
//! Receivers clocked from a shared reference still start streaming at
//! slightly different moments and with arbitrary carrier phase. This module
//! removes both.
//!
//! **Module Organization**:
//! - `fetch` - fill one buffer per stream concurrently
//! - `aligner` - cross-correlate and drain until every stream is in sample lock
//! - `phase` - constant per-stream phase rotators for locked streams
//!
//! **Typical flow**:
//! 1. [`align_readers`] until the offset vector is all zero
//! 2. [`phase_offsets`] on the same readers
//! 3. wrap each reader in a `MultiplyReader` with its rotator

mod aligner;
mod fetch;
mod phase;

pub use aligner::{align_readers, AlignReport, AlignState, StreamAligner};
pub use fetch::read_buffers;
pub use phase::{phase_offsets, phase_offsets_of};

use crate::error::{Error, Result};

/// Stream aligner configuration
#[derive(Debug, Clone)]
pub struct AlignConfig {
    /// Samples per stream in each correlation trial (and the phase read)
    pub buffer_len: usize,
    /// Trials per measurement round that must all agree
    pub trials: usize,
    /// Measurement rounds allowed before giving up; `None` never gives up
    pub max_attempts: Option<usize>,
}

impl Default for AlignConfig {
    fn default() -> Self {
        Self {
            buffer_len: 64 * 1024,
            trials: 10,
            max_attempts: Some(64),
        }
    }
}

impl AlignConfig {
    pub fn validate(&self) -> Result<()> {
        if self.buffer_len < 2 {
            return Err(Error::InvalidConfig {
                message: format!("buffer_len must be at least 2, got {}", self.buffer_len),
            });
        }
        if self.trials == 0 {
            return Err(Error::InvalidConfig {
                message: "trials must be at least 1".into(),
            });
        }
        if self.max_attempts == Some(0) {
            return Err(Error::InvalidConfig {
                message: "max_attempts of zero can never converge".into(),
            });
        }
        Ok(())
    }
}
