//! Coherent receiver arrays
//!
//! Packages the align, phase and graft steps for any set of [`Receiver`]s
//! that share a reference clock.
//!
//! **Arrays**:
//! - [`CoherentArray`] - every receiver on the same frequency; returns N
//!   readers in sample and phase lock
//! - [`OffsetArray`] - receivers on adjacent bands; returns one grafted
//!   reader at N times the per-receiver rate
//!
//! Receivers are passed in explicitly. There is no driver registry.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::align::{align_readers, phase_offsets, AlignConfig, AlignReport};
use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::fft::{Hz, Planner};
use crate::graft::{GraftConfig, GraftReader, Grafter};
use crate::samples::Complex32;
use crate::stream::{close_all, BoxedReader, ConvertReader, MultiplyReader};

/// Optional capability: a switchable broadband noise source shared by all
/// receivers, used as the correlation reference while aligning
pub trait NoiseSource {
    fn set_noise_source(&mut self, enabled: bool) -> Result<()>;
}

/// One independently driven receiver
pub trait Receiver {
    fn sample_rate(&self) -> Result<u32>;

    fn set_sample_rate(&mut self, _rate: u32) -> Result<()> {
        Err(Error::NotSupported {
            feature: "sample rate control",
        })
    }

    fn set_center_frequency(&mut self, freq: Hz) -> Result<()>;

    /// Begin streaming. The returned reader may use any sample format.
    fn start_rx(&mut self) -> Result<BoxedReader>;

    /// The receiver's noise source, if it has one
    fn noise_source(&mut self) -> Option<&mut dyn NoiseSource> {
        None
    }
}

/// Readers of a coherent receive session, in sample and phase lock
pub type CoherentReader = MultiplyReader<ConvertReader<BoxedReader>>;

/// Result of [`CoherentArray::start_coherent_rx`]
pub struct CoherentSession {
    pub readers: Vec<CoherentReader>,
    /// Rotator applied to each reader, exactly 1 for reader 0
    pub rotators: Vec<Complex32>,
    pub report: AlignReport,
}

impl CoherentSession {
    pub fn close(&mut self) -> Result<()> {
        close_all(&mut self.readers)
    }
}

/// Receivers tuned to one frequency, combined into locked streams
pub struct CoherentArray<T> {
    receivers: Vec<T>,
    planner: Arc<dyn Planner>,
    config: AlignConfig,
    cancel: CancelToken,
}

impl<T: Receiver> CoherentArray<T> {
    pub fn new(planner: Arc<dyn Planner>, receivers: Vec<T>) -> Result<Self> {
        if receivers.is_empty() {
            return Err(Error::InvalidConfig {
                message: "a coherent array needs at least one receiver".into(),
            });
        }
        Ok(Self {
            receivers,
            planner,
            config: AlignConfig::default(),
            cancel: CancelToken::new(),
        })
    }

    pub fn with_config(mut self, config: AlignConfig) -> Self {
        self.config = config;
        self
    }

    /// Token that cancels alignment started by this array
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn receivers(&self) -> &[T] {
        &self.receivers
    }

    pub fn receivers_mut(&mut self) -> &mut [T] {
        &mut self.receivers
    }

    /// Shared per-receiver sample rate
    pub fn sample_rate(&self) -> Result<u32> {
        let expected = self.receivers[0].sample_rate()?;
        for (index, receiver) in self.receivers.iter().enumerate().skip(1) {
            let actual = receiver.sample_rate()?;
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

    pub fn set_center_frequency(&mut self, freq: Hz) -> Result<()> {
        for receiver in self.receivers.iter_mut() {
            receiver.set_center_frequency(freq)?;
        }
        Ok(())
    }

    fn set_noise_source(&mut self, enabled: bool) -> Result<bool> {
        let mut any = false;
        for receiver in self.receivers.iter_mut() {
            if let Some(source) = receiver.noise_source() {
                source.set_noise_source(enabled)?;
                any = true;
            }
        }
        Ok(any)
    }

    /// Start every receiver and bring the streams into sample and phase lock
    ///
    /// Checks rate equality, enables the noise source, starts the
    /// receivers, aligns, estimates phase, then disables the noise source.
    /// On failure every started reader is closed and the noise source is
    /// switched off again.
    #[instrument(skip_all, fields(receivers = self.receivers.len()))]
    pub fn start_coherent_rx(&mut self) -> Result<CoherentSession> {
        self.config.validate()?;
        let rate = self.sample_rate()?;

        match self.set_noise_source(true) {
            Ok(true) => {}
            Ok(false) => warn!("no receiver offers a noise source, aligning on the live signal"),
            Err(e) => {
                // sources enabled before the failure must not stay on
                if let Err(off_err) = self.set_noise_source(false) {
                    debug!(error = %off_err, "disabling noise source after enable failure");
                }
                return Err(e);
            }
        }

        let result = self.lock_streams();
        let disabled = self.set_noise_source(false);
        let session = result?;
        if let Err(e) = disabled {
            let mut session = session;
            if let Err(close_err) = session.close() {
                debug!(error = %close_err, "closing readers after noise source failure");
            }
            return Err(e);
        }

        info!(
            rate,
            attempts = session.report.attempts,
            rotators = ?session.rotators,
            "coherent receive started"
        );
        Ok(session)
    }

    fn lock_streams(&mut self) -> Result<CoherentSession> {
        let mut readers: Vec<ConvertReader<BoxedReader>> = Vec::with_capacity(self.receivers.len());
        for receiver in self.receivers.iter_mut() {
            match receiver.start_rx() {
                Ok(reader) => readers.push(ConvertReader::new(reader)),
                Err(e) => {
                    if let Err(close_err) = close_all(&mut readers) {
                        debug!(error = %close_err, "closing readers after start failure");
                    }
                    return Err(e);
                }
            }
        }

        let locked = align_readers(self.planner.as_ref(), &mut readers, &self.config, &self.cancel)
            .and_then(|report| {
                let rotators = phase_offsets(&mut readers, self.config.buffer_len)?;
                Ok((report, rotators))
            });
        let (report, rotators) = match locked {
            Ok(locked) => locked,
            Err(e) => {
                if let Err(close_err) = close_all(&mut readers) {
                    debug!(error = %close_err, "closing readers after lock failure");
                }
                return Err(e);
            }
        };

        let readers = readers
            .into_iter()
            .zip(rotators.iter())
            .map(|(reader, &rotator)| MultiplyReader::new(reader, rotator))
            .collect::<Result<Vec<_>>>()?;
        Ok(CoherentSession {
            readers,
            rotators,
            report,
        })
    }
}

/// Center frequency of each of `receivers` receivers so their bands tile
/// `receivers * sample_rate` Hz around `center`
///
/// Receiver `k` sits at `center + (k + 0.5) * sample_rate`, wrapped down by
/// the full span for the upper half of the indices. For four receivers this
/// is `+0.5, +1.5, -1.5, -0.5` times the sample rate, the order in which the
/// grafter expects its inputs. Only one receiver or an even number of them
/// tile cleanly.
pub fn band_plan(center: Hz, sample_rate: u32, receivers: usize) -> Vec<Hz> {
    let fs = sample_rate as Hz;
    let n = receivers as Hz;
    (0..receivers)
        .map(|k| {
            let mut offset = (k as Hz + 0.5) * fs;
            if 2 * k >= receivers {
                offset -= n * fs;
            }
            center + offset
        })
        .collect()
}

/// Receivers on adjacent bands, combined into one wideband receiver
pub struct OffsetArray<T> {
    array: CoherentArray<T>,
    center: Option<Hz>,
    graft: GraftConfig,
}

impl<T: Receiver> OffsetArray<T> {
    /// `receivers` must hold one receiver or an even number of them
    pub fn new(planner: Arc<dyn Planner>, receivers: Vec<T>) -> Result<Self> {
        if receivers.len() > 1 && receivers.len() % 2 != 0 {
            return Err(Error::InvalidConfig {
                message: format!("{} receivers can not tile a band evenly", receivers.len()),
            });
        }
        Ok(Self {
            array: CoherentArray::new(planner, receivers)?,
            center: None,
            graft: GraftConfig::default(),
        })
    }

    pub fn with_align_config(mut self, config: AlignConfig) -> Self {
        self.array = self.array.with_config(config);
        self
    }

    pub fn with_graft_config(mut self, config: GraftConfig) -> Self {
        self.graft = config;
        self
    }

    pub fn receivers(&self) -> &[T] {
        self.array.receivers()
    }

    fn streams(&self) -> u32 {
        self.array.receivers.len() as u32
    }

    /// Combined rate, N times the per-receiver rate
    pub fn sample_rate(&self) -> Result<u32> {
        let rate = self.array.sample_rate()?;
        let streams = self.streams();
        rate.checked_mul(streams).ok_or_else(|| Error::InvalidConfig {
            message: format!("{} receivers at {} sps overflows the combined rate", streams, rate),
        })
    }

    /// Set the combined rate; it must divide evenly between the receivers
    pub fn set_sample_rate(&mut self, rate: u32) -> Result<()> {
        let streams = self.streams();
        if rate % streams != 0 {
            return Err(Error::InvalidConfig {
                message: format!("sample rate {} is not divisible by {} receivers", rate, streams),
            });
        }
        for receiver in self.array.receivers_mut() {
            receiver.set_sample_rate(rate / streams)?;
        }
        // bands depend on the rate
        if let Some(center) = self.center {
            self.set_center_frequency(center)?;
        }
        Ok(())
    }

    /// Tune the receivers to tile the band around `center`
    pub fn set_center_frequency(&mut self, center: Hz) -> Result<()> {
        let rate = self.array.sample_rate()?;
        let plan = band_plan(center, rate, self.array.receivers.len());
        debug!(?plan, "band plan");
        for (receiver, &freq) in self.array.receivers_mut().iter_mut().zip(plan.iter()) {
            receiver.set_center_frequency(freq)?;
        }
        self.center = Some(center);
        Ok(())
    }

    /// Lock the receivers and start grafting them into one stream
    pub fn start_rx(&mut self) -> Result<GraftReader> {
        let session = self.array.start_coherent_rx()?;
        Grafter::start(
            self.array.planner.as_ref(),
            session.readers,
            self.graft.clone(),
            self.array.cancel.clone(),
        )
    }
}

impl<T: Receiver> Receiver for OffsetArray<T> {
    fn sample_rate(&self) -> Result<u32> {
        OffsetArray::sample_rate(self)
    }

    fn set_sample_rate(&mut self, rate: u32) -> Result<()> {
        OffsetArray::set_sample_rate(self, rate)
    }

    fn set_center_frequency(&mut self, freq: Hz) -> Result<()> {
        OffsetArray::set_center_frequency(self, freq)
    }

    fn start_rx(&mut self) -> Result<BoxedReader> {
        Ok(Box::new(OffsetArray::start_rx(self)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_band_plan_for_four_receivers() {
        let plan = band_plan(100e6, 2_000_000, 4);
        assert_eq!(plan, vec![101e6, 103e6, 97e6, 99e6]);
    }

    #[test]
    fn test_band_plan_two_receivers_and_one() {
        assert_eq!(band_plan(0.0, 1000, 2), vec![500.0, -500.0]);
        assert_eq!(band_plan(0.0, 1000, 1), vec![500.0]);
    }
}
