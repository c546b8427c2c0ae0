//! Bin index to frequency arithmetic
//!
//! A [`FrequencySlice`] pairs a frequency-domain buffer with the sample rate
//! it was taken at and the ordering of its bins.
//!
//! **Orderings** for a buffer of `len` bins at `fs` samples per second:
//! - `ZeroFirst`: bin 0 is 0 Hz, rising to +Nyquist at `len / 2`, then
//!   wrapping to negative frequencies that climb back towards 0 Hz
//! - `NegativeFirst`: bin 0 is the most negative frequency, 0 Hz sits at
//!   `len / 2`, rising to the last bin
//!
//! **Edges**: the valid frequency interval is `(-nyquist, +nyquist]`. For an
//! even length the Nyquist bin is reported as `+nyquist` in both orders,
//! which under `NegativeFirst` means bin 0 maps to `+nyquist`. A frequency
//! that is not an exact multiple of the bin bandwidth truncates toward 0 Hz.

use crate::error::{Error, Result};
use crate::samples::Complex32;

/// Frequency in Hertz
pub type Hz = f64;

/// Tolerance (in bins) under which a frequency snaps to an exact bin
const SNAP_BINS: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    ZeroFirst,
    NegativeFirst,
}

impl Order {
    pub fn flipped(self) -> Self {
        match self {
            Order::ZeroFirst => Order::NegativeFirst,
            Order::NegativeFirst => Order::ZeroFirst,
        }
    }
}

/// Closed interval of frequencies, `low <= high`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrequencyRange {
    pub low: Hz,
    pub high: Hz,
}

impl FrequencyRange {
    pub fn new(low: Hz, high: Hz) -> Self {
        Self { low, high }
    }

    pub fn center(&self) -> Hz {
        (self.low + self.high) / 2.0
    }

    pub fn width(&self) -> Hz {
        self.high - self.low
    }
}

/// Frequency-domain buffer with its sample rate and bin order
#[derive(Debug)]
pub struct FrequencySlice<'a> {
    data: &'a mut [Complex32],
    sample_rate: u32,
    order: Order,
}

impl<'a> FrequencySlice<'a> {
    pub fn new(data: &'a mut [Complex32], sample_rate: u32, order: Order) -> Self {
        Self {
            data,
            sample_rate,
            order,
        }
    }

    pub fn data(&self) -> &[Complex32] {
        &*self.data
    }

    pub fn data_mut(&mut self) -> &mut [Complex32] {
        &mut *self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn order(&self) -> Order {
        self.order
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Width of one bin: `sample_rate / len`
    pub fn bin_bandwidth(&self) -> Hz {
        self.sample_rate as Hz / self.len() as Hz
    }

    pub fn nyquist(&self) -> Hz {
        self.sample_rate as Hz / 2.0
    }

    fn check_freq(&self, freq: Hz) -> Result<()> {
        let nyquist = self.nyquist();
        if freq > nyquist || freq <= -nyquist || self.is_empty() {
            return Err(Error::FrequencyOutOfRange { freq, nyquist });
        }
        Ok(())
    }

    /// Signed bin offset from 0 Hz, truncated toward zero
    fn raw_index(&self, freq: Hz) -> i64 {
        let raw = freq / self.bin_bandwidth();
        let nearest = raw.round();
        if (raw - nearest).abs() < SNAP_BINS {
            nearest as i64
        } else {
            raw.trunc() as i64
        }
    }

    fn place(&self, raw: i64) -> usize {
        let len = self.len() as i64;
        match self.order {
            Order::ZeroFirst => raw.rem_euclid(len) as usize,
            Order::NegativeFirst => (raw + len / 2).rem_euclid(len) as usize,
        }
    }

    /// Bin holding `freq`
    ///
    /// # Errors
    /// `FrequencyOutOfRange` when `freq` is outside `(-nyquist, +nyquist]`.
    pub fn bin_by_freq(&self, freq: Hz) -> Result<usize> {
        self.check_freq(freq)?;
        Ok(self.place(self.raw_index(freq)))
    }

    /// Center frequency of `bin`
    pub fn freq_by_bin(&self, bin: usize) -> Result<Hz> {
        let len = self.len();
        if bin >= len {
            return Err(Error::BinOutOfRange { bin, len });
        }
        let len = len as i64;
        let bin = bin as i64;
        let mut signed = match self.order {
            Order::ZeroFirst => bin,
            Order::NegativeFirst => bin - len / 2,
        };
        // fold into (-len/2, len/2]
        if 2 * signed > len {
            signed -= len;
        } else if 2 * signed <= -len {
            signed += len;
        }
        Ok(signed as Hz * self.bin_bandwidth())
    }

    /// Bins covering `range`, in ascending frequency order
    ///
    /// Under `ZeroFirst` a range straddling 0 Hz comes back as the negative
    /// tail of the buffer followed by its head.
    pub fn bins_by_range(&self, range: FrequencyRange) -> Result<Vec<usize>> {
        if range.low > range.high {
            return Err(Error::InvalidRange {
                low: range.low,
                high: range.high,
            });
        }
        self.check_freq(range.low)?;
        self.check_freq(range.high)?;
        let low = self.raw_index(range.low);
        let high = self.raw_index(range.high);
        Ok((low..=high).map(|raw| self.place(raw)).collect())
    }

    /// Swap halves in place and flip the order tag
    ///
    /// Applying it twice restores both buffer and order, for any length.
    pub fn shift(&mut self) {
        let half = self.len() / 2;
        match self.order {
            Order::ZeroFirst => self.data.rotate_right(half),
            Order::NegativeFirst => self.data.rotate_left(half),
        }
        self.order = self.order.flipped();
    }

    /// [`shift`](Self::shift), then multiply every bin by `scale`
    pub fn shift_and_scale(&mut self, scale: f32) {
        self.shift();
        for v in self.data.iter_mut() {
            *v *= scale;
        }
    }
}
