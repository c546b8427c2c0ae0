//! Coherent combining of independent SDR receivers
//!
//! Treats a set of receivers that share a reference clock as one
//! synchronized sensor: streams are cross-correlated into exact sample lock,
//! corrected for carrier-phase skew, and optionally grafted side by side in
//! frequency into one stream at N times the sample rate.
//!
//! **Module Organization**:
//! - `samples` / `stream` - IQ buffers and the uniform reader/writer interface
//! - `fft` - planner contract, rustfft backend, convolution and bin mapping
//! - `align` - parallel fetch, stream aligner and phase estimator
//! - `graft` - frequency-domain stitching of adjacent bands
//! - `coherent` - receiver arrays packaging the whole flow
//! - `simulation` / `wav` - synthetic sources and IQ recordings

pub mod align;
pub mod cancel;
pub mod coherent;
pub mod error;
pub mod fft;
pub mod graft;
pub mod samples;
pub mod simulation;
pub mod stream;
pub mod tracing_init;
pub mod wav;

pub use align::{align_readers, phase_offsets, AlignConfig, AlignReport};
pub use cancel::CancelToken;
pub use coherent::{band_plan, CoherentArray, NoiseSource, OffsetArray, Receiver};
pub use error::{Error, Result, Stage};
pub use fft::{Planner, RustFftPlanner};
pub use graft::{GraftConfig, GraftReader, Grafter};
pub use samples::{Complex32, SampleFormat, Samples, SamplesMut};
pub use stream::{ReadStream, WriteStream};
