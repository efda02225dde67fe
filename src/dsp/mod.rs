//! DSP Module
//!
//! Signal processing for the effect chain: the 31-band equalizer, the
//! synthetic reverb impulse and its convolution, the effect graph that
//! composes them, and the block-based preview of that graph.

pub mod convolve;
pub mod eq;
pub mod graph;
pub mod impulse;
pub mod preview;
pub mod resample;
pub mod reverb;

pub use eq::{EqualizerBank, FilterBand, BAND_Q, ISO_CENTER_FREQUENCIES, NUM_BANDS};
pub use graph::{EffectGraph, Stage};
pub use impulse::{ImpulseResponse, ImpulseSynthesizer};
pub use preview::{PreviewProcessor, WaveformSink, WaveformSummary};
pub use reverb::ReverbParameters;
