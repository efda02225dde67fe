//! Pitcher - Offline Audio Effects and Export
//!
//! Pitcher applies a fixed effect chain to decoded audio and writes the
//! result back out:
//! 1. A 31-band graphic equalizer (ISO third-octave peaking filters)
//! 2. Convolution reverb with a synthesized, exponentially decaying impulse
//! 3. Tape-style playback rate, where pitch follows speed
//!
//! # Architecture
//!
//! - [`session`]: live user settings and the cached impulse
//! - [`dsp`]: equalizer, impulse synthesis, convolution, the effect graph and
//!   the block-based preview processor
//! - [`engine`]: sample buffers, decoding and the offline renderer
//! - [`export`]: WAV/MP3 encoding, zip packaging and batch export

pub mod cli;
pub mod dsp;
pub mod engine;
pub mod error;
pub mod export;
pub mod session;

pub use dsp::{EffectGraph, EqualizerBank, ImpulseResponse, ImpulseSynthesizer, ReverbParameters};
pub use engine::{OfflineRenderer, RenderRequest, RenderSettings, SampleBuffer};
pub use error::{PitcherError, Result};
pub use export::{BatchExporter, ContainerEncoder, ExportFormat, ExportJob};
pub use session::{EffectSettings, Session};
