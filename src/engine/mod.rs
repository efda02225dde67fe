//! Engine Module
//!
//! Decoded sample buffers, file decoding and atomic output, and the offline
//! renderer.

pub mod buffer;
pub mod io;
pub mod render;

pub use buffer::{calculate_peak, calculate_rms, db_to_linear, linear_to_db, SampleBuffer};
pub use io::{decode_bytes, decode_file, write_atomically};
pub use render::{OfflineRenderer, RenderPlan, RenderRequest, RenderSettings, RenderedOutput};
