//! Offline Renderer
//!
//! Turns a decoded source plus a snapshot of effect settings into the final
//! output timeline:
//!
//! ```text
//! [ pre-roll silence | source stretched by 1/rate -> EffectGraph | reverb tail ]
//! ```
//!
//! Playback-rate changes are tape-style: the time axis is stretched or
//! compressed by linear interpolation, so pitch moves with speed. No pitch
//! correction is applied.

use std::sync::Arc;

use log::{debug, info};

use crate::dsp::convolve::match_impulse_rate;
use crate::dsp::graph::EffectGraph;
use crate::dsp::resample;
use crate::dsp::{EqualizerBank, ImpulseResponse, ReverbParameters};
use crate::engine::buffer::SampleBuffer;
use crate::error::{PitcherError, Result};

/// Snapshot of every parameter a render reads
///
/// Taken once, before rendering starts; later changes to the session do not
/// reach a render already holding a snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderSettings {
    pub eq_bank: EqualizerBank,
    pub reverb: ReverbParameters,
    pub impulse: Arc<ImpulseResponse>,
    /// Speed/pitch scalar, > 0
    pub playback_rate: f64,
    /// Silence before the source starts, >= 0
    pub pre_roll_seconds: f64,
}

impl RenderSettings {
    /// The effect graph these settings describe
    pub fn graph(&self) -> EffectGraph {
        EffectGraph::standard(self.eq_bank.clone(), &self.reverb)
    }
}

/// One source and the settings to render it with
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub source: SampleBuffer,
    pub settings: RenderSettings,
}

impl RenderRequest {
    pub fn new(source: SampleBuffer, settings: RenderSettings) -> Self {
        Self { source, settings }
    }
}

/// Frame counts making up a render's output timeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderPlan {
    /// Leading silence
    pub pre_roll_frames: usize,
    /// Source length after the playback-rate change
    pub scaled_frames: usize,
    /// Reverb convolution tail past the end of the scaled source
    pub tail_frames: usize,
    /// Output length, never less than 1
    pub total_frames: usize,
}

impl RenderPlan {
    fn new(source_frames: usize, sample_rate: u32, rate: f64, pre_roll_seconds: f64, tail_frames: usize) -> Self {
        let pre_roll_frames = (pre_roll_seconds * sample_rate as f64).ceil() as usize;
        let scaled_frames = resample::stretched_len(source_frames, rate);
        Self {
            pre_roll_frames,
            scaled_frames,
            tail_frames,
            total_frames: (pre_roll_frames + scaled_frames + tail_frames).max(1),
        }
    }
}

/// Result of a render
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedOutput {
    buffer: SampleBuffer,
    plan: RenderPlan,
}

impl RenderedOutput {
    pub fn buffer(&self) -> &SampleBuffer {
        &self.buffer
    }

    pub fn plan(&self) -> RenderPlan {
        self.plan
    }

    pub fn into_buffer(self) -> SampleBuffer {
        self.buffer
    }
}

/// Deterministic, non-real-time renderer
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineRenderer;

impl OfflineRenderer {
    pub fn new() -> Self {
        Self
    }

    /// Render a request to a new buffer
    ///
    /// The output keeps the source's sample rate and channel count.
    ///
    /// # Errors
    /// * `Render` - empty source, playback rate not > 0, or negative pre-roll
    pub fn render(&self, request: &RenderRequest) -> Result<RenderedOutput> {
        let source = &request.source;
        let settings = &request.settings;
        validate(source, settings)?;

        let sample_rate = source.sample_rate();
        let impulse = match_impulse_rate(&settings.impulse, sample_rate)?;
        let graph = settings.graph();

        let plan = RenderPlan::new(
            source.num_frames(),
            sample_rate,
            settings.playback_rate,
            settings.pre_roll_seconds,
            graph.tail_frames(impulse.num_frames()),
        );
        debug!("Render plan: {:?}", plan);

        let stretched = resample_playback(source, settings.playback_rate)?;
        let processed = graph.process(&stretched, &impulse)?;

        let channels = processed
            .channels()
            .iter()
            .map(|samples| {
                let mut timeline = vec![0.0f32; plan.total_frames];
                let body = &mut timeline[plan.pre_roll_frames..];
                let n = body.len().min(samples.len());
                body[..n].copy_from_slice(&samples[..n]);
                timeline
            })
            .collect();

        let buffer = SampleBuffer::from_channels(channels, sample_rate)?;
        info!(
            "Rendered {} frames ({:.2}s) from {} source frames",
            buffer.num_frames(),
            buffer.duration_secs(),
            source.num_frames()
        );

        Ok(RenderedOutput { buffer, plan })
    }
}

fn validate(source: &SampleBuffer, settings: &RenderSettings) -> Result<()> {
    if source.is_empty() {
        return Err(PitcherError::render("source has no frames"));
    }
    if !settings.playback_rate.is_finite() || settings.playback_rate <= 0.0 {
        return Err(PitcherError::render(format!(
            "playback rate must be > 0, got {}",
            settings.playback_rate
        )));
    }
    if !settings.pre_roll_seconds.is_finite() || settings.pre_roll_seconds < 0.0 {
        return Err(PitcherError::render(format!(
            "pre-roll must be >= 0 seconds, got {}",
            settings.pre_roll_seconds
        )));
    }
    Ok(())
}

/// Stretch a buffer's time axis by `1 / rate`, keeping its sample rate
///
/// A rate of exactly 1.0 returns an identical copy.
pub fn resample_playback(source: &SampleBuffer, rate: f64) -> Result<SampleBuffer> {
    if rate == 1.0 {
        return Ok(source.clone());
    }
    let out_len = resample::stretched_len(source.num_frames(), rate);
    source.map_channels(|_, samples| resample::linear(samples, rate, out_len))
}
