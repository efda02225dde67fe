//! Effect Graph
//!
//! The processing chain is described as data: an ordered list of
//! [`Stage`]s. The offline renderer runs the list over a whole buffer; the
//! live preview compiles the same list into stateful block processors (see
//! [`super::preview`]). Both read one description, so they cannot drift.
//!
//! ```text
//! signal -> Equalizer -> +-> dry * (1 - mix) ----------+-> out
//!                        +-> convolve(impulse) * mix --+
//! ```
//!
//! The impulse on the wet path is normalized first (see
//! [`super::convolve::normalization_scale`]).

use log::debug;
use serde::{Deserialize, Serialize};

use super::convolve::{convolve_channels, wet_kernels};
use super::eq::EqualizerBank;
use super::impulse::ImpulseResponse;
use super::reverb::ReverbParameters;
use crate::engine::SampleBuffer;
use crate::error::Result;

/// One step of the chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Stage {
    /// 31-band peaking cascade
    Equalizer { bank: EqualizerBank },
    /// Parallel dry and convolved paths blended by `mix`
    Reverb { mix: f32 },
}

impl Stage {
    /// Samples this stage appends past the end of its input
    pub fn tail_frames(&self, impulse_frames: usize) -> usize {
        match self {
            Stage::Equalizer { .. } => 0,
            Stage::Reverb { mix } if *mix > 0.0 => impulse_frames.saturating_sub(1),
            Stage::Reverb { .. } => 0,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Stage::Equalizer { .. } => "equalizer",
            Stage::Reverb { .. } => "reverb",
        }
    }
}

/// Ordered stage list shared by preview and offline render
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectGraph {
    stages: Vec<Stage>,
}

impl EffectGraph {
    /// Build a graph from an explicit stage list
    pub fn new(stages: Vec<Stage>) -> Self {
        Self { stages }
    }

    /// The product chain: equalizer, then wet/dry reverb
    pub fn standard(bank: EqualizerBank, reverb: &ReverbParameters) -> Self {
        Self::new(vec![
            Stage::Equalizer { bank },
            Stage::Reverb { mix: reverb.mix },
        ])
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Total samples the graph adds past the end of its input
    ///
    /// `impulse_frames` is the impulse length at the signal's sample rate.
    pub fn tail_frames(&self, impulse_frames: usize) -> usize {
        self.stages
            .iter()
            .map(|stage| stage.tail_frames(impulse_frames))
            .sum()
    }

    /// Run every stage over a whole signal
    ///
    /// The output has the signal's channel count and sample rate and is
    /// `signal.num_frames() + tail_frames(..)` long.
    pub fn process(&self, signal: &SampleBuffer, impulse: &ImpulseResponse) -> Result<SampleBuffer> {
        let kernels = wet_kernels(impulse, signal.sample_rate())?;

        let mut current = signal.clone();
        for stage in &self.stages {
            debug!(
                "Running {} stage on {} frames x {} ch",
                stage.name(),
                current.num_frames(),
                current.num_channels()
            );
            current = match stage {
                Stage::Equalizer { bank } => bank.apply_to(&current),
                Stage::Reverb { mix } => mix_reverb(&current, &kernels, *mix)?,
            };
        }
        Ok(current)
    }
}

/// Process a signal through the standard chain
pub fn process(
    signal: &SampleBuffer,
    bank: &EqualizerBank,
    reverb: &ReverbParameters,
    impulse: &ImpulseResponse,
) -> Result<SampleBuffer> {
    EffectGraph::standard(bank.clone(), reverb).process(signal, impulse)
}

/// `dry * (1 - mix) + convolve(dry, kernels) * mix`, dry zero-padded to the
/// wet length
fn mix_reverb(dry: &SampleBuffer, kernels: &SampleBuffer, mix: f32) -> Result<SampleBuffer> {
    if mix <= 0.0 {
        return Ok(dry.clone());
    }

    let wet = convolve_channels(dry, kernels)?;
    let dry_gain = 1.0 - mix;

    wet.map_channels(|ch, wet_samples| {
        let dry_samples = dry.channel(ch);
        wet_samples
            .iter()
            .enumerate()
            .map(|(i, &w)| {
                let d = dry_samples.get(i).copied().unwrap_or(0.0);
                d * dry_gain + w * mix
            })
            .collect()
    })
}
