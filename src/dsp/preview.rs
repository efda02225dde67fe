//! Live Preview
//!
//! Block-by-block rendition of an [`EffectGraph`] for auditioning settings
//! while they change. Filter and convolution state persist across blocks, so
//! feeding a signal in blocks and then draining the tail matches the offline
//! render up to floating-point rounding at block boundaries.
//!
//! Display is not our concern: callers that want a waveform attach a
//! [`WaveformSink`] and receive peak summaries of every processed block.

use log::debug;
use serde::{Deserialize, Serialize};

use super::convolve::{impulse_channel_for, wet_kernels, Convolver};
use super::eq::EqualizerCascade;
use super::graph::{EffectGraph, Stage};
use super::impulse::ImpulseResponse;
use crate::engine::SampleBuffer;
use crate::error::{PitcherError, Result};

/// Frames folded into one peak bin by default
pub const DEFAULT_FRAMES_PER_BIN: usize = 256;

// ============================================================================
// Waveform Summaries
// ============================================================================

/// Min/max sample value over a run of frames, all channels combined
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PeakBin {
    pub min: f32,
    pub max: f32,
}

/// Peak overview of a buffer, suitable for drawing a waveform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaveformSummary {
    pub sample_rate: u32,
    pub frames_per_bin: usize,
    pub bins: Vec<PeakBin>,
}

impl WaveformSummary {
    /// Summarize a buffer into bins of `frames_per_bin` frames
    ///
    /// The last bin may cover fewer frames.
    pub fn from_buffer(buffer: &SampleBuffer, frames_per_bin: usize) -> Self {
        let frames_per_bin = frames_per_bin.max(1);
        let bins = (0..buffer.num_frames())
            .step_by(frames_per_bin)
            .map(|start| {
                let end = (start + frames_per_bin).min(buffer.num_frames());
                buffer.channels().iter().fold(
                    PeakBin { min: 0.0, max: 0.0 },
                    |bin, ch| {
                        ch[start..end].iter().fold(bin, |b, &s| PeakBin {
                            min: b.min.min(s),
                            max: b.max.max(s),
                        })
                    },
                )
            })
            .collect();

        Self {
            sample_rate: buffer.sample_rate(),
            frames_per_bin,
            bins,
        }
    }

    /// Largest absolute value across all bins
    pub fn peak(&self) -> f32 {
        self.bins
            .iter()
            .fold(0.0f32, |p, b| p.max(b.max.abs()).max(b.min.abs()))
    }
}

/// Receives waveform summaries for display
pub trait WaveformSink: Send {
    fn on_summary(&mut self, summary: &WaveformSummary);
}

// ============================================================================
// Preview Processor
// ============================================================================

/// Runtime state for one graph stage
enum Node {
    Equalizer(EqualizerCascade),
    Reverb { mix: f32, convolvers: Vec<Convolver> },
}

impl Node {
    fn process(&mut self, channels: &mut [Vec<f32>]) {
        match self {
            Node::Equalizer(cascade) => {
                for (ch, samples) in channels.iter_mut().enumerate() {
                    cascade.process_block(ch, samples);
                }
            }
            Node::Reverb { mix, convolvers } => {
                for (samples, convolver) in channels.iter_mut().zip(convolvers.iter_mut()) {
                    let wet = convolver.process_block(samples);
                    for (d, w) in samples.iter_mut().zip(wet) {
                        *d = *d * (1.0 - *mix) + w * *mix;
                    }
                }
            }
        }
    }

    /// Samples still owed after the input ended, one vector per channel
    fn drain(&mut self, num_channels: usize) -> Vec<Vec<f32>> {
        match self {
            Node::Equalizer(_) => vec![Vec::new(); num_channels],
            Node::Reverb { mix, convolvers } => convolvers
                .iter_mut()
                .map(|c| c.drain_tail().into_iter().map(|w| w * *mix).collect())
                .collect(),
        }
    }
}

/// Stateful block processor compiled from an [`EffectGraph`]
pub struct PreviewProcessor {
    nodes: Vec<Node>,
    num_channels: usize,
    sample_rate: u32,
    frames_per_bin: usize,
    sink: Option<Box<dyn WaveformSink>>,
}

impl PreviewProcessor {
    /// Compile a graph for a fixed channel count and sample rate
    pub fn compile(
        graph: &EffectGraph,
        impulse: &ImpulseResponse,
        num_channels: usize,
        sample_rate: u32,
    ) -> Result<Self> {
        if num_channels == 0 {
            return Err(PitcherError::InvalidParameter {
                param: "num_channels".to_string(),
                value: "0".to_string(),
                expected: "at least 1 channel".to_string(),
            });
        }

        let kernels = wet_kernels(impulse, sample_rate)?;

        let nodes: Vec<Node> = graph
            .stages()
            .iter()
            .filter_map(|stage| match stage {
                Stage::Equalizer { bank } => {
                    Some(Node::Equalizer(bank.cascade(sample_rate, num_channels)))
                }
                Stage::Reverb { mix } if *mix > 0.0 => Some(Node::Reverb {
                    mix: *mix,
                    convolvers: (0..num_channels)
                        .map(|ch| {
                            let source = impulse_channel_for(ch, kernels.num_channels());
                            Convolver::new(kernels.channel(source).to_vec())
                        })
                        .collect(),
                }),
                Stage::Reverb { .. } => None,
            })
            .collect();

        debug!(
            "Compiled preview: {} active stages, {} ch at {} Hz",
            nodes.len(),
            num_channels,
            sample_rate
        );

        Ok(Self {
            nodes,
            num_channels,
            sample_rate,
            frames_per_bin: DEFAULT_FRAMES_PER_BIN,
            sink: None,
        })
    }

    /// Attach a sink that receives a summary of every processed block
    pub fn with_sink(mut self, sink: Box<dyn WaveformSink>, frames_per_bin: usize) -> Self {
        self.sink = Some(sink);
        self.frames_per_bin = frames_per_bin.max(1);
        self
    }

    /// Process the next block; output has the same length as the input
    pub fn process_block(&mut self, block: &SampleBuffer) -> Result<SampleBuffer> {
        self.check_block(block)?;

        let mut channels = block.channels().to_vec();
        for node in &mut self.nodes {
            node.process(&mut channels);
        }

        self.emit(SampleBuffer::from_channels(channels, self.sample_rate)?)
    }

    /// Flush the reverb tail once the input has ended
    ///
    /// Leaves the processor ready for a new signal.
    pub fn drain_tail(&mut self) -> Result<SampleBuffer> {
        let mut tail = vec![Vec::new(); self.num_channels];
        for node in &mut self.nodes {
            node.process(&mut tail);
            for (ch, extra) in tail.iter_mut().zip(node.drain(self.num_channels)) {
                ch.extend(extra);
            }
        }

        for node in &mut self.nodes {
            if let Node::Equalizer(cascade) = node {
                cascade.reset();
            }
        }

        self.emit(SampleBuffer::from_channels(tail, self.sample_rate)?)
    }

    fn check_block(&self, block: &SampleBuffer) -> Result<()> {
        if block.num_channels() != self.num_channels || block.sample_rate() != self.sample_rate {
            return Err(PitcherError::InvalidParameter {
                param: "block".to_string(),
                value: format!("{} ch at {} Hz", block.num_channels(), block.sample_rate()),
                expected: format!("{} ch at {} Hz", self.num_channels, self.sample_rate),
            });
        }
        Ok(())
    }

    fn emit(&mut self, output: SampleBuffer) -> Result<SampleBuffer> {
        if let Some(sink) = self.sink.as_mut() {
            if !output.is_empty() {
                sink.on_summary(&WaveformSummary::from_buffer(&output, self.frames_per_bin));
            }
        }
        Ok(output)
    }
}
