//! Sample Buffer
//!
//! In-memory decoded PCM. Every transformation in the pipeline consumes a
//! `SampleBuffer` by reference and produces a new one; nothing downstream
//! mutates a buffer it was handed.

use crate::error::{PitcherError, Result};

// ============================================================================
// Helper Functions
// ============================================================================

/// Convert decibels to linear amplitude
#[inline]
pub fn db_to_linear(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

/// Convert linear amplitude to decibels
///
/// Returns -f32::INFINITY for zero input.
#[inline]
pub fn linear_to_db(linear: f32) -> f32 {
    if linear <= 0.0 {
        f32::NEG_INFINITY
    } else {
        20.0 * linear.log10()
    }
}

/// Calculate the RMS level of a buffer in dB
///
/// Returns -f32::INFINITY for empty or silent buffers.
pub fn calculate_rms(buffer: &SampleBuffer) -> f32 {
    let total_samples = buffer.num_channels() * buffer.num_frames();
    if total_samples == 0 {
        return f32::NEG_INFINITY;
    }

    let sum_squares: f64 = buffer
        .channels
        .iter()
        .flat_map(|channel| channel.iter())
        .map(|&s| (s as f64) * (s as f64))
        .sum();

    let rms = (sum_squares / total_samples as f64).sqrt() as f32;
    linear_to_db(rms)
}

/// Calculate the absolute peak of a buffer (linear)
pub fn calculate_peak(buffer: &SampleBuffer) -> f32 {
    buffer
        .channels
        .iter()
        .flat_map(|channel| channel.iter())
        .map(|&s| s.abs())
        .fold(0.0_f32, f32::max)
}

// ============================================================================
// Sample Buffer
// ============================================================================

/// Decoded multi-channel PCM at a fixed sample rate
///
/// Stores audio as non-interleaved 32-bit float samples, one `Vec<f32>` per
/// channel.
///
/// # Invariants
/// - at least one channel
/// - every channel holds exactly `num_frames()` samples
/// - `sample_rate() > 0`
///
/// # Example
/// ```
/// use pitcher::engine::SampleBuffer;
///
/// let buffer = SampleBuffer::silent(2, 44100, 44100).unwrap();
/// assert_eq!(buffer.num_channels(), 2);
/// assert_eq!(buffer.num_frames(), 44100);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBuffer {
    channels: Vec<Vec<f32>>,
    sample_rate: u32,
}

impl SampleBuffer {
    /// Create a buffer from per-channel sample vectors
    ///
    /// # Errors
    /// * `InvalidParameter` - no channels, zero sample rate, or channels of
    ///   unequal length
    pub fn from_channels(channels: Vec<Vec<f32>>, sample_rate: u32) -> Result<Self> {
        if channels.is_empty() {
            return Err(PitcherError::InvalidParameter {
                param: "channels".to_string(),
                value: "0".to_string(),
                expected: "at least 1 channel".to_string(),
            });
        }

        if sample_rate == 0 {
            return Err(PitcherError::InvalidParameter {
                param: "sample_rate".to_string(),
                value: "0".to_string(),
                expected: "a positive rate in Hz".to_string(),
            });
        }

        let frames = channels[0].len();
        if let Some((index, channel)) = channels
            .iter()
            .enumerate()
            .find(|(_, ch)| ch.len() != frames)
        {
            return Err(PitcherError::InvalidParameter {
                param: format!("channels[{}]", index),
                value: format!("{} frames", channel.len()),
                expected: format!("{} frames like channel 0", frames),
            });
        }

        Ok(Self {
            channels,
            sample_rate,
        })
    }

    /// Create a buffer of silence
    pub fn silent(num_channels: usize, num_frames: usize, sample_rate: u32) -> Result<Self> {
        Self::from_channels(vec![vec![0.0; num_frames]; num_channels], sample_rate)
    }

    /// Create a buffer from interleaved sample data (L, R, L, R, ... for stereo)
    pub fn from_interleaved(
        interleaved: &[f32],
        num_channels: usize,
        sample_rate: u32,
    ) -> Result<Self> {
        if num_channels == 0 || interleaved.len() % num_channels != 0 {
            return Err(PitcherError::InvalidParameter {
                param: "interleaved".to_string(),
                value: format!("{} samples", interleaved.len()),
                expected: format!("a multiple of {} channels", num_channels),
            });
        }

        let num_frames = interleaved.len() / num_channels;
        let mut channels = vec![Vec::with_capacity(num_frames); num_channels];

        for frame in interleaved.chunks_exact(num_channels) {
            for (ch, &sample) in frame.iter().enumerate() {
                channels[ch].push(sample);
            }
        }

        Self::from_channels(channels, sample_rate)
    }

    /// Convert the buffer to interleaved format
    pub fn to_interleaved(&self) -> Vec<f32> {
        let mut interleaved = Vec::with_capacity(self.num_channels() * self.num_frames());

        for frame in 0..self.num_frames() {
            for channel in &self.channels {
                interleaved.push(channel[frame]);
            }
        }

        interleaved
    }

    /// Number of channels (always at least 1)
    #[inline]
    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    /// Number of samples per channel
    #[inline]
    pub fn num_frames(&self) -> usize {
        self.channels[0].len()
    }

    /// Sample rate in Hz
    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Check if the buffer holds no frames
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.num_frames() == 0
    }

    /// Duration in seconds
    #[inline]
    pub fn duration_secs(&self) -> f64 {
        self.num_frames() as f64 / self.sample_rate as f64
    }

    /// Samples of one channel
    ///
    /// # Panics
    /// Panics if the channel index is out of bounds
    #[inline]
    pub fn channel(&self, index: usize) -> &[f32] {
        &self.channels[index]
    }

    /// All channels in order
    #[inline]
    pub fn channels(&self) -> &[Vec<f32>] {
        &self.channels
    }

    /// Give up ownership of the channel data
    pub fn into_channels(self) -> Vec<Vec<f32>> {
        self.channels
    }

    /// Check if all samples are finite (not NaN or Infinity)
    pub fn is_finite(&self) -> bool {
        self.channels
            .iter()
            .flat_map(|ch| ch.iter())
            .all(|s| s.is_finite())
    }

    /// Build a new buffer at the same sample rate with each channel transformed
    ///
    /// The closure receives the channel index and its samples. All returned
    /// channels must have the same length.
    pub fn map_channels<F>(&self, mut f: F) -> Result<Self>
    where
        F: FnMut(usize, &[f32]) -> Vec<f32>,
    {
        let channels = self
            .channels
            .iter()
            .enumerate()
            .map(|(i, ch)| f(i, ch))
            .collect();
        Self::from_channels(channels, self.sample_rate)
    }
}

// ============================================================================
// Tests
// ============================================================================
