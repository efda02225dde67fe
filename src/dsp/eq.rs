//! 31-Band Graphic Equalizer
//!
//! A fixed bank of one-third-octave peaking filters at the ISO centre
//! frequencies, applied as a cascade in ascending frequency order: the
//! output of band k feeds band k+1. Only the band gains are mutable.

use std::f64::consts::PI;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::engine::SampleBuffer;
use crate::error::{PitcherError, Result};

/// Number of bands in the bank
pub const NUM_BANDS: usize = 31;

/// ISO one-third-octave centre frequencies in Hz, ascending
pub const ISO_CENTER_FREQUENCIES: [f32; NUM_BANDS] = [
    20.0, 25.0, 31.5, 40.0, 50.0, 63.0, 80.0, 100.0, 125.0, 160.0, 200.0, 250.0, 315.0, 400.0,
    500.0, 630.0, 800.0, 1000.0, 1250.0, 1600.0, 2000.0, 2500.0, 3150.0, 4000.0, 5000.0, 6300.0,
    8000.0, 10000.0, 12500.0, 16000.0, 20000.0,
];

/// Quality factor of every band (one-third-octave bandwidth)
pub const BAND_Q: f32 = 4.31;

/// Lowest accepted band gain
pub const MIN_GAIN_DB: f32 = -12.0;

/// Highest accepted band gain
pub const MAX_GAIN_DB: f32 = 12.0;

/// Biquad filter coefficients
/// Transfer function: H(z) = (b0 + b1*z^-1 + b2*z^-2) / (a0 + a1*z^-1 + a2*z^-2)
/// Normalized: all coefficients divided by a0
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct BiquadCoeffs {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
}

impl BiquadCoeffs {
    /// Peaking EQ coefficients from the Audio EQ Cookbook
    /// Reference: https://www.w3.org/2011/audio/audio-eq-cookbook.html
    fn peaking(sample_rate: f64, frequency: f64, gain_db: f64, q: f64) -> Self {
        let w0 = 2.0 * PI * frequency / sample_rate;
        let cos_w0 = w0.cos();
        let alpha = w0.sin() / (2.0 * q);
        let a = (10.0_f64).powf(gain_db / 40.0);

        let a0 = 1.0 + alpha / a;
        BiquadCoeffs {
            b0: (1.0 + alpha * a) / a0,
            b1: (-2.0 * cos_w0) / a0,
            b2: (1.0 - alpha * a) / a0,
            a1: (-2.0 * cos_w0) / a0,
            a2: (1.0 - alpha / a) / a0,
        }
    }
}

/// Biquad filter state for one channel (Direct Form I)
#[derive(Debug, Clone, Copy, Default)]
struct BiquadState {
    x1: f64, // x[n-1]
    x2: f64, // x[n-2]
    y1: f64, // y[n-1]
    y2: f64, // y[n-2]
}

impl BiquadState {
    fn process(&mut self, input: f64, coeffs: &BiquadCoeffs) -> f64 {
        let output = coeffs.b0 * input + coeffs.b1 * self.x1 + coeffs.b2 * self.x2
            - coeffs.a1 * self.y1
            - coeffs.a2 * self.y2;

        self.x2 = self.x1;
        self.x1 = input;
        self.y2 = self.y1;
        self.y1 = output;

        output
    }
}

// ============================================================================
// Bands and Bank
// ============================================================================

/// One peaking filter of the bank
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FilterBand {
    /// Center frequency in Hz (fixed)
    pub center_frequency_hz: f32,
    /// Q factor (fixed at BAND_Q)
    pub quality_factor: f32,
    /// Gain in dB (-12 to +12)
    pub gain_db: f32,
}

impl FilterBand {
    /// A 0 dB band passes signal unchanged and is skipped in the cascade
    pub fn is_bypass(&self) -> bool {
        self.gain_db == 0.0
    }
}

/// Ordered bank of 31 peaking filters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EqualizerBank {
    bands: Vec<FilterBand>,
}

impl Default for EqualizerBank {
    fn default() -> Self {
        Self::new()
    }
}

impl EqualizerBank {
    /// Create a flat bank (all gains 0 dB)
    pub fn new() -> Self {
        let bands = ISO_CENTER_FREQUENCIES
            .iter()
            .map(|&f| FilterBand {
                center_frequency_hz: f,
                quality_factor: BAND_Q,
                gain_db: 0.0,
            })
            .collect();
        Self { bands }
    }

    /// Create a bank with the given gains, one per band in ascending order
    pub fn from_gains(gains: &[f32]) -> Result<Self> {
        if gains.len() != NUM_BANDS {
            return Err(PitcherError::InvalidParameter {
                param: "eq_gains".to_string(),
                value: format!("{} values", gains.len()),
                expected: format!("{} values", NUM_BANDS),
            });
        }

        let mut bank = Self::new();
        for (index, &gain) in gains.iter().enumerate() {
            bank.set_band_gain(index, gain)?;
        }
        Ok(bank)
    }

    /// Set the gain of one band
    ///
    /// # Errors
    /// * `IndexOutOfRange` - index not in 0..31
    /// * `InvalidParameter` - gain outside -12..+12 dB or not finite
    pub fn set_band_gain(&mut self, index: usize, gain_db: f32) -> Result<()> {
        validate_gain(gain_db)?;
        let band = self
            .bands
            .get_mut(index)
            .ok_or(PitcherError::IndexOutOfRange {
                index,
                len: NUM_BANDS,
            })?;
        band.gain_db = gain_db;
        Ok(())
    }

    /// Get the gain of one band
    pub fn band_gain(&self, index: usize) -> Result<f32> {
        self.bands
            .get(index)
            .map(|band| band.gain_db)
            .ok_or(PitcherError::IndexOutOfRange {
                index,
                len: NUM_BANDS,
            })
    }

    /// All band gains in processing order
    pub fn gains(&self) -> Vec<f32> {
        self.bands.iter().map(|band| band.gain_db).collect()
    }

    /// The bands in processing order
    pub fn bands(&self) -> &[FilterBand] {
        &self.bands
    }

    /// True when every band is at 0 dB
    pub fn is_flat(&self) -> bool {
        self.bands.iter().all(FilterBand::is_bypass)
    }

    /// Build a stateful cascade for streaming use at the given rate
    pub fn cascade(&self, sample_rate: u32, num_channels: usize) -> EqualizerCascade {
        EqualizerCascade::new(self, sample_rate, num_channels)
    }

    /// Run a signal through the cascade and return the filtered copy
    ///
    /// Filter state starts at rest for every call. A flat bank returns an
    /// exact copy of the input.
    pub fn apply_to(&self, signal: &SampleBuffer) -> SampleBuffer {
        let mut cascade = self.cascade(signal.sample_rate(), signal.num_channels());
        if cascade.is_identity() {
            return signal.clone();
        }

        let channels = signal
            .channels()
            .iter()
            .enumerate()
            .map(|(ch, samples)| {
                let mut out = samples.clone();
                cascade.process_block(ch, &mut out);
                out
            })
            .collect();

        // Same shape and rate as the input, so this cannot fail
        SampleBuffer::from_channels(channels, signal.sample_rate())
            .unwrap_or_else(|_| signal.clone())
    }
}

fn validate_gain(gain_db: f32) -> Result<()> {
    if !gain_db.is_finite() || !(MIN_GAIN_DB..=MAX_GAIN_DB).contains(&gain_db) {
        return Err(PitcherError::InvalidParameter {
            param: "gain_db".to_string(),
            value: gain_db.to_string(),
            expected: format!("{} to {} dB", MIN_GAIN_DB, MAX_GAIN_DB),
        });
    }
    Ok(())
}

// ============================================================================
// Cascade
// ============================================================================

/// Active biquad stages of a bank, realised for one sample rate
///
/// Bypassed bands (0 dB) and bands at or above Nyquist are left out, so the
/// remaining stages run in the bank's ascending order.
#[derive(Debug, Clone)]
pub struct EqualizerCascade {
    stages: Vec<BiquadCoeffs>,
    /// states[channel][stage]
    states: Vec<Vec<BiquadState>>,
}

impl EqualizerCascade {
    fn new(bank: &EqualizerBank, sample_rate: u32, num_channels: usize) -> Self {
        let nyquist = sample_rate as f64 / 2.0;
        let stages: Vec<BiquadCoeffs> = bank
            .bands
            .iter()
            .filter(|band| !band.is_bypass())
            .filter(|band| (band.center_frequency_hz as f64) < nyquist)
            .map(|band| {
                BiquadCoeffs::peaking(
                    sample_rate as f64,
                    band.center_frequency_hz as f64,
                    band.gain_db as f64,
                    band.quality_factor as f64,
                )
            })
            .collect();

        debug!(
            "EQ cascade: {} of {} bands active at {} Hz",
            stages.len(),
            NUM_BANDS,
            sample_rate
        );

        Self {
            states: vec![vec![BiquadState::default(); stages.len()]; num_channels],
            stages,
        }
    }

    /// True when no stage would alter the signal
    pub fn is_identity(&self) -> bool {
        self.stages.is_empty()
    }

    /// Filter a block of one channel in place, carrying state to the next block
    pub fn process_block(&mut self, channel: usize, samples: &mut [f32]) {
        if self.stages.is_empty() {
            return;
        }
        let Some(states) = self.states.get_mut(channel) else {
            return;
        };

        for sample in samples.iter_mut() {
            let mut value = *sample as f64;
            for (state, coeffs) in states.iter_mut().zip(&self.stages) {
                value = state.process(value, coeffs);
            }
            *sample = value as f32;
        }
    }

    /// Clear filter history
    pub fn reset(&mut self) {
        for states in &mut self.states {
            states.fill(BiquadState::default());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Helper to create a mono sine buffer
    fn create_sine_buffer(frequency: f64, sample_rate: u32, duration_secs: f64) -> SampleBuffer {
        let num_samples = (sample_rate as f64 * duration_secs) as usize;
        let samples = (0..num_samples)
            .map(|i| {
                let t = i as f64 / sample_rate as f64;
                (2.0 * PI * frequency * t).sin() as f32
            })
            .collect();
        SampleBuffer::from_channels(vec![samples], sample_rate).unwrap()
    }

    /// RMS of the second half of a channel, past the filter's settling time
    fn steady_rms(buffer: &SampleBuffer, channel: usize) -> f64 {
        let samples = &buffer.channel(channel)[buffer.num_frames() / 2..];
        let sum_sq: f64 = samples.iter().map(|&s| (s as f64).powi(2)).sum();
        (sum_sq / samples.len() as f64).sqrt()
    }

    #[test]
    fn test_bank_layout() {
        let bank = EqualizerBank::new();
        assert_eq!(bank.bands().len(), NUM_BANDS);
        assert!(bank
            .bands()
            .windows(2)
            .all(|w| w[0].center_frequency_hz < w[1].center_frequency_hz));
        assert!(bank.bands().iter().all(|b| b.quality_factor == BAND_Q));
        assert!(bank.is_flat());
    }

    #[test]
    fn test_set_and_get_gain() {
        let mut bank = EqualizerBank::new();
        bank.set_band_gain(17, 6.5).unwrap();
        assert_eq!(bank.band_gain(17).unwrap(), 6.5);
        assert_eq!(bank.bands()[17].center_frequency_hz, 1000.0);
        assert!(!bank.is_flat());
    }

    #[test]
    fn test_index_out_of_range() {
        let mut bank = EqualizerBank::new();
        match bank.set_band_gain(31, 1.0) {
            Err(PitcherError::IndexOutOfRange { index, len }) => {
                assert_eq!(index, 31);
                assert_eq!(len, 31);
            }
            other => panic!("Expected IndexOutOfRange, got {:?}", other),
        }
        assert!(bank.band_gain(40).is_err());
    }

    #[test]
    fn test_gain_range_validation() {
        let mut bank = EqualizerBank::new();
        assert!(bank.set_band_gain(0, 12.0).is_ok());
        assert!(bank.set_band_gain(0, -12.0).is_ok());
        assert!(bank.set_band_gain(0, 12.5).is_err());
        assert!(bank.set_band_gain(0, f32::NAN).is_err());
    }

    #[test]
    fn test_from_gains_rejects_wrong_count() {
        assert!(EqualizerBank::from_gains(&[0.0; 30]).is_err());
        assert!(EqualizerBank::from_gains(&[0.0; NUM_BANDS]).is_ok());
    }

    #[test]
    fn test_flat_bank_is_exact_identity() {
        let bank = EqualizerBank::new();
        let buffer = create_sine_buffer(440.0, 44100, 0.1);
        let output = bank.apply_to(&buffer);
        assert_eq!(output, buffer);
    }

    #[test]
    fn test_peak_boost_at_center() {
        let mut bank = EqualizerBank::new();
        bank.set_band_gain(17, 12.0).unwrap(); // 1 kHz

        let buffer = create_sine_buffer(1000.0, 48000, 0.5);
        let output = bank.apply_to(&buffer);

        // 12dB boost is ~3.98x in amplitude
        let gain_ratio = steady_rms(&output, 0) / steady_rms(&buffer, 0);
        assert!(
            gain_ratio > 3.5 && gain_ratio < 4.5,
            "Expected ~4x gain, got {}",
            gain_ratio
        );
    }

    #[test]
    fn test_peak_cut_at_center() {
        let mut bank = EqualizerBank::new();
        bank.set_band_gain(17, -12.0).unwrap();

        let buffer = create_sine_buffer(1000.0, 48000, 0.5);
        let output = bank.apply_to(&buffer);

        let gain_ratio = steady_rms(&output, 0) / steady_rms(&buffer, 0);
        assert!(
            gain_ratio > 0.2 && gain_ratio < 0.3,
            "Expected ~0.25 gain, got {}",
            gain_ratio
        );
    }

    #[test]
    fn test_narrow_band_leaves_distant_frequencies() {
        let mut bank = EqualizerBank::new();
        bank.set_band_gain(17, 12.0).unwrap(); // 1 kHz

        let buffer = create_sine_buffer(100.0, 48000, 0.5);
        let output = bank.apply_to(&buffer);

        let gain_ratio = steady_rms(&output, 0) / steady_rms(&buffer, 0);
        assert!(
            (gain_ratio - 1.0).abs() < 0.05,
            "100 Hz should be nearly untouched by a 1 kHz band, got {}",
            gain_ratio
        );
    }

    #[test]
    fn test_band_above_nyquist_is_skipped() {
        let mut bank = EqualizerBank::new();
        bank.set_band_gain(30, 12.0).unwrap(); // 20 kHz

        let buffer = create_sine_buffer(440.0, 22050, 0.1);
        let output = bank.apply_to(&buffer);
        assert_eq!(output, buffer);
    }

    #[test]
    fn test_input_buffer_untouched() {
        let mut bank = EqualizerBank::new();
        bank.set_band_gain(10, 6.0).unwrap();

        let buffer = create_sine_buffer(200.0, 44100, 0.05);
        let copy = buffer.clone();
        let _ = bank.apply_to(&buffer);
        assert_eq!(buffer, copy);
    }

    #[test]
    fn test_streaming_blocks_match_whole_buffer() {
        let mut bank = EqualizerBank::new();
        bank.set_band_gain(5, 9.0).unwrap();
        bank.set_band_gain(20, -4.0).unwrap();

        let buffer = create_sine_buffer(2000.0, 44100, 0.05);
        let whole = bank.apply_to(&buffer);

        let mut cascade = bank.cascade(44100, 1);
        let mut streamed = buffer.channel(0).to_vec();
        for block in streamed.chunks_mut(128) {
            cascade.process_block(0, block);
        }

        assert_eq!(whole.channel(0), streamed.as_slice());
    }

    #[test]
    fn test_cascade_reset_clears_history() {
        let mut bank = EqualizerBank::new();
        bank.set_band_gain(17, 12.0).unwrap();

        let mut cascade = bank.cascade(48000, 1);
        let mut first = vec![1.0, 0.0, 0.0, 0.0];
        cascade.process_block(0, &mut first);

        cascade.reset();
        let mut second = vec![1.0, 0.0, 0.0, 0.0];
        cascade.process_block(0, &mut second);

        assert_eq!(first, second);
    }

    #[test]
    fn test_serialization() {
        let mut bank = EqualizerBank::new();
        bank.set_band_gain(3, -2.5).unwrap();

        let json = serde_json::to_value(&bank).unwrap();
        let restored: EqualizerBank = serde_json::from_value(json).unwrap();
        assert_eq!(restored, bank);
    }
}
