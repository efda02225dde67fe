//! Linear-interpolation resampling
//!
//! Used for tape-style playback-rate changes (time axis stretched, pitch
//! follows speed) and for matching an impulse response to a source's
//! sample rate.

/// Read `out_len` samples from `samples`, advancing `step` input samples per
/// output sample
///
/// Positions past the last input sample read as silence.
pub fn linear(samples: &[f32], step: f64, out_len: usize) -> Vec<f32> {
    let at = |index: usize| samples.get(index).copied().unwrap_or(0.0) as f64;

    (0..out_len)
        .map(|i| {
            let pos = i as f64 * step;
            let index = pos.floor() as usize;
            let frac = pos - index as f64;
            if frac == 0.0 {
                at(index) as f32
            } else {
                (at(index) * (1.0 - frac) + at(index + 1) * frac) as f32
            }
        })
        .collect()
}

/// Number of output samples when playing `frames` samples at `rate`
pub fn stretched_len(frames: usize, rate: f64) -> usize {
    (frames as f64 / rate).ceil() as usize
}

/// Convert a channel between sample rates
pub fn convert_rate(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate {
        return samples.to_vec();
    }
    let ratio = from_rate as f64 / to_rate as f64;
    linear(samples, ratio, stretched_len(samples.len(), ratio).max(1))
}
