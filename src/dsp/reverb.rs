//! Reverb Parameters
//!
//! The reverb is a synthetic decaying-noise impulse convolved with the
//! equalized signal and blended with it by a wet/dry ratio. Two user-facing
//! controls drive it:
//!
//! - `mix`: 0 = fully dry, 1 = fully wet
//! - `size_factor`: room size, mapped to impulse duration and decay shape

use serde::{Deserialize, Serialize};

use crate::error::{PitcherError, Result};

/// Seconds of impulse per unit of size
pub const DURATION_PER_SIZE: f64 = 5.0;

/// Decay exponent per unit of size
pub const DECAY_PER_SIZE: f64 = 3.0;

/// Floor applied to duration and decay when deriving a preview impulse
pub const MIN_PREVIEW_SHAPE: f64 = 0.1;

/// Wet/dry mix and room size of the reverb
///
/// Missing fields take their defaults when read from a preset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReverbParameters {
    /// Wet/dry ratio (0.0 - 1.0)
    pub mix: f32,
    /// Room size (0.0 - 1.0)
    pub size_factor: f64,
}

impl Default for ReverbParameters {
    fn default() -> Self {
        Self {
            mix: 0.0,
            size_factor: 0.5,
        }
    }
}

impl ReverbParameters {
    /// Create validated parameters
    pub fn new(mix: f32, size_factor: f64) -> Result<Self> {
        let params = Self { mix, size_factor };
        params.validate()?;
        Ok(params)
    }

    /// Check both controls are within [0, 1]
    pub fn validate(&self) -> Result<()> {
        check_unit("mix", self.mix as f64)?;
        check_unit("size_factor", self.size_factor)
    }

    /// Impulse length in seconds: `size_factor * 5`
    pub fn duration_seconds(&self) -> f64 {
        self.size_factor * DURATION_PER_SIZE
    }

    /// Envelope exponent: `size_factor * 3`
    pub fn decay_exponent(&self) -> f64 {
        self.size_factor * DECAY_PER_SIZE
    }

    /// Duration and decay used to build the cached impulse
    ///
    /// Both are floored at 0.1 so a zero size still yields a short,
    /// audible room rather than a single sample.
    pub fn impulse_shape(&self) -> (f64, f64) {
        (
            self.duration_seconds().max(MIN_PREVIEW_SHAPE),
            self.decay_exponent().max(MIN_PREVIEW_SHAPE),
        )
    }

    /// True when the wet path contributes nothing
    pub fn is_dry(&self) -> bool {
        self.mix == 0.0
    }
}

fn check_unit(param: &str, value: f64) -> Result<()> {
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(PitcherError::InvalidParameter {
            param: param.to_string(),
            value: value.to_string(),
            expected: "0.0 to 1.0".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_size_mapping() {
        let params = ReverbParameters::new(0.3, 0.4).unwrap();
        assert_relative_eq!(params.duration_seconds(), 2.0);
        assert_relative_eq!(params.decay_exponent(), 1.2, epsilon = 1e-6);
    }

    #[test]
    fn test_impulse_shape_floor() {
        let params = ReverbParameters::new(0.5, 0.0).unwrap();
        assert_eq!(params.impulse_shape(), (0.1, 0.1));

        let params = ReverbParameters::new(0.5, 1.0).unwrap();
        assert_eq!(params.impulse_shape(), (5.0, 3.0));
    }

    #[test]
    fn test_validation() {
        assert!(ReverbParameters::new(1.1, 0.5).is_err());
        assert!(ReverbParameters::new(0.5, -0.1).is_err());
        assert!(ReverbParameters::new(f32::NAN, 0.5).is_err());
        assert!(ReverbParameters::new(0.0, 1.0).is_ok());
    }

    #[test]
    fn test_default_is_dry() {
        assert!(ReverbParameters::default().is_dry());
    }

    #[test]
    fn test_partial_preset_uses_defaults() {
        let params: ReverbParameters = serde_json::from_str(r#"{"mix": 0.25}"#).unwrap();
        assert_eq!(params, ReverbParameters::new(0.25, 0.5).unwrap());

        let params: ReverbParameters = serde_json::from_str(r#"{"size_factor": 0.8}"#).unwrap();
        assert_eq!(params, ReverbParameters::new(0.0, 0.8).unwrap());
    }
}
