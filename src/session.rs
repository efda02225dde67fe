//! Session State
//!
//! Owns the user's current effect settings between renders: EQ gains,
//! reverb controls, playback rate and pre-roll, plus the cached reverb
//! impulse. Renders never read this state directly; they take an owned
//! [`RenderSettings`] snapshot.

use std::path::Path;
use std::sync::Arc;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::dsp::eq::{EqualizerBank, NUM_BANDS};
use crate::dsp::graph::EffectGraph;
use crate::dsp::impulse::{ImpulseResponse, ImpulseSynthesizer};
use crate::dsp::preview::PreviewProcessor;
use crate::dsp::reverb::ReverbParameters;
use crate::engine::io::write_atomically;
use crate::engine::render::RenderSettings;
use crate::error::{PitcherError, Result};

/// Sample rate the impulse is built at before any source is loaded
pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

/// Channels of the cached impulse
pub const IMPULSE_CHANNELS: usize = 2;

// ============================================================================
// Effect Settings
// ============================================================================

/// User-facing effect settings, serializable as a JSON preset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EffectSettings {
    /// One gain per ISO band, ascending frequency
    pub eq_gains: Vec<f32>,
    pub reverb: ReverbParameters,
    pub playback_rate: f64,
    pub pre_roll_seconds: f64,
}

impl Default for EffectSettings {
    fn default() -> Self {
        Self {
            eq_gains: vec![0.0; NUM_BANDS],
            reverb: ReverbParameters::default(),
            playback_rate: 1.0,
            pre_roll_seconds: 0.0,
        }
    }
}

impl EffectSettings {
    /// Check every value is in range
    pub fn validate(&self) -> Result<()> {
        EqualizerBank::from_gains(&self.eq_gains)?;
        self.reverb.validate()?;
        validate_playback_rate(self.playback_rate)?;
        validate_pre_roll(self.pre_roll_seconds)
    }

    /// Load and validate a JSON preset
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let settings: Self = serde_json::from_str(&json)?;
        settings.validate()?;
        debug!("Loaded preset from {}", path.display());
        Ok(settings)
    }

    /// Write as pretty JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        write_atomically(path, json.as_bytes())
    }
}

fn validate_playback_rate(rate: f64) -> Result<()> {
    if !rate.is_finite() || rate <= 0.0 {
        return Err(PitcherError::InvalidParameter {
            param: "playback_rate".to_string(),
            value: rate.to_string(),
            expected: "> 0".to_string(),
        });
    }
    Ok(())
}

fn validate_pre_roll(seconds: f64) -> Result<()> {
    if !seconds.is_finite() || seconds < 0.0 {
        return Err(PitcherError::InvalidParameter {
            param: "pre_roll_seconds".to_string(),
            value: seconds.to_string(),
            expected: ">= 0".to_string(),
        });
    }
    Ok(())
}

// ============================================================================
// Equalizer State
// ============================================================================

/// Equalizer lifecycle
#[derive(Debug, Clone, PartialEq)]
pub enum EqualizerState {
    /// Gains chosen, no signal chain yet
    Configured { gains: [f32; NUM_BANDS] },
    /// Gains realised as a bank for a loaded source's sample rate
    Bound { bank: EqualizerBank, sample_rate: u32 },
}

impl Default for EqualizerState {
    fn default() -> Self {
        EqualizerState::Configured {
            gains: [0.0; NUM_BANDS],
        }
    }
}

impl EqualizerState {
    /// Set one band's gain in either phase
    pub fn set_band_gain(&mut self, index: usize, gain_db: f32) -> Result<()> {
        match self {
            EqualizerState::Configured { gains } => {
                // Validate through a bank so both phases reject the same input
                let mut probe = EqualizerBank::from_gains(&gains[..])?;
                probe.set_band_gain(index, gain_db)?;
                gains[index] = gain_db;
                Ok(())
            }
            EqualizerState::Bound { bank, .. } => bank.set_band_gain(index, gain_db),
        }
    }

    pub fn band_gain(&self, index: usize) -> Result<f32> {
        match self {
            EqualizerState::Configured { gains } => {
                gains
                    .get(index)
                    .copied()
                    .ok_or(PitcherError::IndexOutOfRange {
                        index,
                        len: NUM_BANDS,
                    })
            }
            EqualizerState::Bound { bank, .. } => bank.band_gain(index),
        }
    }

    pub fn gains(&self) -> Vec<f32> {
        match self {
            EqualizerState::Configured { gains } => gains.to_vec(),
            EqualizerState::Bound { bank, .. } => bank.gains(),
        }
    }

    /// Current gains as a bank, whatever the phase
    pub fn bank(&self) -> Result<EqualizerBank> {
        match self {
            EqualizerState::Configured { gains } => EqualizerBank::from_gains(gains),
            EqualizerState::Bound { bank, .. } => Ok(bank.clone()),
        }
    }

    /// Move to the bound phase for a source at `sample_rate`
    pub fn bind(&mut self, sample_rate: u32) -> Result<()> {
        let bank = self.bank()?;
        *self = EqualizerState::Bound { bank, sample_rate };
        Ok(())
    }

    /// Drop the signal chain, keeping the gains
    pub fn unbind(&mut self) {
        if let EqualizerState::Bound { bank, .. } = self {
            let mut gains = [0.0; NUM_BANDS];
            gains.copy_from_slice(&bank.gains());
            *self = EqualizerState::Configured { gains };
        }
    }

    pub fn sample_rate(&self) -> Option<u32> {
        match self {
            EqualizerState::Configured { .. } => None,
            EqualizerState::Bound { sample_rate, .. } => Some(*sample_rate),
        }
    }
}

// ============================================================================
// Session
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
struct ImpulseKey {
    size_factor: f64,
    sample_rate: u32,
}

/// Owned runtime state of one editing session
#[derive(Debug, Clone)]
pub struct Session {
    equalizer: EqualizerState,
    reverb: ReverbParameters,
    playback_rate: f64,
    pre_roll_seconds: f64,
    synthesizer: ImpulseSynthesizer,
    impulse: Option<(ImpulseKey, Arc<ImpulseResponse>)>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new(ImpulseSynthesizer::new())
    }
}

impl Session {
    /// Fresh session with default settings
    pub fn new(synthesizer: ImpulseSynthesizer) -> Self {
        Self {
            equalizer: EqualizerState::default(),
            reverb: ReverbParameters::default(),
            playback_rate: 1.0,
            pre_roll_seconds: 0.0,
            synthesizer,
            impulse: None,
        }
    }

    /// Session starting from saved settings
    pub fn from_settings(settings: &EffectSettings, synthesizer: ImpulseSynthesizer) -> Result<Self> {
        settings.validate()?;
        let mut session = Self::new(synthesizer);
        for (index, &gain) in settings.eq_gains.iter().enumerate() {
            session.equalizer.set_band_gain(index, gain)?;
        }
        session.reverb = settings.reverb;
        session.playback_rate = settings.playback_rate;
        session.pre_roll_seconds = settings.pre_roll_seconds;
        Ok(session)
    }

    /// Current settings as a preset
    pub fn settings(&self) -> EffectSettings {
        EffectSettings {
            eq_gains: self.equalizer.gains(),
            reverb: self.reverb,
            playback_rate: self.playback_rate,
            pre_roll_seconds: self.pre_roll_seconds,
        }
    }

    pub fn equalizer(&self) -> &EqualizerState {
        &self.equalizer
    }

    pub fn reverb(&self) -> ReverbParameters {
        self.reverb
    }

    pub fn playback_rate(&self) -> f64 {
        self.playback_rate
    }

    pub fn pre_roll_seconds(&self) -> f64 {
        self.pre_roll_seconds
    }

    pub fn set_band_gain(&mut self, index: usize, gain_db: f32) -> Result<()> {
        self.equalizer.set_band_gain(index, gain_db)
    }

    pub fn band_gain(&self, index: usize) -> Result<f32> {
        self.equalizer.band_gain(index)
    }

    pub fn set_reverb_mix(&mut self, mix: f32) -> Result<()> {
        self.reverb = ReverbParameters::new(mix, self.reverb.size_factor)?;
        Ok(())
    }

    /// Change room size; the cached impulse is rebuilt on next use
    pub fn set_reverb_size(&mut self, size_factor: f64) -> Result<()> {
        self.reverb = ReverbParameters::new(self.reverb.mix, size_factor)?;
        Ok(())
    }

    pub fn set_playback_rate(&mut self, rate: f64) -> Result<()> {
        validate_playback_rate(rate)?;
        self.playback_rate = rate;
        Ok(())
    }

    pub fn set_pre_roll_seconds(&mut self, seconds: f64) -> Result<()> {
        validate_pre_roll(seconds)?;
        self.pre_roll_seconds = seconds;
        Ok(())
    }

    /// Bind the equalizer to a loaded source's sample rate
    pub fn bind(&mut self, sample_rate: u32) -> Result<()> {
        self.equalizer.bind(sample_rate)?;
        info!("Session bound to {} Hz", sample_rate);
        Ok(())
    }

    pub fn unbind(&mut self) {
        self.equalizer.unbind();
    }

    fn working_sample_rate(&self) -> u32 {
        self.equalizer.sample_rate().unwrap_or(DEFAULT_SAMPLE_RATE)
    }

    /// The cached impulse, rebuilt if the room size or sample rate changed
    pub fn impulse(&mut self) -> Result<Arc<ImpulseResponse>> {
        let key = ImpulseKey {
            size_factor: self.reverb.size_factor,
            sample_rate: self.working_sample_rate(),
        };

        if let Some((cached_key, impulse)) = &self.impulse {
            if *cached_key == key {
                return Ok(Arc::clone(impulse));
            }
        }

        let (duration, decay) = self.reverb.impulse_shape();
        let impulse = Arc::new(self.synthesizer.synthesize(
            duration,
            decay,
            key.sample_rate,
            IMPULSE_CHANNELS,
        )?);
        self.impulse = Some((key, Arc::clone(&impulse)));
        Ok(impulse)
    }

    /// Owned copy of everything a render needs
    ///
    /// Export uses the same cached impulse as the last preview.
    pub fn snapshot(&mut self) -> Result<RenderSettings> {
        Ok(RenderSettings {
            eq_bank: self.equalizer.bank()?,
            reverb: self.reverb,
            impulse: self.impulse()?,
            playback_rate: self.playback_rate,
            pre_roll_seconds: self.pre_roll_seconds,
        })
    }

    /// Compile a preview processor for the bound sample rate
    pub fn preview(&mut self, num_channels: usize) -> Result<PreviewProcessor> {
        let sample_rate = self.working_sample_rate();
        let settings = self.snapshot()?;
        let graph = EffectGraph::standard(settings.eq_bank, &settings.reverb);
        PreviewProcessor::compile(&graph, &settings.impulse, num_channels, sample_rate)
    }
}
