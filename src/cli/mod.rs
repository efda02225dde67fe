//! CLI Module
//!
//! Command-line interface for Pitcher.

pub mod commands;

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::dsp::eq::NUM_BANDS;
use crate::export::{ExportFormat, DEFAULT_BITRATE_KBPS};

/// Pitcher - EQ, reverb and tape-style speed for audio files
#[derive(Parser, Debug)]
#[command(name = "pitcher")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Render and export one or more audio files
    #[command(name = "render")]
    Render {
        /// Input files or directories (directories are searched recursively)
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Directory for the exported file or archive
        #[arg(short, long, default_value = ".")]
        out_dir: PathBuf,

        /// Output container
        #[arg(short, long, value_enum, default_value_t = FormatArg::Wav)]
        format: FormatArg,

        /// MP3 bitrate in kbps
        #[arg(short, long, default_value_t = DEFAULT_BITRATE_KBPS)]
        bitrate: u32,

        /// Export WAV when no MP3 encoder is available instead of failing
        #[arg(long)]
        fallback_wav: bool,

        /// Seed for the reverb impulse (reproducible output)
        #[arg(long)]
        seed: Option<u64>,

        #[command(flatten)]
        effects: EffectArgs,
    },

    /// List the equalizer bands
    #[command(name = "bands")]
    Bands,

    /// Write the effective effect settings to a JSON preset
    #[command(name = "preset")]
    Preset {
        /// Where to write the preset
        output: PathBuf,

        #[command(flatten)]
        effects: EffectArgs,
    },
}

/// Effect settings shared by every command that builds a chain
#[derive(Args, Debug, Clone, Default)]
pub struct EffectArgs {
    /// Start from a JSON preset
    #[arg(long)]
    pub preset: Option<PathBuf>,

    /// Band gain as INDEX=DB (e.g. 17=4.5), repeatable
    #[arg(long = "eq", value_parser = parse_band)]
    pub eq: Vec<(usize, f32)>,

    /// Reverb wet/dry mix (0.0 - 1.0)
    #[arg(long)]
    pub mix: Option<f32>,

    /// Reverb room size (0.0 - 1.0)
    #[arg(long)]
    pub size: Option<f64>,

    /// Playback rate; pitch follows speed (0.5 = half speed, an octave down)
    #[arg(long)]
    pub rate: Option<f64>,

    /// Seconds of silence before the audio starts
    #[arg(long)]
    pub pre_roll: Option<f64>,
}

/// Output container on the command line
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatArg {
    Wav,
    Mp3,
}

impl FormatArg {
    pub fn to_export_format(self, bitrate_kbps: u32) -> ExportFormat {
        match self {
            FormatArg::Wav => ExportFormat::Wav,
            FormatArg::Mp3 => ExportFormat::Mp3 { bitrate_kbps },
        }
    }
}

/// Parse `INDEX=DB`
fn parse_band(s: &str) -> Result<(usize, f32), String> {
    let (index, gain) = s
        .split_once('=')
        .ok_or_else(|| format!("expected INDEX=DB, got '{}'", s))?;

    let index: usize = index
        .trim()
        .parse()
        .map_err(|_| format!("band index '{}' is not a number", index))?;
    if index >= NUM_BANDS {
        return Err(format!("band index {} out of range (0..{})", index, NUM_BANDS));
    }

    let gain: f32 = gain
        .trim()
        .parse()
        .map_err(|_| format!("gain '{}' is not a number", gain))?;

    Ok((index, gain))
}
