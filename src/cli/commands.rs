//! CLI Command Implementations
//!
//! Implements the actual logic for each CLI command.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use log::{info, warn};
use walkdir::WalkDir;

use super::{EffectArgs, FormatArg};
use crate::dsp::eq::ISO_CENTER_FREQUENCIES;
use crate::dsp::ImpulseSynthesizer;
use crate::engine::io::{display_name, write_atomically};
use crate::export::{BatchExporter, ContainerEncoder, ExportJob};
use crate::session::{EffectSettings, Session};

/// Extensions picked up when walking a directory
const AUDIO_EXTENSIONS: &[&str] = &["wav", "mp3", "flac", "ogg", "aif", "aiff"];

/// Options of the `render` command
#[derive(Debug, Clone)]
pub struct RenderOptions {
    pub inputs: Vec<PathBuf>,
    pub out_dir: PathBuf,
    pub format: FormatArg,
    pub bitrate: u32,
    pub fallback_wav: bool,
    pub seed: Option<u64>,
    pub effects: EffectArgs,
}

/// Format seconds as `mm:ss`
pub fn format_time(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds.floor() as u64
    } else {
        0
    };
    format!("{:02}:{:02}", total / 60, total % 60)
}

/// Session from the preset (if any) with command-line overrides applied
pub fn build_session(args: &EffectArgs, synthesizer: ImpulseSynthesizer) -> Result<Session> {
    let settings = match &args.preset {
        Some(path) => EffectSettings::load(path)
            .with_context(|| format!("Failed to load preset {}", path.display()))?,
        None => EffectSettings::default(),
    };
    let mut session = Session::from_settings(&settings, synthesizer)?;

    for &(index, gain) in &args.eq {
        session
            .set_band_gain(index, gain)
            .with_context(|| format!("Invalid gain for band {}", index))?;
    }
    if let Some(mix) = args.mix {
        session.set_reverb_mix(mix).context("Invalid reverb mix")?;
    }
    if let Some(size) = args.size {
        session.set_reverb_size(size).context("Invalid reverb size")?;
    }
    if let Some(rate) = args.rate {
        session.set_playback_rate(rate).context("Invalid playback rate")?;
    }
    if let Some(pre_roll) = args.pre_roll {
        session.set_pre_roll_seconds(pre_roll).context("Invalid pre-roll")?;
    }

    if !(0.5..=2.0).contains(&session.playback_rate()) {
        warn!(
            "Playback rate {} is outside the usual 0.5 - 2.0 range",
            session.playback_rate()
        );
    }
    Ok(session)
}

/// Effective settings for `args`, as they would be saved to a preset
pub fn effect_settings(args: &EffectArgs) -> Result<EffectSettings> {
    Ok(build_session(args, ImpulseSynthesizer::new())?.settings())
}

/// Expand directories into the audio files beneath them, sorted by path
pub fn collect_inputs(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for input in inputs {
        if input.is_dir() {
            let mut found: Vec<PathBuf> = WalkDir::new(input)
                .into_iter()
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.file_type().is_file())
                .filter(|entry| is_audio_file(entry.path()))
                .map(|entry| entry.path().to_path_buf())
                .collect();
            found.sort();
            info!("Found {} audio files in {}", found.len(), input.display());
            files.extend(found);
        } else if input.is_file() {
            files.push(input.clone());
        } else {
            bail!("Input not found: {}", input.display());
        }
    }

    if files.is_empty() {
        bail!("No audio files to render");
    }
    Ok(files)
}

fn is_audio_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| AUDIO_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Render every input and write the file (or archive, for several inputs)
pub fn render(options: &RenderOptions) -> Result<PathBuf> {
    let synthesizer = match options.seed {
        Some(seed) => ImpulseSynthesizer::seeded(seed),
        None => ImpulseSynthesizer::new(),
    };
    let mut session = build_session(&options.effects, synthesizer)?;
    let snapshot = session.snapshot()?;
    let format = options.format.to_export_format(options.bitrate);

    let files = collect_inputs(&options.inputs)?;
    info!("Rendering {} file(s) as {}", files.len(), format);
    let jobs = files
        .iter()
        .map(|path| {
            let bytes = std::fs::read(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            Ok(ExportJob {
                file_name: display_name(path),
                bytes,
                settings: snapshot.clone(),
                format,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let exporter = BatchExporter::new(ContainerEncoder::with_default_backends())
        .with_wav_fallback(options.fallback_wav);

    let started = Instant::now();
    let bundle = exporter.export_all(&jobs, |progress| {
        println!(
            "[{}/{}] {} ({} elapsed)",
            progress.completed,
            progress.total,
            progress.file_name,
            format_time(started.elapsed().as_secs_f64())
        );
    })?;

    let artifact = match bundle.primary() {
        Some(artifact) => artifact,
        None => bail!("Nothing was exported"),
    };

    std::fs::create_dir_all(&options.out_dir)
        .with_context(|| format!("Failed to create {}", options.out_dir.display()))?;
    let path = options.out_dir.join(&artifact.file_name);
    write_atomically(&path, &artifact.bytes)
        .with_context(|| format!("Failed to write {}", path.display()))?;

    println!("Exported: {}", path.display());
    Ok(path)
}

/// Print the equalizer bands
pub fn bands() -> Result<()> {
    println!("{:>5}  {:>10}", "Band", "Center");
    for (index, freq) in ISO_CENTER_FREQUENCIES.iter().enumerate() {
        if *freq >= 1000.0 {
            println!("{:>5}  {:>7.1} kHz", index, freq / 1000.0);
        } else {
            println!("{:>5}  {:>8} Hz", index, freq);
        }
    }
    Ok(())
}

/// Save the effective settings as a JSON preset
pub fn preset(output: &Path, effects: &EffectArgs) -> Result<()> {
    let settings = effect_settings(effects)?;
    settings
        .save(output)
        .with_context(|| format!("Failed to write preset {}", output.display()))?;
    println!("Preset saved: {}", output.display());
    Ok(())
}
