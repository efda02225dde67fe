//! Audio file I/O for Pitcher
//!
//! Decodes source files into a [`SampleBuffer`] at their native sample rate
//! and channel count. WAV is read with hound; MP3, FLAC, OGG/Vorbis and
//! AIFF go through symphonia.
//!
//! Writing rendered files goes through [`write_atomically`] so a failed or
//! cancelled export never leaves a partial file at the destination.

use std::io::{Cursor, Write};
use std::path::Path;

use hound::{SampleFormat, WavReader};
use log::debug;
use symphonia::core::audio::SampleBuffer as DecodedSamples;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tempfile::NamedTempFile;

use crate::engine::buffer::SampleBuffer;
use crate::error::{PitcherError, Result};

/// Decode an audio file from memory
///
/// The file name is only used for error messages and as a format hint.
///
/// # Errors
/// * `Decode` - the bytes are not a supported audio format, or are corrupt
pub fn decode_bytes(file_name: &str, bytes: &[u8]) -> Result<SampleBuffer> {
    let buffer = if is_riff_wave(bytes) {
        decode_wav(file_name, bytes)?
    } else {
        decode_with_symphonia(file_name, bytes)?
    };

    debug!(
        "Decoded '{}': {} ch, {} Hz, {} frames",
        file_name,
        buffer.num_channels(),
        buffer.sample_rate(),
        buffer.num_frames()
    );
    Ok(buffer)
}

/// Read and decode an audio file from disk
pub fn decode_file(path: &Path) -> Result<SampleBuffer> {
    let bytes = std::fs::read(path)?;
    decode_bytes(&display_name(path), &bytes)
}

/// File name component of a path, for messages and output naming
pub fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Write bytes to `path` via a temporary file in the same directory
///
/// The destination only ever holds either its previous content or the
/// complete new content.
pub fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut temp = NamedTempFile::new_in(dir)?;
    temp.write_all(bytes)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| PitcherError::Io(e.error))?;
    Ok(())
}

/// Generate a mono sine test tone
pub fn generate_test_tone(frequency: f32, duration_secs: f32, sample_rate: u32) -> Result<SampleBuffer> {
    generate_stereo_test_tone(frequency, frequency, duration_secs, sample_rate).and_then(|b| {
        let mut channels = b.into_channels();
        channels.truncate(1);
        SampleBuffer::from_channels(channels, sample_rate)
    })
}

/// Generate a stereo test tone with a different frequency per channel
pub fn generate_stereo_test_tone(
    freq_left: f32,
    freq_right: f32,
    duration_secs: f32,
    sample_rate: u32,
) -> Result<SampleBuffer> {
    let num_samples = (duration_secs * sample_rate as f32) as usize;
    let tone = |frequency: f32| -> Vec<f32> {
        let angular_freq = 2.0 * std::f32::consts::PI * frequency / sample_rate as f32;
        (0..num_samples)
            .map(|i| (angular_freq * i as f32).sin())
            .collect()
    };

    SampleBuffer::from_channels(vec![tone(freq_left), tone(freq_right)], sample_rate)
}

// ============================================================================
// Internal helper functions
// ============================================================================

fn is_riff_wave(bytes: &[u8]) -> bool {
    bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE"
}

fn decode_error(
    file_name: &str,
    reason: impl Into<String>,
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
) -> PitcherError {
    PitcherError::Decode {
        file_name: file_name.to_string(),
        reason: reason.into(),
        source,
    }
}

fn decode_wav(file_name: &str, bytes: &[u8]) -> Result<SampleBuffer> {
    let reader = WavReader::new(Cursor::new(bytes))
        .map_err(|e| decode_error(file_name, format!("invalid WAV header: {}", e), Some(Box::new(e))))?;

    let spec = reader.spec();
    let channels = spec.channels as usize;
    if channels == 0 {
        return Err(decode_error(file_name, "WAV declares zero channels", None));
    }

    let interleaved = read_samples_as_f32(file_name, reader, spec.bits_per_sample, spec.sample_format)?;
    if interleaved.len() % channels != 0 {
        return Err(decode_error(file_name, "truncated final frame", None));
    }

    SampleBuffer::from_interleaved(&interleaved, channels, spec.sample_rate)
        .map_err(|e| decode_error(file_name, e.to_string(), None))
}

/// Read samples from a WAV reader and convert to f32
///
/// 16-bit samples use the inverse of the export scaling: negative values
/// divide by 32768, non-negative by 32767.
fn read_samples_as_f32<R: std::io::Read>(
    file_name: &str,
    mut reader: WavReader<R>,
    bits_per_sample: u16,
    sample_format: SampleFormat,
) -> Result<Vec<f32>> {
    let wrap = |e: hound::Error| {
        decode_error(
            file_name,
            format!("failed to read {}-bit samples: {}", bits_per_sample, e),
            Some(Box::new(e)),
        )
    };

    match (sample_format, bits_per_sample) {
        (SampleFormat::Float, _) => reader
            .samples::<f32>()
            .collect::<std::result::Result<Vec<f32>, _>>()
            .map_err(wrap),
        (SampleFormat::Int, 8) => reader
            .samples::<i8>()
            .map(|s| s.map(|v| v as f32 / 128.0))
            .collect::<std::result::Result<Vec<f32>, _>>()
            .map_err(wrap),
        (SampleFormat::Int, 16) => reader
            .samples::<i16>()
            .map(|s| s.map(i16_to_float))
            .collect::<std::result::Result<Vec<f32>, _>>()
            .map_err(wrap),
        (SampleFormat::Int, 24) => reader
            .samples::<i32>()
            .map(|s| s.map(|v| v as f32 / 8388608.0))
            .collect::<std::result::Result<Vec<f32>, _>>()
            .map_err(wrap),
        (SampleFormat::Int, 32) => reader
            .samples::<i32>()
            .map(|s| s.map(|v| (v as f64 / 2147483648.0) as f32))
            .collect::<std::result::Result<Vec<f32>, _>>()
            .map_err(wrap),
        (SampleFormat::Int, bits) => Err(decode_error(
            file_name,
            format!("unsupported {}-bit integer audio", bits),
            None,
        )),
    }
}

/// Inverse of the 16-bit export rule
#[inline]
pub fn i16_to_float(value: i16) -> f32 {
    if value < 0 {
        value as f32 / 32768.0
    } else {
        value as f32 / 32767.0
    }
}

fn decode_with_symphonia(file_name: &str, bytes: &[u8]) -> Result<SampleBuffer> {
    let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes.to_vec())), Default::default());

    // Hint from file extension
    let mut hint = Hint::new();
    if let Some(ext) = Path::new(file_name).extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| decode_error(file_name, format!("unrecognised format: {}", e), Some(Box::new(e))))?;

    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| decode_error(file_name, "no audio track found", None))?;

    let track_id = track.id;
    let codec_params = track.codec_params.clone();

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| decode_error(file_name, format!("unsupported codec: {}", e), Some(Box::new(e))))?;

    let mut interleaved: Vec<f32> = Vec::new();
    let mut channels = codec_params.channels.map(|c| c.count()).unwrap_or(0);
    let mut sample_rate = codec_params.sample_rate.unwrap_or(0);

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(e) => {
                return Err(decode_error(file_name, format!("packet read error: {}", e), Some(Box::new(e))));
            }
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                channels = spec.channels.count();
                sample_rate = spec.rate;

                let mut samples = DecodedSamples::<f32>::new(decoded.capacity() as u64, spec);
                samples.copy_interleaved_ref(decoded);
                interleaved.extend_from_slice(samples.samples());
            }
            // Corrupt packet: skip it and keep going
            Err(SymphoniaError::DecodeError(reason)) => {
                debug!("Skipping undecodable packet in '{}': {}", file_name, reason);
            }
            Err(e) => {
                return Err(decode_error(file_name, format!("decode error: {}", e), Some(Box::new(e))));
            }
        }
    }

    if channels == 0 || sample_rate == 0 {
        return Err(decode_error(file_name, "stream has no channel layout or sample rate", None));
    }

    SampleBuffer::from_interleaved(&interleaved, channels, sample_rate)
        .map_err(|e| decode_error(file_name, e.to_string(), None))
}
