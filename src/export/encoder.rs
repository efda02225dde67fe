//! Container Encoding
//!
//! Serializes rendered buffers into file bytes:
//! - WAV: canonical 16-bit PCM, written with hound
//! - MP3: framing only. PCM is sliced into 1152-sample blocks and handed to
//!   an injected [`Mp3Backend`]; the bitstream itself is the backend's job.
//!
//! Without an MP3 backend, MP3 export fails with `EncoderUnavailable`. It is
//! never silently replaced by WAV.

use std::fmt;
use std::io::Cursor;
use std::sync::Arc;

use hound::{SampleFormat, WavSpec, WavWriter};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::engine::SampleBuffer;
use crate::error::{PitcherError, Result};

/// Samples per channel handed to the MP3 backend per call
pub const MP3_BLOCK_SIZE: usize = 1152;

/// Default MP3 bitrate in kbps
pub const DEFAULT_BITRATE_KBPS: u32 = 192;

/// Target container of an export
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Wav,
    Mp3 { bitrate_kbps: u32 },
}

impl ExportFormat {
    /// MP3 at the default bitrate
    pub fn mp3() -> Self {
        ExportFormat::Mp3 {
            bitrate_kbps: DEFAULT_BITRATE_KBPS,
        }
    }

    /// File extension without the dot
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Wav => "wav",
            ExportFormat::Mp3 { .. } => "mp3",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportFormat::Wav => write!(f, "WAV"),
            ExportFormat::Mp3 { bitrate_kbps } => write!(f, "MP3 {} kbps", bitrate_kbps),
        }
    }
}

/// Output name for a source file: base name (before the last '.') plus the
/// target extension
pub fn output_file_name(source_name: &str, format: ExportFormat) -> String {
    format!("{}.{}", base_name(source_name), format.extension())
}

fn base_name(name: &str) -> &str {
    match name.rfind('.') {
        Some(pos) if pos > 0 => &name[..pos],
        _ => name,
    }
}

/// Clamp to [-1, 1] and scale to 16-bit: negative by 32768, non-negative by
/// 32767, rounded to nearest
#[inline]
pub fn float_to_i16(sample: f32) -> i16 {
    let s = (sample as f64).clamp(-1.0, 1.0);
    let scaled = if s < 0.0 { s * 32768.0 } else { s * 32767.0 };
    scaled.round() as i16
}

// ============================================================================
// MP3 Backend Capability
// ============================================================================

/// An open MP3 encoding session
pub trait Mp3Backend {
    /// Encode one block; `right` is `None` for mono streams
    fn encode_block(&mut self, left: &[i16], right: Option<&[i16]>) -> Result<Vec<u8>>;

    /// Emit any buffered frames and finish the stream
    fn flush(&mut self) -> Result<Vec<u8>>;
}

/// Opens MP3 encoding sessions
pub trait Mp3BackendFactory: Send + Sync {
    fn open(&self, channels: usize, sample_rate: u32, bitrate_kbps: u32) -> Result<Box<dyn Mp3Backend>>;
}

// ============================================================================
// Container Encoder
// ============================================================================

/// Encodes rendered buffers to WAV or MP3 bytes
#[derive(Clone, Default)]
pub struct ContainerEncoder {
    mp3: Option<Arc<dyn Mp3BackendFactory>>,
}

impl fmt::Debug for ContainerEncoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContainerEncoder")
            .field("mp3_available", &self.mp3.is_some())
            .finish()
    }
}

impl ContainerEncoder {
    /// WAV-only encoder
    pub fn new() -> Self {
        Self { mp3: None }
    }

    /// Encoder with the given MP3 backend
    pub fn with_mp3_backend(factory: Arc<dyn Mp3BackendFactory>) -> Self {
        Self { mp3: Some(factory) }
    }

    /// Encoder with whatever backends were compiled in
    pub fn with_default_backends() -> Self {
        #[cfg(feature = "lame")]
        {
            Self::with_mp3_backend(Arc::new(lame::LameFactory))
        }
        #[cfg(not(feature = "lame"))]
        {
            Self::new()
        }
    }

    /// Whether MP3 export can succeed
    pub fn supports_mp3(&self) -> bool {
        self.mp3.is_some()
    }

    /// Encode a buffer in the given format
    pub fn encode(&self, buffer: &SampleBuffer, format: ExportFormat) -> Result<Vec<u8>> {
        let bytes = match format {
            ExportFormat::Wav => encode_wav(buffer)?,
            ExportFormat::Mp3 { bitrate_kbps } => self.encode_mp3(buffer, bitrate_kbps)?,
        };
        info!("Encoded {} frames as {} ({} bytes)", buffer.num_frames(), format, bytes.len());
        Ok(bytes)
    }

    /// Frame a buffer into 1152-sample blocks and run it through the MP3
    /// backend
    ///
    /// Only channels 0 and 1 are encoded.
    ///
    /// # Errors
    /// * `EncoderUnavailable` - no MP3 backend was provided
    pub fn encode_mp3(&self, buffer: &SampleBuffer, bitrate_kbps: u32) -> Result<Vec<u8>> {
        let factory = self.mp3.as_ref().ok_or_else(|| PitcherError::EncoderUnavailable {
            format: "MP3".to_string(),
        })?;

        let channels = buffer.num_channels().min(2);
        let mut backend = factory.open(channels, buffer.sample_rate(), bitrate_kbps)?;

        let left = buffer.channel(0);
        let right = (channels == 2).then(|| buffer.channel(1));

        let mut out = Vec::new();
        let mut blocks = 0usize;
        for start in (0..buffer.num_frames()).step_by(MP3_BLOCK_SIZE) {
            let end = (start + MP3_BLOCK_SIZE).min(buffer.num_frames());
            let left_pcm: Vec<i16> = left[start..end].iter().map(|&s| float_to_i16(s)).collect();
            let right_pcm: Option<Vec<i16>> =
                right.map(|r| r[start..end].iter().map(|&s| float_to_i16(s)).collect());

            out.extend(backend.encode_block(&left_pcm, right_pcm.as_deref())?);
            blocks += 1;
        }
        out.extend(backend.flush()?);

        debug!("MP3: {} blocks of {} samples, {} ch", blocks, MP3_BLOCK_SIZE, channels);
        Ok(out)
    }
}

/// Encode a buffer as 16-bit PCM WAV
///
/// Mono and stereo get the canonical 44-byte header. More channels are
/// written with a WAVE_FORMAT_EXTENSIBLE `fmt ` chunk.
pub fn encode_wav(buffer: &SampleBuffer) -> Result<Vec<u8>> {
    let spec = WavSpec {
        channels: u16::try_from(buffer.num_channels()).map_err(|_| PitcherError::Encoding {
            reason: format!("{} channels exceed the WAV limit", buffer.num_channels()),
        })?,
        sample_rate: buffer.sample_rate(),
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let wav_err = |e: hound::Error| PitcherError::Encoding {
        reason: format!("WAV write failed: {}", e),
    };

    let mut bytes = Vec::with_capacity(44 + buffer.num_frames() * buffer.num_channels() * 2);
    {
        let mut writer = WavWriter::new(Cursor::new(&mut bytes), spec).map_err(wav_err)?;
        let mut samples = writer.get_i16_writer((buffer.num_frames() * buffer.num_channels()) as u32);
        for frame in 0..buffer.num_frames() {
            for channel in buffer.channels() {
                samples.write_sample(float_to_i16(channel[frame]));
            }
        }
        samples.flush().map_err(wav_err)?;
        writer.finalize().map_err(wav_err)?;
    }

    Ok(bytes)
}

// ============================================================================
// LAME Backend
// ============================================================================

#[cfg(feature = "lame")]
pub mod lame {
    //! MP3 backend on native LAME through `mp3lame-encoder`

    use mp3lame_encoder::{Bitrate, Builder, DualPcm, Encoder, FlushNoGap, MonoPcm, Quality};

    use super::{Mp3Backend, Mp3BackendFactory};
    use crate::error::{PitcherError, Result};

    /// Space reserved for the final flush
    const FLUSH_RESERVE: usize = 7200;

    fn lame_err(stage: &str, e: impl std::fmt::Debug) -> PitcherError {
        PitcherError::Encoding {
            reason: format!("LAME {} failed: {:?}", stage, e),
        }
    }

    fn lame_bitrate(kbps: u32) -> Bitrate {
        match kbps {
            0..=111 => Bitrate::Kbps96,
            112..=127 => Bitrate::Kbps112,
            128..=159 => Bitrate::Kbps128,
            160..=191 => Bitrate::Kbps160,
            192..=223 => Bitrate::Kbps192,
            224..=255 => Bitrate::Kbps224,
            256..=319 => Bitrate::Kbps256,
            _ => Bitrate::Kbps320,
        }
    }

    /// Opens LAME encoders
    #[derive(Debug, Clone, Copy, Default)]
    pub struct LameFactory;

    impl Mp3BackendFactory for LameFactory {
        fn open(&self, channels: usize, sample_rate: u32, bitrate_kbps: u32) -> Result<Box<dyn Mp3Backend>> {
            let mut builder = Builder::new().ok_or_else(|| lame_err("init", "no encoder"))?;
            builder
                .set_num_channels(channels as u8)
                .map_err(|e| lame_err("set channels", e))?;
            builder
                .set_sample_rate(sample_rate)
                .map_err(|e| lame_err("set sample rate", e))?;
            builder
                .set_brate(lame_bitrate(bitrate_kbps))
                .map_err(|e| lame_err("set bitrate", e))?;
            builder
                .set_quality(Quality::Good)
                .map_err(|e| lame_err("set quality", e))?;

            let encoder = builder.build().map_err(|e| lame_err("build", e))?;
            Ok(Box::new(LameBackend { encoder }))
        }
    }

    struct LameBackend {
        encoder: Encoder,
    }

    impl Mp3Backend for LameBackend {
        fn encode_block(&mut self, left: &[i16], right: Option<&[i16]>) -> Result<Vec<u8>> {
            let mut out = Vec::with_capacity(mp3lame_encoder::max_required_buffer_size(left.len()));
            match right {
                Some(right) => self.encoder.encode_to_vec(DualPcm { left, right }, &mut out),
                None => self.encoder.encode_to_vec(MonoPcm(left), &mut out),
            }
            .map_err(|e| lame_err("encode", e))?;
            Ok(out)
        }

        fn flush(&mut self) -> Result<Vec<u8>> {
            let mut out = Vec::with_capacity(FLUSH_RESERVE);
            self.encoder
                .flush_to_vec::<FlushNoGap>(&mut out)
                .map_err(|e| lame_err("flush", e))?;
            Ok(out)
        }
    }

}
