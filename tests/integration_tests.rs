//! Integration Tests
//!
//! End-to-end tests for the Pitcher render and export pipeline.

use std::io::{Cursor, Read};
use std::sync::Arc;

use approx::assert_abs_diff_eq;
use pretty_assertions::assert_eq;
use test_case::test_case;

use pitcher::cli::commands::{self, RenderOptions};
use pitcher::cli::{EffectArgs, FormatArg};
use pitcher::engine::calculate_peak;
use pitcher::engine::io::{decode_bytes, decode_file, generate_stereo_test_tone, generate_test_tone};
use pitcher::error::JobStatus;
use pitcher::export::encode_wav;
use pitcher::{
    BatchExporter, ContainerEncoder, EqualizerBank, ExportFormat, ExportJob, ImpulseResponse,
    ImpulseSynthesizer, OfflineRenderer, PitcherError, RenderRequest, RenderSettings,
    ReverbParameters, SampleBuffer, Session,
};

/// Helper to create a mono sine buffer
fn create_sine_buffer(frequency: f32, sample_rate: u32, num_frames: usize) -> SampleBuffer {
    let samples = (0..num_frames)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            0.5 * (2.0 * std::f32::consts::PI * frequency * t).sin()
        })
        .collect();
    SampleBuffer::from_channels(vec![samples], sample_rate).unwrap()
}

fn seeded_impulse(size_factor: f64, sample_rate: u32) -> Arc<ImpulseResponse> {
    let params = ReverbParameters::new(0.0, size_factor).unwrap();
    let (duration, decay) = params.impulse_shape();
    Arc::new(
        ImpulseSynthesizer::seeded(7)
            .synthesize(duration, decay, sample_rate, 2)
            .unwrap(),
    )
}

fn settings(eq_bank: EqualizerBank, mix: f32, sample_rate: u32) -> RenderSettings {
    RenderSettings {
        eq_bank,
        reverb: ReverbParameters::new(mix, 0.1).unwrap(),
        impulse: seeded_impulse(0.1, sample_rate),
        playback_rate: 1.0,
        pre_roll_seconds: 0.0,
    }
}

// === Render Pipeline Tests ===

#[test]
fn test_end_to_end_neutral_render_is_exact() {
    let source = create_sine_buffer(440.0, 44100, 44100);
    let request = RenderRequest::new(source.clone(), settings(EqualizerBank::new(), 0.0, 44100));

    let output = OfflineRenderer::new().render(&request).unwrap();

    assert_eq!(output.buffer().num_frames(), 44100);
    assert_eq!(output.buffer().num_channels(), 1);
    assert_eq!(output.buffer().channel(0), source.channel(0));
}

#[test]
fn test_dry_mix_equals_equalizer_only() {
    let source = create_sine_buffer(1000.0, 44100, 8192);
    let mut bank = EqualizerBank::new();
    bank.set_band_gain(17, 6.0).unwrap();
    bank.set_band_gain(4, -9.0).unwrap();

    let request = RenderRequest::new(source.clone(), settings(bank.clone(), 0.0, 44100));
    let output = OfflineRenderer::new().render(&request).unwrap();

    let expected = bank.apply_to(&source);
    assert_eq!(output.plan().tail_frames, 0);
    assert_eq!(output.buffer().channel(0), expected.channel(0));
}

#[test]
fn test_flat_equalizer_is_identity() {
    let source = generate_stereo_test_tone(220.0, 660.0, 0.25, 48000).unwrap();
    let processed = EqualizerBank::new().apply_to(&source);

    for ch in 0..source.num_channels() {
        for (a, b) in source.channel(ch).iter().zip(processed.channel(ch)) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-6);
        }
    }
}

#[test]
fn test_pre_roll_is_silent_with_reverb() {
    let source = generate_stereo_test_tone(440.0, 880.0, 0.1, 44100).unwrap();
    let mut render_settings = settings(EqualizerBank::new(), 0.6, 44100);
    render_settings.pre_roll_seconds = 2.0;

    let output = OfflineRenderer::new()
        .render(&RenderRequest::new(source, render_settings))
        .unwrap();

    assert_eq!(output.plan().pre_roll_frames, 88200);
    for ch in 0..output.buffer().num_channels() {
        let lead = &output.buffer().channel(ch)[..88200];
        assert!(lead.iter().all(|&s| s == 0.0), "channel {} not silent", ch);
        assert!(output.buffer().channel(ch)[88200..].iter().any(|&s| s != 0.0));
    }
}

#[test_case(0.5, 2000 ; "half speed doubles length")]
#[test_case(2.0, 500 ; "double speed halves length")]
#[test_case(0.75, 1334 ; "fractional rate rounds up")]
fn test_playback_rate_length(rate: f64, expected_frames: usize) {
    let source = create_sine_buffer(300.0, 8000, 1000);
    let mut render_settings = settings(EqualizerBank::new(), 0.0, 8000);
    render_settings.playback_rate = rate;

    let output = OfflineRenderer::new()
        .render(&RenderRequest::new(source, render_settings))
        .unwrap();

    assert_eq!(output.plan().scaled_frames, expected_frames);
    assert_eq!(output.buffer().num_frames(), expected_frames);
}

#[test]
fn test_reverb_tail_extends_output() {
    let source = create_sine_buffer(300.0, 8000, 1000);
    let render_settings = settings(EqualizerBank::new(), 0.5, 8000);
    let impulse_frames = render_settings.impulse.num_frames();

    let output = OfflineRenderer::new()
        .render(&RenderRequest::new(source, render_settings))
        .unwrap();

    assert_eq!(output.plan().tail_frames, impulse_frames - 1);
    assert_eq!(output.buffer().num_frames(), 1000 + impulse_frames - 1);
    assert!(output.buffer().is_finite());
}

#[test]
fn test_impulse_rate_follows_source() {
    let source = create_sine_buffer(300.0, 22050, 2205);
    let render_settings = settings(EqualizerBank::new(), 0.3, 44100);
    let impulse_frames = render_settings.impulse.num_frames();

    let output = OfflineRenderer::new()
        .render(&RenderRequest::new(source, render_settings))
        .unwrap();

    assert_eq!(output.buffer().sample_rate(), 22050);
    assert!(output.plan().tail_frames < impulse_frames);
}

#[test]
fn test_half_size_room_does_not_clip() {
    let source = create_sine_buffer(440.0, 44100, 44100);
    let render_settings = RenderSettings {
        eq_bank: EqualizerBank::new(),
        reverb: ReverbParameters::new(0.3, 0.5).unwrap(),
        impulse: seeded_impulse(0.5, 44100),
        playback_rate: 1.0,
        pre_roll_seconds: 0.0,
    };

    let output = OfflineRenderer::new()
        .render(&RenderRequest::new(source, render_settings))
        .unwrap();

    let peak = calculate_peak(output.buffer());
    assert!(peak < 1.0, "0.5 sine at 30% wet peaked at {}", peak);
    assert!(peak > 0.25);
}

// === Impulse Tests ===

#[test_case(1.0, 2.0, 44100 ; "one second")]
#[test_case(0.5, 1.5, 22050 ; "half second")]
#[test_case(2.5, 7.5, 8000 ; "long room")]
fn test_impulse_decays(duration: f64, decay: f64, sample_rate: u32) {
    let impulse = ImpulseSynthesizer::seeded(99)
        .synthesize(duration, decay, sample_rate, 2)
        .unwrap();

    let expected_len = (sample_rate as f64 * duration).floor() as usize;
    assert_eq!(impulse.num_frames(), expected_len);
    assert_eq!(impulse.num_channels(), 2);

    for ch in 0..2 {
        let window = expected_len / 10;
        let rms: Vec<f32> = impulse
            .buffer()
            .channel(ch)
            .chunks(window)
            .take(10)
            .map(|w| (w.iter().map(|s| s * s).sum::<f32>() / w.len() as f32).sqrt())
            .collect();

        for pair in rms.windows(2) {
            assert!(
                pair[1] <= pair[0] * 1.05,
                "envelope grew on channel {}: {:?}",
                ch,
                rms
            );
        }
        assert!(impulse.buffer().channel(ch).iter().all(|s| s.abs() <= 1.0));
    }
}

#[test]
fn test_impulse_channels_are_independent() {
    let impulse = ImpulseSynthesizer::seeded(3).synthesize(0.2, 1.0, 8000, 2).unwrap();
    assert!(impulse.buffer().channel(0) != impulse.buffer().channel(1));
}

#[test]
fn test_tiny_impulse_is_single_sample() {
    let impulse = ImpulseSynthesizer::new().synthesize(1e-6, 1.0, 44100, 1).unwrap();
    assert_eq!(impulse.num_frames(), 1);
}

// === Encoding Tests ===

#[test]
fn test_wav_round_trip_within_quantization() {
    let source = generate_stereo_test_tone(440.0, 550.0, 0.1, 44100).unwrap();
    let bytes = encode_wav(&source).unwrap();
    let decoded = decode_bytes("tone.wav", &bytes).unwrap();

    assert_eq!(decoded.num_channels(), 2);
    assert_eq!(decoded.num_frames(), source.num_frames());
    assert_eq!(decoded.sample_rate(), 44100);
    for ch in 0..2 {
        for (a, b) in source.channel(ch).iter().zip(decoded.channel(ch)) {
            assert!((a - b).abs() <= 1.0 / 32768.0, "{} vs {}", a, b);
        }
    }
}

#[test]
fn test_wav_clips_out_of_range_samples() {
    let loud = SampleBuffer::from_channels(vec![vec![2.0, -2.0, 0.0]], 8000).unwrap();
    let decoded = decode_bytes("loud.wav", &encode_wav(&loud).unwrap()).unwrap();

    assert_abs_diff_eq!(decoded.channel(0)[0], 1.0, epsilon = 1e-6);
    assert_abs_diff_eq!(decoded.channel(0)[1], -1.0, epsilon = 1e-6);
    assert_eq!(decoded.channel(0)[2], 0.0);
}

#[test]
fn test_mp3_unavailable_without_backend() {
    let tone = generate_test_tone(440.0, 0.05, 8000).unwrap();
    let err = ContainerEncoder::new().encode(&tone, ExportFormat::mp3()).unwrap_err();
    assert!(matches!(err, PitcherError::EncoderUnavailable { .. }));
}

// === Batch Export Tests ===

fn wav_job(name: &str, render_settings: &RenderSettings) -> ExportJob {
    let tone = generate_test_tone(440.0, 0.05, 8000).unwrap();
    ExportJob {
        file_name: name.to_string(),
        bytes: encode_wav(&tone).unwrap(),
        settings: render_settings.clone(),
        format: ExportFormat::Wav,
    }
}

#[test]
fn test_batch_second_job_failure() {
    let render_settings = settings(EqualizerBank::new(), 0.2, 8000);
    let mut broken = wav_job("second.wav", &render_settings);
    broken.bytes = vec![0u8; 64];
    let jobs = vec![
        wav_job("first.wav", &render_settings),
        broken,
        wav_job("third.wav", &render_settings),
    ];

    let err = BatchExporter::new(ContainerEncoder::new())
        .export_all(&jobs, |_| {})
        .unwrap_err();

    assert_eq!(err.file_name(), Some("second.wav"));
    assert_eq!(err.job_status(0), Some(JobStatus::NotDelivered));
    assert_eq!(err.job_status(1), Some(JobStatus::Failed));
    assert_eq!(err.job_status(2), Some(JobStatus::NotDelivered));
    assert_eq!(err.error_code(), "EXPORT_FAILED");
}

#[test]
fn test_batch_archive_contains_every_file() {
    let render_settings = settings(EqualizerBank::new(), 0.2, 8000);
    let jobs = vec![
        wav_job("a.flac", &render_settings),
        wav_job("b.ogg", &render_settings),
        wav_job("c.wav", &render_settings),
    ];

    let bundle = BatchExporter::new(ContainerEncoder::new())
        .export_all(&jobs, |_| {})
        .unwrap();
    let archive = bundle.archive.as_ref().unwrap();
    assert_eq!(archive.file_name, "processed_all.zip");

    let mut zip = zip::ZipArchive::new(Cursor::new(archive.bytes.clone())).unwrap();
    let names: Vec<String> = (0..zip.len())
        .map(|i| zip.by_index(i).unwrap().name().to_string())
        .collect();
    assert_eq!(names, vec!["a.wav", "b.wav", "c.wav"]);

    let mut inner = Vec::new();
    zip.by_name("b.wav").unwrap().read_to_end(&mut inner).unwrap();
    assert_eq!(inner, bundle.artifacts[1].bytes);
}

// === Session Tests ===

#[test]
fn test_session_snapshot_is_isolated() {
    let mut session = Session::new(ImpulseSynthesizer::seeded(1));
    session.set_band_gain(10, 3.0).unwrap();
    let snapshot = session.snapshot().unwrap();

    session.set_band_gain(10, -3.0).unwrap();
    session.set_reverb_mix(0.9).unwrap();

    assert_eq!(snapshot.eq_bank.band_gain(10).unwrap(), 3.0);
    assert_eq!(snapshot.reverb.mix, 0.0);
}

// === CLI Tests ===

#[test]
fn test_cli_render_with_preset() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("take.wav");
    let tone = generate_test_tone(220.0, 0.1, 8000).unwrap();
    std::fs::write(&input, encode_wav(&tone).unwrap()).unwrap();

    let preset = dir.path().join("preset.json");
    commands::preset(
        &preset,
        &EffectArgs {
            rate: Some(0.5),
            pre_roll: Some(0.25),
            ..EffectArgs::default()
        },
    )
    .unwrap();

    let out_dir = dir.path().join("out");
    let path = commands::render(&RenderOptions {
        inputs: vec![input],
        out_dir: out_dir.clone(),
        format: FormatArg::Wav,
        bitrate: 192,
        fallback_wav: false,
        seed: Some(5),
        effects: EffectArgs {
            preset: Some(preset),
            ..EffectArgs::default()
        },
    })
    .unwrap();

    let rendered = decode_file(&path).unwrap();
    assert_eq!(rendered.sample_rate(), 8000);
    assert_eq!(rendered.num_frames(), 2000 + 1600);
    assert!(rendered.channel(0)[..2000].iter().all(|&s| s == 0.0));
}
