//! Batch Export
//!
//! Decodes, renders and encodes a list of source files one after another.
//! The first failure aborts the batch: nothing is delivered, and the error
//! names the offending file. Cancellation is checked before each job.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, info, warn};

use super::archive::{build_archive, Artifact};
use super::encoder::{output_file_name, ContainerEncoder, ExportFormat};
use crate::engine::buffer::{calculate_peak, calculate_rms};
use crate::engine::io::decode_bytes;
use crate::engine::render::{OfflineRenderer, RenderRequest, RenderSettings};
use crate::error::{PitcherError, Result};

/// One source file to export
#[derive(Debug, Clone)]
pub struct ExportJob {
    /// Original file name, used for errors and output naming
    pub file_name: String,
    /// Encoded source file contents
    pub bytes: Vec<u8>,
    pub settings: RenderSettings,
    pub format: ExportFormat,
}

/// Progress after a finished job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportProgress {
    pub completed: usize,
    pub total: usize,
    /// Name of the artifact just produced
    pub file_name: String,
}

/// Cooperative cancellation flag shared with the exporter
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the batch to stop before its next job
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Everything a successful batch produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportBundle {
    /// One artifact per job, in job order
    pub artifacts: Vec<Artifact>,
    /// All artifacts zipped together, present when there was more than one job
    pub archive: Option<Artifact>,
}

impl ExportBundle {
    /// What to hand the user: the archive for a batch, else the single file
    pub fn primary(&self) -> Option<&Artifact> {
        self.archive.as_ref().or_else(|| self.artifacts.first())
    }
}

/// Runs export jobs sequentially
#[derive(Debug, Clone, Default)]
pub struct BatchExporter {
    renderer: OfflineRenderer,
    encoder: ContainerEncoder,
    cancel: CancellationToken,
    wav_fallback: bool,
}

impl BatchExporter {
    pub fn new(encoder: ContainerEncoder) -> Self {
        Self {
            encoder,
            ..Self::default()
        }
    }

    /// Use a caller-owned cancellation token
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Export WAV instead when MP3 is requested but no backend exists
    ///
    /// Off by default; without it such jobs fail with `EncoderUnavailable`.
    pub fn with_wav_fallback(mut self, enabled: bool) -> Self {
        self.wav_fallback = enabled;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Export every job in order
    ///
    /// `on_progress` is called after each completed job.
    ///
    /// # Errors
    /// * `ExportFailed` - a job failed; carries its file name, index and cause
    /// * `Cancelled` - the token was set before a job started
    /// * `Archive` - packaging the batch failed
    pub fn export_all<F>(&self, jobs: &[ExportJob], mut on_progress: F) -> Result<ExportBundle>
    where
        F: FnMut(&ExportProgress),
    {
        let total = jobs.len();
        let mut artifacts = Vec::with_capacity(total);
        let mut used_names = HashSet::new();

        for (index, job) in jobs.iter().enumerate() {
            if self.cancel.is_cancelled() {
                info!("Export cancelled after {} of {} jobs", index, total);
                return Err(PitcherError::Cancelled {
                    completed: index,
                    total,
                });
            }

            info!("Exporting {}/{}: '{}' as {}", index + 1, total, job.file_name, job.format);
            let artifact = self
                .export_one(job)
                .map_err(|source| PitcherError::ExportFailed {
                    file_name: job.file_name.clone(),
                    job_index: index,
                    total_jobs: total,
                    source: Box::new(source),
                })?;

            let artifact = Artifact {
                file_name: unique_name(&artifact.file_name, &mut used_names),
                ..artifact
            };

            on_progress(&ExportProgress {
                completed: index + 1,
                total,
                file_name: artifact.file_name.clone(),
            });
            artifacts.push(artifact);
        }

        let archive = if artifacts.len() > 1 {
            Some(build_archive(&artifacts)?)
        } else {
            None
        };

        Ok(ExportBundle { artifacts, archive })
    }

    fn export_one(&self, job: &ExportJob) -> Result<Artifact> {
        let source = decode_bytes(&job.file_name, &job.bytes)?;
        let rendered = self
            .renderer
            .render(&RenderRequest::new(source, job.settings.clone()))?;

        let peak = calculate_peak(rendered.buffer());
        if peak > 1.0 {
            warn!(
                "'{}' peaks at {:.2} (over full scale), samples will be clipped",
                job.file_name, peak
            );
        }
        debug!(
            "'{}' rendered: peak {:.3}, RMS {:.1} dB",
            job.file_name,
            peak,
            calculate_rms(rendered.buffer())
        );

        let (format, bytes) = match self.encoder.encode(rendered.buffer(), job.format) {
            Err(PitcherError::EncoderUnavailable { format }) if self.wav_fallback => {
                warn!("No {} encoder, exporting '{}' as WAV", format, job.file_name);
                (ExportFormat::Wav, self.encoder.encode(rendered.buffer(), ExportFormat::Wav)?)
            }
            result => (job.format, result?),
        };

        Ok(Artifact::new(output_file_name(&job.file_name, format), bytes))
    }
}

/// `name`, or `base (n).ext` if an earlier artifact already took it
fn unique_name(name: &str, used: &mut HashSet<String>) -> String {
    let mut candidate = name.to_string();
    let mut n = 2;
    while used.contains(&candidate) {
        candidate = match name.rsplit_once('.') {
            Some((base, ext)) => format!("{} ({}).{}", base, n, ext),
            None => format!("{} ({})", name, n),
        };
        n += 1;
    }
    used.insert(candidate.clone());
    candidate
}
