//! Error handling for Pitcher
//!
//! Every component fails fast with a typed error. Errors carry enough
//! context (file name, parameter, index) for the caller to show the user
//! which file or setting caused the failure.

use thiserror::Error;

/// Result type alias for Pitcher operations
pub type Result<T> = std::result::Result<T, PitcherError>;

/// Delivery status of one job in an aborted batch export
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    /// The job that caused the batch to abort
    Failed,
    /// Rendered or not, its output was discarded with the rest of the batch
    NotDelivered,
}

/// Main error type for Pitcher operations
#[derive(Error, Debug)]
pub enum PitcherError {
    // Input Errors
    #[error("Cannot decode '{file_name}': {reason}")]
    Decode {
        file_name: String,
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    // Render Errors
    #[error("Render error: {reason}")]
    Render { reason: String },

    #[error("Invalid parameter '{param}': {value} (expected {expected})")]
    InvalidParameter {
        param: String,
        value: String,
        expected: String,
    },

    #[error("EQ band index {index} out of range (0..{len})")]
    IndexOutOfRange { index: usize, len: usize },

    // Export Errors
    #[error("No {format} encoder available")]
    EncoderUnavailable { format: String },

    #[error("Encoding error: {reason}")]
    Encoding { reason: String },

    #[error("Archive error: {reason}")]
    Archive { reason: String },

    #[error("Export of '{file_name}' (job {} of {total_jobs}) failed: {source}", .job_index + 1)]
    ExportFailed {
        file_name: String,
        job_index: usize,
        total_jobs: usize,
        #[source]
        source: Box<PitcherError>,
    },

    #[error("Export cancelled after {completed} of {total} jobs")]
    Cancelled { completed: usize, total: usize },

    // I/O Errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization Errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PitcherError {
    /// Shorthand for a render error
    pub fn render(reason: impl Into<String>) -> Self {
        PitcherError::Render {
            reason: reason.into(),
        }
    }

    /// Get the error code for this error type
    pub fn error_code(&self) -> &'static str {
        match self {
            PitcherError::Decode { .. } => "DECODE_ERROR",
            PitcherError::Render { .. } => "RENDER_ERROR",
            PitcherError::InvalidParameter { .. } => "INVALID_PARAMETER",
            PitcherError::IndexOutOfRange { .. } => "INDEX_OUT_OF_RANGE",
            PitcherError::EncoderUnavailable { .. } => "ENCODER_UNAVAILABLE",
            PitcherError::Encoding { .. } => "ENCODING_ERROR",
            PitcherError::Archive { .. } => "ARCHIVE_ERROR",
            PitcherError::ExportFailed { .. } => "EXPORT_FAILED",
            PitcherError::Cancelled { .. } => "CANCELLED",
            PitcherError::Io(_) => "IO_ERROR",
            PitcherError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    /// Check if this error is recoverable
    ///
    /// A missing MP3 encoder can be worked around by exporting WAV, but only
    /// when the caller asks for it. A cancelled batch can simply be restarted.
    pub fn is_recoverable(&self) -> bool {
        match self {
            PitcherError::EncoderUnavailable { .. } => true,
            PitcherError::Cancelled { .. } => true,
            PitcherError::ExportFailed { source, .. } => source.is_recoverable(),
            _ => false,
        }
    }

    /// Name of the file this error is about, if any
    pub fn file_name(&self) -> Option<&str> {
        match self {
            PitcherError::Decode { file_name, .. } => Some(file_name),
            PitcherError::ExportFailed { file_name, .. } => Some(file_name),
            _ => None,
        }
    }

    /// Status of job `index` in the batch this error aborted
    ///
    /// Returns `None` for errors that did not come from a batch export or for
    /// an index outside the batch.
    pub fn job_status(&self, index: usize) -> Option<JobStatus> {
        match self {
            PitcherError::ExportFailed {
                job_index,
                total_jobs,
                ..
            } if index < *total_jobs => Some(if index == *job_index {
                JobStatus::Failed
            } else {
                JobStatus::NotDelivered
            }),
            PitcherError::Cancelled { total, .. } if index < *total => {
                Some(JobStatus::NotDelivered)
            }
            _ => None,
        }
    }

    /// Get recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            PitcherError::Decode { .. } => vec![
                "Check that the file plays in another application",
                "Try converting the file to WAV first",
            ],
            PitcherError::Render { .. } => vec![
                "Playback rate must be greater than zero",
                "The source must contain at least one sample",
            ],
            PitcherError::EncoderUnavailable { .. } => vec![
                "Build with the 'lame' feature to enable MP3 export",
                "Export as WAV instead (--format wav or --fallback-wav)",
            ],
            PitcherError::ExportFailed { source, .. } => source.recovery_suggestions(),
            PitcherError::Cancelled { .. } => vec!["Restart the export; no files were written"],
            _ => vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = PitcherError::IndexOutOfRange { index: 31, len: 31 };
        assert_eq!(err.error_code(), "INDEX_OUT_OF_RANGE");
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_encoder_unavailable_is_recoverable() {
        let err = PitcherError::EncoderUnavailable {
            format: "mp3".to_string(),
        };
        assert!(err.is_recoverable());
        assert!(!err.recovery_suggestions().is_empty());
    }

    #[test]
    fn test_export_failed_reports_file_and_statuses() {
        let err = PitcherError::ExportFailed {
            file_name: "b.wav".to_string(),
            job_index: 1,
            total_jobs: 3,
            source: Box::new(PitcherError::render("empty source")),
        };

        assert_eq!(err.file_name(), Some("b.wav"));
        assert!(err.to_string().contains("job 2 of 3"));
        assert_eq!(err.job_status(0), Some(JobStatus::NotDelivered));
        assert_eq!(err.job_status(1), Some(JobStatus::Failed));
        assert_eq!(err.job_status(2), Some(JobStatus::NotDelivered));
        assert_eq!(err.job_status(3), None);
    }
}
