//! Export Module
//!
//! Container encoding (WAV, MP3 through an injected backend), zip packaging
//! and the sequential batch coordinator.

pub mod archive;
pub mod batch;
pub mod encoder;

pub use archive::{build_archive, Artifact, ARCHIVE_NAME};
pub use batch::{BatchExporter, CancellationToken, ExportBundle, ExportJob, ExportProgress};
pub use encoder::{
    encode_wav, float_to_i16, output_file_name, ContainerEncoder, ExportFormat, Mp3Backend,
    Mp3BackendFactory, DEFAULT_BITRATE_KBPS, MP3_BLOCK_SIZE,
};
