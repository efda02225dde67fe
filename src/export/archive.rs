//! Batch archive packaging
//!
//! Multi-file exports are bundled into one zip. Entries are stored without
//! recompression since WAV gains little and MP3 nothing.

use std::io::{Cursor, Write};

use log::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::{PitcherError, Result};

/// Fixed name of the batch archive
pub const ARCHIVE_NAME: &str = "processed_all.zip";

/// A named output file held in memory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl Artifact {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes,
        }
    }
}

fn archive_err(e: impl std::fmt::Display) -> PitcherError {
    PitcherError::Archive {
        reason: e.to_string(),
    }
}

/// Pack artifacts into a zip, one entry per artifact in order
pub fn build_archive(artifacts: &[Artifact]) -> Result<Artifact> {
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));

    for artifact in artifacts {
        zip.start_file(artifact.file_name.as_str(), options)
            .map_err(archive_err)?;
        zip.write_all(&artifact.bytes).map_err(archive_err)?;
    }

    let bytes = zip.finish().map_err(archive_err)?.into_inner();
    debug!("Archived {} entries into {} bytes", artifacts.len(), bytes.len());

    Ok(Artifact::new(ARCHIVE_NAME, bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Read;
    use zip::ZipArchive;

    #[test]
    fn test_archive_contains_entries_in_order() {
        let artifacts = vec![
            Artifact::new("a.wav", vec![1, 2, 3]),
            Artifact::new("b.wav", vec![4, 5]),
        ];
        let archive = build_archive(&artifacts).unwrap();
        assert_eq!(archive.file_name, "processed_all.zip");

        let mut reader = ZipArchive::new(Cursor::new(archive.bytes)).unwrap();
        assert_eq!(reader.len(), 2);

        for (i, expected) in artifacts.iter().enumerate() {
            let mut entry = reader.by_index(i).unwrap();
            assert_eq!(entry.name(), expected.file_name);
            let mut contents = Vec::new();
            entry.read_to_end(&mut contents).unwrap();
            assert_eq!(contents, expected.bytes);
        }
    }
}
