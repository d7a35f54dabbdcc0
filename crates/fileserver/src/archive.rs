//! In-memory ZIP archive of the shared files

use std::collections::HashSet;
use std::io::{Cursor, Write};
use std::path::Path;

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::state::SharedFile;

/// File name offered to the browser for the download
pub const ARCHIVE_NAME: &str = "files.zip";

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A finished archive
#[derive(Debug)]
pub struct Archive {
    pub bytes: Vec<u8>,
    /// Number of entries written
    pub entries: usize,
    /// Inputs that could not be read and were left out
    pub skipped: usize,
}

/// Build a ZIP containing every readable file, flattened to base names
///
/// Each input is read fully before its entry is started, so an unreadable
/// file never leaves a truncated entry behind.
pub fn build_archive(files: &[SharedFile]) -> Result<Archive, ArchiveError> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut names = HashSet::new();
    let mut entries = 0;
    let mut skipped = 0;

    for file in files {
        let data = match std::fs::read(&file.path) {
            Ok(data) => data,
            Err(err) => {
                tracing::warn!(
                    path = %file.path.display(),
                    error = %err,
                    "skipping unreadable file in archive"
                );
                skipped += 1;
                continue;
            }
        };

        let entry_name = unique_entry_name(&file.name, &mut names);
        writer.start_file(entry_name, options)?;
        writer.write_all(&data)?;
        entries += 1;
    }

    let bytes = writer.finish()?.into_inner();

    Ok(Archive {
        bytes,
        entries,
        skipped,
    })
}

fn unique_entry_name(wanted: &str, names: &mut HashSet<String>) -> String {
    if names.insert(wanted.to_string()) {
        return wanted.to_string();
    }

    let path = Path::new(wanted);
    let stem = path.file_stem().and_then(|x| x.to_str()).unwrap_or("file");
    let ext = path.extension().and_then(|x| x.to_str());

    let mut idx = 2usize;
    loop {
        let candidate = match ext {
            Some(ext) if !ext.is_empty() => format!("{}-{}.{}", stem, idx, ext),
            _ => format!("{}-{}", stem, idx),
        };
        if names.insert(candidate.clone()) {
            return candidate;
        }
        idx += 1;
    }
}
