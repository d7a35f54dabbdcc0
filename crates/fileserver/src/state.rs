//! The immutable set of files shared for one session

use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Reasons a requested path cannot be shared
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("no files to share")]
    Empty,
    #[error("file '{}' not found", .0.display())]
    NotFound(PathBuf),
    #[error("'{}' is not a file", .0.display())]
    NotAFile(PathBuf),
    #[error("failed to inspect '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A single validated file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedFile {
    /// Absolute path on disk
    pub path: PathBuf,
    /// Base name shown on the landing page and used inside the archive
    pub name: String,
    /// Size in bytes at validation time
    pub size: u64,
}

impl SharedFile {
    fn inspect(path: &Path) -> Result<Self, ValidationError> {
        let metadata = match std::fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ValidationError::NotFound(path.to_path_buf()));
            }
            Err(source) => {
                return Err(ValidationError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        if !metadata.is_file() {
            return Err(ValidationError::NotAFile(path.to_path_buf()));
        }

        let absolute = std::fs::canonicalize(path).map_err(|source| ValidationError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());

        Ok(Self {
            path: absolute,
            name,
            size: metadata.len(),
        })
    }
}

/// Ordered, read-only list of shared files
///
/// Cloning is cheap; every request handler holds the same underlying slice.
#[derive(Debug, Clone)]
pub struct SharedFileSet {
    files: Arc<[SharedFile]>,
}

impl SharedFileSet {
    /// Validate every path and build the set, preserving input order
    ///
    /// # Errors
    /// Fails on the first path that is missing or not a regular file,
    /// or when `paths` is empty.
    pub fn from_paths<I, P>(paths: I) -> Result<Self, ValidationError>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let files = paths
            .into_iter()
            .map(|p| SharedFile::inspect(p.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;

        if files.is_empty() {
            return Err(ValidationError::Empty);
        }

        Ok(Self {
            files: files.into(),
        })
    }

    pub fn files(&self) -> &[SharedFile] {
        &self.files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SharedFile> {
        self.files.iter()
    }

    /// Sum of all file sizes in bytes
    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }
}

/// Format file size in human-readable format
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

    if bytes == 0 {
        return "0 B".to_string();
    }

    let bytes = bytes as f64;
    let unit_index = (bytes.ln() / 1024_f64.ln()).floor() as usize;
    let unit_index = unit_index.min(UNITS.len() - 1);

    let size = bytes / 1024_f64.powi(unit_index as i32);
    format!("{:.1} {}", size, UNITS[unit_index])
}
