//! HTTP file server for a single sharing session
//!
//! Serves a landing page that lists the shared files and a `/download`
//! route that bundles them into one ZIP archive.

mod archive;
mod page;
mod server;
mod state;

pub use archive::{build_archive, Archive, ArchiveError, ARCHIVE_NAME};
pub use server::{BindError, FileServerApi, RunningServer, HEALTH_BODY};
pub use state::{format_size, SharedFile, SharedFileSet, ValidationError};
