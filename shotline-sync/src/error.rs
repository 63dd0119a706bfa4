//! Error types for shotline-sync.

use std::path::PathBuf;

use thiserror::Error;

use shotline_core::CoreError;
use shotline_daemon::DaemonError;
use shotline_host::HostError;
use shotline_resolver::ResolutionError;

use crate::publish::{RenderFailure, ValidationError};

/// All errors that can arise from version management and publishing.
#[derive(Debug, Error)]
pub enum SyncError {
    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("path resolution failed: {0}")]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Daemon(#[from] DaemonError),

    #[error("host error: {0}")]
    Host(#[from] HostError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Render(#[from] RenderFailure),

    /// The artist declined to publish on top of outdated imports.
    #[error("publish cancelled: {} imported source(s) are outdated", sources.len())]
    StaleSources { sources: Vec<PathBuf> },

    /// The copy on disk does not hash to what was read from the source.
    #[error("checksum mismatch for {path}: expected {expected}, got {actual}")]
    Checksum {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("{path} belongs to another project than '{project}'")]
    ProjectMismatch { path: PathBuf, project: String },

    #[error("no version number left after v{highest} in {folder}")]
    VersionExhausted { folder: PathBuf, highest: u32 },

    #[error("the open document has never been saved")]
    NoWorkingFile,

    #[error("the host reported no technical settings for the open document")]
    NoHostSpec,

    #[error("output anchor '{name}' does not exist in the open document")]
    AnchorMissing { name: String },

    #[error("output anchor '{name}' is not connected to anything")]
    AnchorDisconnected { name: String },
}

impl SyncError {
    /// Whether retrying can succeed without the artist changing anything.
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::Daemon(e) if e.is_connectivity())
    }
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}
