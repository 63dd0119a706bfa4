use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by host integrations.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse scene manifest at {path}: {source}")]
    Manifest {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("no output anchor named '{name}' in the open document")]
    AnchorNotFound { name: String },

    #[error("anchor '{name}' is bypassed and would render nothing")]
    AnchorPassThrough { name: String },

    #[error("anchor '{name}' has no output path configured")]
    AnchorUnconfigured { name: String },

    #[error("no render command configured")]
    NoRenderCommand,

    #[error("render command '{command}' is invalid: {reason}")]
    RenderCommand { command: String, reason: String },

    #[error("render preset parse error at byte {position}: {message}")]
    Preset { position: usize, message: String },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> HostError {
    HostError::Io {
        path: path.into(),
        source,
    }
}
