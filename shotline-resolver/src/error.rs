//! Error types for shotline-resolver.

use thiserror::Error;

/// Configuration-scoped failures. Every variant names what is missing or wrong.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolutionError {
    /// The step-root template failed to render or rendered to nothing.
    #[error("cannot render '{setting}': {reason}")]
    Template {
        setting: &'static str,
        reason: String,
    },

    /// Every level of an override chain was empty.
    #[error("no value configured for '{0}' (step, project and default are all empty)")]
    MissingSetting(String),

    #[error("unknown output format '{format}'")]
    UnknownFormat { format: String },

    #[error("frame {frame} is outside the shot range {start}-{end}")]
    FrameOutOfRange { frame: i64, start: i64, end: i64 },
}
