use std::path::PathBuf;

use thiserror::Error;

use crate::protocol::ResponseStatus;

/// Error surface for the daemon client, metadata cache and stand-in server.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The daemon could not be reached (connect refused, unresolvable host, connect timeout).
    #[error("cannot connect to daemon at {addr}: {source}")]
    Connection {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// No response within the call deadline. The connection is kept.
    #[error("daemon call '{cmd}' timed out after {timeout_ms} ms")]
    Timeout { cmd: String, timeout_ms: u64 },

    /// The connection dropped mid-call. The next call reconnects once.
    #[error("daemon connection lost: {reason}")]
    Disconnected { reason: String },

    /// Malformed or out-of-order frame. Scoped to one call.
    #[error("daemon protocol error: {0}")]
    Protocol(String),

    /// The daemon answered with a non-ok status.
    #[error("daemon returned {status} for '{cmd}': {message}")]
    Status {
        cmd: String,
        status: ResponseStatus,
        message: String,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to parse stub database at {path}: {source}")]
    Seed {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

impl DaemonError {
    /// Whether the daemon itself reported the record as missing.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            DaemonError::Status {
                status: ResponseStatus::NotFound,
                ..
            }
        )
    }

    /// Whether the failure is about reaching the daemon rather than about the request.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            DaemonError::Connection { .. }
                | DaemonError::Timeout { .. }
                | DaemonError::Disconnected { .. }
        )
    }
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DaemonError {
    DaemonError::Io {
        path: path.into(),
        source,
    }
}
