//! JSON metadata written next to every managed artifact.
//!
//! ```text
//! _published/v003_WIP/                  -> _published/v003_WIP/_version.meta.json
//! _versions/PROJ_SH010_COMP_v003_WIP.nk -> _versions/PROJ_SH010_COMP_v003_WIP.nk.meta.json
//! ```
//!
//! A missing sidecar means "metadata unknown", never an error.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{io_err, CoreError};

/// Suffix shared by every sidecar file.
pub const SIDECAR_SUFFIX: &str = ".meta.json";

/// File name of the sidecar inside a version folder.
pub const FOLDER_SIDECAR: &str = "_version.meta.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SidecarMeta {
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default)]
    pub comment: String,
    /// Published upstream folders this artifact was built from.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    pub written_at: DateTime<Utc>,
    /// Hex SHA-256 of the archived file, when one was archived.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

impl SidecarMeta {
    pub fn new(version: u32, state: Option<String>, comment: impl Into<String>) -> Self {
        Self {
            version,
            state,
            comment: comment.into(),
            sources: Vec::new(),
            user: None,
            written_at: Utc::now(),
            sha256: None,
        }
    }
}

/// Where the sidecar of `artifact` lives. Pure, no I/O beyond `is_dir`.
pub fn sidecar_path(artifact: &Path) -> PathBuf {
    if artifact.is_dir() {
        return artifact.join(FOLDER_SIDECAR);
    }
    let mut name = artifact
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(SIDECAR_SUFFIX);
    artifact.with_file_name(name)
}

/// Whether `path` is itself a sidecar file.
pub fn is_sidecar(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.ends_with(SIDECAR_SUFFIX))
}

/// Read the sidecar of `artifact`. `Ok(None)` when there is none.
pub fn read(artifact: &Path) -> Result<Option<SidecarMeta>, CoreError> {
    let path = sidecar_path(artifact);
    let contents = match std::fs::read_to_string(&path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(io_err(&path, e)),
    };
    serde_json::from_str(&contents)
        .map(Some)
        .map_err(|source| CoreError::Sidecar { path, source })
}

/// Atomically write the sidecar of `artifact` and return its path.
pub fn write(artifact: &Path, meta: &SidecarMeta) -> Result<PathBuf, CoreError> {
    let path = sidecar_path(artifact);
    let json = serde_json::to_string_pretty(meta).map_err(|source| CoreError::Sidecar {
        path: path.clone(),
        source,
    })?;
    let mut tmp_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);
    std::fs::write(&tmp_path, json).map_err(|e| io_err(&tmp_path, e))?;
    std::fs::rename(&tmp_path, &path).map_err(|e| io_err(&path, e))?;
    Ok(path)
}
