//! Version discovery over publish and version folders.
//!
//! Nothing is cached here: every query rescans the folder and rebuilds the
//! typed entries, so a listing is never older than the call that produced it.
//! Ordering is numeric on the version number (`v9` before `v10`).

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use shotline_core::{sidecar, LayoutSettings, VersionEntry};
use shotline_host::parse_version_token;

use crate::error::{io_err, SyncError};

/// Version and optional state encoded in a folder or file name.
///
/// Accepts publish folders (`v003_WIP`, `v3`) and version files
/// (`PROJ_SH010_COMP_v003_WIP.comp`). The digit count is free.
pub fn parse_version_name(name: &str) -> Option<(u32, Option<String>)> {
    let stem = match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => name,
    };
    let tokens: Vec<&str> = stem.split('_').collect();
    let n = tokens.len();
    if let Some(version) = tokens.last().and_then(|t| parse_version_token(t)) {
        return Some((version, None));
    }
    if n >= 2 {
        if let Some(version) = parse_version_token(tokens[n - 2]) {
            let state = tokens[n - 1];
            if !state.is_empty() {
                return Some((version, Some(state.to_string())));
            }
        }
    }
    None
}

fn is_ignored(name: &str, path: &Path) -> bool {
    name.starts_with('.') || name.ends_with(".tmp") || sidecar::is_sidecar(path)
}

fn entry_for(path: PathBuf, version: u32, state: Option<String>) -> Result<VersionEntry, SyncError> {
    let meta = fs::metadata(&path).map_err(|e| io_err(&path, e))?;
    let modified: DateTime<Utc> = meta
        .modified()
        .map(DateTime::from)
        .unwrap_or_else(|_| Utc::now());

    let (comment, sources) = match sidecar::read(&path) {
        Ok(Some(meta)) => (
            Some(meta.comment).filter(|c| !c.is_empty()),
            meta.sources,
        ),
        Ok(None) => (None, Vec::new()),
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "ignoring unreadable sidecar");
            (None, Vec::new())
        }
    };

    Ok(VersionEntry {
        version,
        state,
        path,
        modified,
        comment,
        sources,
    })
}

/// Every recognizable version in `folder`, ordered by version number.
///
/// An absent folder is an empty listing, not an error.
pub fn list_versions(folder: &Path) -> Result<Vec<VersionEntry>, SyncError> {
    let read = match fs::read_dir(folder) {
        Ok(read) => read,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(io_err(folder, e)),
    };

    let mut entries = Vec::new();
    for item in read {
        let item = item.map_err(|e| io_err(folder, e))?;
        let path = item.path();
        let name = item.file_name().to_string_lossy().into_owned();
        if is_ignored(&name, &path) {
            continue;
        }
        let Some((version, state)) = parse_version_name(&name) else {
            tracing::debug!(name = %name, "skipping unrecognized entry");
            continue;
        };
        entries.push(entry_for(path, version, state)?);
    }

    entries.sort_by(|a, b| {
        a.version
            .cmp(&b.version)
            .then(a.modified.cmp(&b.modified))
            .then_with(|| a.path.cmp(&b.path))
    });
    Ok(entries)
}

/// Highest existing version plus one, or 1 for an absent or empty folder.
pub fn next_version(folder: &Path) -> Result<u32, SyncError> {
    let Some(max) = list_versions(folder)?.iter().map(|entry| entry.version).max() else {
        return Ok(1);
    };
    max.checked_add(1).ok_or_else(|| SyncError::VersionExhausted {
        folder: folder.to_path_buf(),
        highest: max,
    })
}

/// Highest version, optionally restricted to one state (compared case-insensitively).
pub fn latest(folder: &Path, state: Option<&str>) -> Result<Option<VersionEntry>, SyncError> {
    Ok(list_versions(folder)?
        .into_iter()
        .filter(|entry| match state {
            None => true,
            Some(wanted) => entry
                .state
                .as_deref()
                .is_some_and(|s| s.eq_ignore_ascii_case(wanted)),
        })
        .last())
}

/// Strictly older; a tie is never outdated.
pub fn is_outdated(source_version: u32, latest_version: u32) -> bool {
    source_version < latest_version
}

// ---------------------------------------------------------------------------
// Imported sources
// ---------------------------------------------------------------------------

/// An imported artifact that lives inside a publish folder.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceRef {
    pub path: PathBuf,
    /// The `_published` folder holding every version of the source.
    pub publish_root: PathBuf,
    pub version: u32,
    pub state: Option<String>,
}

impl SourceRef {
    /// Recognize `…/_published/v{N}_{STATE}/…` with the default folder name.
    pub fn from_path(path: &Path) -> Option<Self> {
        Self::from_path_in(path, &LayoutSettings::default().publish_folder)
    }

    pub fn from_path_in(path: &Path, publish_folder: &str) -> Option<Self> {
        for version_dir in path.ancestors().skip(1) {
            let Some(root) = version_dir.parent() else {
                break;
            };
            if root.file_name().and_then(|n| n.to_str()) != Some(publish_folder) {
                continue;
            }
            let name = version_dir.file_name()?.to_str()?;
            let (version, state) = parse_version_name(name)?;
            return Some(Self {
                path: path.to_path_buf(),
                publish_root: root.to_path_buf(),
                version,
                state,
            });
        }
        None
    }
}
