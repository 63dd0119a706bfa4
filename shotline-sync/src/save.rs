//! Versioned saves of the working file.
//!
//! Every save backs the working file up as
//! `<step>/_versions/<base>_v{NNN}_{STATE}.<ext>` with a sidecar next to it.
//! The version number is recomputed from the folder on every save.

use std::path::{Path, PathBuf};

use shotline_core::{sidecar, Context, LayoutSettings, SidecarMeta, VersionEntry};
use shotline_resolver::version_file_name;

use crate::archive;
use crate::error::{io_err, SyncError};
use crate::versions;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedVersion {
    pub path: PathBuf,
    pub version: u32,
    pub state: String,
    pub sidecar: PathBuf,
    pub sha256: String,
}

/// `_versions` folder next to `working_file`.
pub fn versions_dir(working_file: &Path, layout: &LayoutSettings) -> PathBuf {
    working_file
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(&layout.versions_folder)
}

/// Back up `working_file` as the next version in its `_versions` folder.
pub fn save_version(
    working_file: &Path,
    ctx: &Context,
    layout: &LayoutSettings,
    state: &str,
    comment: &str,
) -> Result<SavedVersion, SyncError> {
    if !working_file.is_file() {
        return Err(io_err(
            working_file,
            std::io::Error::new(std::io::ErrorKind::NotFound, "working file does not exist"),
        ));
    }
    let folder = versions_dir(working_file, layout);
    let version = versions::next_version(&folder)?;
    let ext = working_file
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default();
    let dest = folder.join(version_file_name(ctx, version, Some(state), ext));

    let archived = archive::archive_copy(working_file, &dest)?;
    let mut meta = SidecarMeta::new(version, Some(state.to_string()), comment);
    meta.user = ctx.user.clone();
    meta.sha256 = Some(archived.sha256.clone());
    let sidecar = match sidecar::write(&archived.path, &meta) {
        Ok(path) => path,
        Err(err) => {
            let _ = std::fs::remove_file(&archived.path);
            return Err(err.into());
        }
    };

    tracing::info!(
        context = %ctx,
        version,
        state,
        path = %archived.path.display(),
        "version saved"
    );
    Ok(SavedVersion {
        path: archived.path,
        version,
        state: state.to_string(),
        sidecar,
        sha256: archived.sha256,
    })
}

/// Outcome of [`restore_version`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Restored {
    /// Backup of the working file taken before it was overwritten.
    pub backup: Option<SavedVersion>,
    pub restored_from: PathBuf,
    pub version: u32,
}

/// Replace the working file with `entry`, backing the current file up first.
///
/// The backup is saved under `state` with a comment naming the restored
/// version. A missing working file is simply recreated.
pub fn restore_version(
    entry: &VersionEntry,
    working_file: &Path,
    ctx: &Context,
    layout: &LayoutSettings,
    state: &str,
) -> Result<Restored, SyncError> {
    if !entry.path.is_file() {
        return Err(io_err(
            &entry.path,
            std::io::Error::new(std::io::ErrorKind::NotFound, "version file does not exist"),
        ));
    }

    let backup = if working_file.is_file() {
        let comment = format!("Backup before restoring v{:03}", entry.version);
        Some(save_version(working_file, ctx, layout, state, &comment)?)
    } else {
        None
    };

    archive::archive_copy(&entry.path, working_file)?;
    tracing::info!(
        context = %ctx,
        version = entry.version,
        from = %entry.path.display(),
        "version restored"
    );
    Ok(Restored {
        backup,
        restored_from: entry.path.clone(),
        version: entry.version,
    })
}
