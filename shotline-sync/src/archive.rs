//! Verified atomic copies.
//!
//! ## `archive_copy` protocol
//!
//! 1. Hash the source with SHA-256.
//! 2. Create the destination folder.
//! 3. Copy to `<dest>.tmp`.
//! 4. Hash the temporary copy and compare; a mismatch removes it.
//! 5. Rename to the final path (atomic on POSIX).

use std::fs;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::{io_err, SyncError};

/// A file copied into place and verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivedFile {
    pub path: PathBuf,
    pub sha256: String,
    pub bytes: u64,
}

pub fn sha256_file(path: &Path) -> Result<String, SyncError> {
    let data = fs::read(path).map_err(|e| io_err(path, e))?;
    let mut hasher = Sha256::new();
    hasher.update(&data);
    Ok(hex::encode(hasher.finalize()))
}

pub(crate) fn tmp_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    dest.with_file_name(name)
}

/// Copy `src` to `dest` through a verified temporary.
pub fn archive_copy(src: &Path, dest: &Path) -> Result<ArchivedFile, SyncError> {
    archive_copy_with_tmp(src, dest, &tmp_path(dest))
}

fn archive_copy_with_tmp(src: &Path, dest: &Path, tmp: &Path) -> Result<ArchivedFile, SyncError> {
    let expected = sha256_file(src)?;

    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    let bytes = fs::copy(src, tmp).map_err(|e| {
        let _ = fs::remove_file(tmp);
        io_err(tmp, e)
    })?;

    let actual = sha256_file(tmp)?;
    if actual != expected {
        let _ = fs::remove_file(tmp);
        return Err(SyncError::Checksum {
            path: dest.to_path_buf(),
            expected,
            actual,
        });
    }

    if let Err(e) = fs::rename(tmp, dest) {
        let _ = fs::remove_file(tmp);
        return Err(io_err(dest, e));
    }

    tracing::info!(src = %src.display(), dest = %dest.display(), bytes, "archived");
    Ok(ArchivedFile {
        path: dest.to_path_buf(),
        sha256: actual,
        bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn copy_is_verified_and_tmp_is_gone() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("scene.comp");
        fs::write(&src, "composition").unwrap();
        let dest = dir.path().join("_published").join("v001_WIP").join("scene_v001.comp");

        let archived = archive_copy(&src, &dest).unwrap();
        assert_eq!(fs::read_to_string(&dest).unwrap(), "composition");
        assert_eq!(archived.sha256, sha256_file(&src).unwrap());
        assert_eq!(archived.bytes, 11);
        assert!(!tmp_path(&dest).exists());
    }

    #[test]
    fn missing_source_names_the_path() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("absent.comp");
        let err = archive_copy(&src, &dir.path().join("out.comp")).unwrap_err();
        match err {
            SyncError::Io { path, .. } => assert_eq!(path, src),
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn known_digest() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("abc");
        fs::write(&path, "abc").unwrap();
        assert_eq!(
            sha256_file(&path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    #[cfg(unix)]
    fn rename_failure_leaves_destination_and_cleans_tmp() {
        use std::os::unix::fs::PermissionsExt;

        let root = TempDir::new().unwrap();
        let src = root.path().join("scene.comp");
        fs::write(&src, "new content").unwrap();

        let readonly_dir = root.path().join("readonly");
        fs::create_dir_all(&readonly_dir).unwrap();
        let dest = readonly_dir.join("scene_v001.comp");
        fs::write(&dest, "original").unwrap();

        let mut perms = fs::metadata(&readonly_dir).unwrap().permissions();
        perms.set_mode(0o555);
        fs::set_permissions(&readonly_dir, perms).unwrap();

        let tmp_dir = TempDir::new().unwrap();
        let tmp = tmp_dir.path().join("scene_v001.comp.tmp");
        let result = archive_copy_with_tmp(&src, &dest, &tmp);

        let mut perms = fs::metadata(&readonly_dir).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&readonly_dir, perms).unwrap();

        if result.is_err() {
            assert_eq!(fs::read_to_string(&dest).unwrap(), "original");
            assert!(!tmp.exists(), "temporary copy should be cleaned up");
        }
    }
}
