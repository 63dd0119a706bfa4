//! Stale-source detection for the active document.
//!
//! Recomputation is driven by context events (open, save, switch) only. The
//! UI refresh tick reads [`StalenessMonitor::current`], which never touches
//! the disk. Per publish root the monitor remembers the folder mtime and the
//! latest version it found; a root whose mtime has not moved is not rescanned.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};

use shotline_core::LayoutSettings;

use crate::error::{io_err, SyncError};
use crate::versions::{self, SourceRef};

/// What happened to the active file context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextEvent {
    Opened,
    Saved,
    Switched,
}

/// One imported source with a newer published version available.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaleSource {
    pub source: SourceRef,
    pub latest_version: u32,
    pub latest_state: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StalenessReport {
    pub active_file: Option<PathBuf>,
    pub stale: Vec<StaleSource>,
    /// Sources recognized as published artifacts and checked.
    pub checked: usize,
    pub computed_at: Option<DateTime<Utc>>,
}

impl StalenessReport {
    pub fn is_clean(&self) -> bool {
        self.stale.is_empty()
    }
}

#[derive(Debug, Clone)]
struct FolderScan {
    mtime: Option<SystemTime>,
    latest: Option<(u32, Option<String>)>,
}

#[derive(Debug)]
pub struct StalenessMonitor {
    publish_folder: String,
    report: StalenessReport,
    folders: HashMap<PathBuf, FolderScan>,
    scans: usize,
}

impl Default for StalenessMonitor {
    fn default() -> Self {
        Self::for_layout(&LayoutSettings::default())
    }
}

fn folder_mtime(folder: &Path) -> Result<Option<SystemTime>, SyncError> {
    match fs::metadata(folder) {
        Ok(meta) => Ok(meta.modified().ok()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(io_err(folder, e)),
    }
}

impl StalenessMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recognize sources by the publish folder name `layout` configures.
    pub fn for_layout(layout: &LayoutSettings) -> Self {
        Self {
            publish_folder: layout.publish_folder.clone(),
            report: StalenessReport::default(),
            folders: HashMap::new(),
            scans: 0,
        }
    }

    /// The last computed report. Free to call on every refresh tick.
    pub fn current(&self) -> &StalenessReport {
        &self.report
    }

    /// Number of folder scans performed so far.
    pub fn scan_count(&self) -> usize {
        self.scans
    }

    /// Recompute the report after the active file context changed.
    ///
    /// `sources` are the paths the active document imports. Paths that do not
    /// live inside a publish folder are ignored.
    pub fn on_context_event(
        &mut self,
        event: ContextEvent,
        active_file: Option<&Path>,
        sources: &[PathBuf],
    ) -> Result<&StalenessReport, SyncError> {
        if event == ContextEvent::Switched
            && self.report.active_file.as_deref() != active_file
        {
            tracing::debug!("active file switched, dropping folder cache");
            self.folders.clear();
        }

        let mut stale = Vec::new();
        let mut checked = 0;
        for path in sources {
            let Some(source) = SourceRef::from_path_in(path, &self.publish_folder) else {
                continue;
            };
            checked += 1;
            if let Some((latest_version, latest_state)) = self.latest_in(&source.publish_root)? {
                if versions::is_outdated(source.version, latest_version) {
                    stale.push(StaleSource {
                        source,
                        latest_version,
                        latest_state,
                    });
                }
            }
        }

        tracing::info!(
            event = ?event,
            checked,
            stale = stale.len(),
            "staleness recomputed"
        );
        self.report = StalenessReport {
            active_file: active_file.map(Path::to_path_buf),
            stale,
            checked,
            computed_at: Some(Utc::now()),
        };
        Ok(&self.report)
    }

    fn latest_in(&mut self, root: &Path) -> Result<Option<(u32, Option<String>)>, SyncError> {
        let mtime = folder_mtime(root)?;
        if let Some(scan) = self.folders.get(root) {
            if mtime.is_some() && scan.mtime == mtime {
                return Ok(scan.latest.clone());
            }
        }

        self.scans += 1;
        let latest = versions::latest(root, None)?.map(|entry| (entry.version, entry.state));
        self.folders.insert(
            root.to_path_buf(),
            FolderScan {
                mtime,
                latest: latest.clone(),
            },
        );
        Ok(latest)
    }
}
