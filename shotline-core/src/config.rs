//! Pipeline configuration file.
//!
//! # Storage layout
//!
//! ```text
//! ~/.shotline/
//!   config.yaml   (mode 0600, optional; built-in defaults when absent)
//! ```
//!
//! # API pattern
//!
//! Every function has two forms:
//! - `fn_at(home: &Path, …)`: explicit home; used in tests with `TempDir`
//! - `fn(…)`: derives home from `dirs::home_dir()`, delegates to `_at`
//!
//! Tests must NEVER call the no-arg wrappers; always use `_at`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{io_err, CoreError};
use crate::types::OutputKind;

/// Documented default port of the production daemon.
pub const DEFAULT_DAEMON_PORT: u16 = 18185;

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// Where the production daemon listens and how long calls may block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonSettings {
    pub host: String,
    pub port: u16,
    pub timeout_ms: u64,
    pub connect_timeout_ms: u64,
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_DAEMON_PORT,
            timeout_ms: 3_000,
            connect_timeout_ms: 2_000,
        }
    }
}

impl DaemonSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Metadata cache lifetimes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub ttl_secs: u64,
    pub coalesce_window_ms: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl_secs: 60,
            coalesce_window_ms: 5_000,
        }
    }
}

impl CacheSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn coalesce_window(&self) -> Duration {
        Duration::from_millis(self.coalesce_window_ms)
    }
}

/// On-disk folder layout of a production.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutSettings {
    pub projects_root: PathBuf,
    /// Tera template for a step root; sees `root`, `project`, `sequence`, `shot`, `step`.
    pub step_root_template: String,
    pub preview_folder: String,
    pub publish_folder: String,
    pub versions_folder: String,
}

impl Default for LayoutSettings {
    fn default() -> Self {
        Self {
            projects_root: PathBuf::from("/productions"),
            step_root_template: "{{ root }}/{{ project }}/shots/{% if sequence %}{{ sequence }}/{% endif %}{{ shot }}/{{ step }}".to_string(),
            preview_folder: "_preview".to_string(),
            publish_folder: "_published".to_string(),
            versions_folder: "_versions".to_string(),
        }
    }
}

/// Hardcoded tail of the format / codec override chain.
///
/// A studio may blank these out so that a missing step or project setting
/// surfaces as a configuration error instead of a silent default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputDefaults {
    pub preview_format: String,
    pub preview_codec: String,
    pub final_format: String,
    pub final_codec: String,
}

impl Default for OutputDefaults {
    fn default() -> Self {
        Self {
            preview_format: "QuickTimeMovies".to_string(),
            preview_codec: "Apple ProRes 422_apcn".to_string(),
            final_format: "OpenEXRFormat".to_string(),
            final_codec: String::new(),
        }
    }
}

impl OutputDefaults {
    pub fn format(&self, kind: OutputKind) -> &str {
        match kind {
            OutputKind::Preview => &self.preview_format,
            OutputKind::Final => &self.final_format,
        }
    }

    pub fn codec(&self, kind: OutputKind) -> &str {
        match kind {
            OutputKind::Preview => &self.preview_codec,
            OutputKind::Final => &self.final_codec,
        }
    }
}

/// Node names of the output anchors inside the host document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnchorNames {
    pub preview: String,
    #[serde(rename = "final")]
    pub final_: String,
}

impl Default for AnchorNames {
    fn default() -> Self {
        Self {
            preview: "_PREVIEW".to_string(),
            final_: "_FINAL".to_string(),
        }
    }
}

impl AnchorNames {
    pub fn name(&self, kind: OutputKind) -> &str {
        match kind {
            OutputKind::Preview => &self.preview,
            OutputKind::Final => &self.final_,
        }
    }
}

/// Root of `~/.shotline/config.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShotlineConfig {
    pub daemon: DaemonSettings,
    pub cache: CacheSettings,
    pub layout: LayoutSettings,
    pub outputs: OutputDefaults,
    pub anchors: AnchorNames,
}

// ---------------------------------------------------------------------------
// 1. Path helpers
// ---------------------------------------------------------------------------

/// `<home>/.shotline/`
pub fn config_dir_at(home: &Path) -> PathBuf {
    home.join(".shotline")
}

/// `<home>/.shotline/config.yaml`, pure, no I/O.
pub fn config_path_at(home: &Path) -> PathBuf {
    config_dir_at(home).join("config.yaml")
}

// ---------------------------------------------------------------------------
// 2. Load
// ---------------------------------------------------------------------------

/// Load the config from `<home>/.shotline/config.yaml`.
///
/// A missing file yields [`ShotlineConfig::default`]; a malformed one is
/// `CoreError::Parse` with path and line context.
pub fn load_at(home: &Path) -> Result<ShotlineConfig, CoreError> {
    let path = config_path_at(home);
    if !path.exists() {
        return Ok(ShotlineConfig::default());
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    if contents.trim().is_empty() {
        return Ok(ShotlineConfig::default());
    }
    serde_yaml::from_str(&contents).map_err(|source| CoreError::Parse { path, source })
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<ShotlineConfig, CoreError> {
    load_at(&home()?)
}

// ---------------------------------------------------------------------------
// 3. Save (atomic)
// ---------------------------------------------------------------------------

/// Atomically save the config to `<home>/.shotline/config.yaml`.
///
/// Write flow: serialize, `.yaml.tmp` sibling, `chmod 0600`, `rename`.
pub fn save_at(home: &Path, config: &ShotlineConfig) -> Result<(), CoreError> {
    let dir = config_dir_at(home);
    if !dir.exists() {
        std::fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        set_dir_permissions(&dir)?;
    }
    let path = config_path_at(home);
    let tmp_path = path.with_file_name("config.yaml.tmp");

    let yaml = serde_yaml::to_string(config)?;
    std::fs::write(&tmp_path, yaml).map_err(|e| io_err(&tmp_path, e))?;
    set_file_permissions(&tmp_path)?;
    std::fs::rename(&tmp_path, &path).map_err(|e| io_err(&path, e))?;
    Ok(())
}

/// `save_at` convenience wrapper.
pub fn save(config: &ShotlineConfig) -> Result<(), CoreError> {
    save_at(&home()?, config)
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn home() -> Result<PathBuf, CoreError> {
    dirs::home_dir().ok_or(CoreError::HomeNotFound)
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), CoreError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), CoreError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), CoreError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), CoreError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
