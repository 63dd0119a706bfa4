//! Domain types shared by every shotline crate.
//!
//! All path fields use `PathBuf`. Everything here is serializable so it can
//! travel over the daemon wire protocol or land in a sidecar file.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

macro_rules! id_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }
    };
}

id_newtype!(
    /// Short code of a production project (e.g. `PROJ`).
    ProjectId
);
id_newtype!(
    /// Short code of a shot (e.g. `SH010`).
    ShotId
);
id_newtype!(
    /// Short code of a production step (e.g. `COMP`).
    StepId
);

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// Immutable snapshot of what the artist is working on.
///
/// Resolved once from the open file or an explicit selection and then used as a
/// read-only key for every resolution and daemon call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Context {
    pub project: ProjectId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<String>,
    pub shot: ShotId,
    pub step: StepId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

impl Context {
    pub fn new(
        project: impl Into<ProjectId>,
        shot: impl Into<ShotId>,
        step: impl Into<StepId>,
    ) -> Self {
        Self {
            project: project.into(),
            sequence: None,
            shot: shot.into(),
            step: step.into(),
            user: None,
        }
    }

    pub fn with_sequence(mut self, sequence: impl Into<String>) -> Self {
        self.sequence = Some(sequence.into());
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// `PROJ/SH010`, the key under which shot-level metadata is cached.
    pub fn shot_key(&self) -> String {
        format!("{}/{}", self.project, self.shot)
    }

    /// `PROJ/SH010/COMP`, the key under which step-level metadata is cached.
    pub fn step_key(&self) -> String {
        format!("{}/{}/{}", self.project, self.shot, self.step)
    }

    /// Whether `other` belongs to the same project as `self`.
    pub fn same_project(&self, other: &Context) -> bool {
        self.project == other.project
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.sequence {
            Some(seq) => write!(f, "{}/{}/{}/{}", self.project, seq, self.shot, self.step),
            None => write!(f, "{}/{}/{}", self.project, self.shot, self.step),
        }
    }
}

// ---------------------------------------------------------------------------
// Technical spec
// ---------------------------------------------------------------------------

/// Technical settings of a shot. The daemon is the only writer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TechnicalSpec {
    pub width: u32,
    pub height: u32,
    #[serde(default = "default_pixel_aspect")]
    pub pixel_aspect: f64,
    pub fps: f64,
    pub start_frame: i64,
    pub end_frame: i64,
}

fn default_pixel_aspect() -> f64 {
    1.0
}

impl TechnicalSpec {
    /// Zero-padding width for frame numbers: the digit count of `end_frame`.
    ///
    /// A shot ending at 999 pads to 3 digits, one ending at 99999 to 5.
    pub fn frame_digits(&self) -> usize {
        self.end_frame.unsigned_abs().to_string().len()
    }

    /// Number of frames in the inclusive range, 0 for an inverted range.
    pub fn frame_count(&self) -> u64 {
        if self.end_frame < self.start_frame {
            0
        } else {
            (self.end_frame - self.start_frame) as u64 + 1
        }
    }

    pub fn contains_frame(&self, frame: i64) -> bool {
        (self.start_frame..=self.end_frame).contains(&frame)
    }
}

// ---------------------------------------------------------------------------
// Outputs
// ---------------------------------------------------------------------------

/// Which pre-configured output anchor a path is resolved for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    Preview,
    Final,
}

impl fmt::Display for OutputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputKind::Preview => write!(f, "preview"),
            OutputKind::Final => write!(f, "final"),
        }
    }
}

impl FromStr for OutputKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "preview" => Ok(Self::Preview),
            "final" | "publish" => Ok(Self::Final),
            other => Err(format!(
                "unknown output kind '{other}'; expected: preview, final"
            )),
        }
    }
}

/// A version number paired with the short state code active at publish time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionSlot {
    pub version: u32,
    pub state: String,
}

impl VersionSlot {
    pub fn new(version: u32, state: impl Into<String>) -> Self {
        Self {
            version,
            state: state.into(),
        }
    }

    /// `v003_WIP`
    pub fn folder_name(&self) -> String {
        format!("v{:03}_{}", self.version, self.state)
    }
}

/// Format / codec overrides set at one level of the override chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview_format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview_codec: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_codec: Option<String>,
}

impl FormatOverrides {
    pub fn format(&self, kind: OutputKind) -> Option<&str> {
        match kind {
            OutputKind::Preview => self.preview_format.as_deref(),
            OutputKind::Final => self.final_format.as_deref(),
        }
    }

    pub fn codec(&self, kind: OutputKind) -> Option<&str> {
        match kind {
            OutputKind::Preview => self.preview_codec.as_deref(),
            OutputKind::Final => self.final_codec.as_deref(),
        }
    }
}

/// Naming rules served by the daemon for a (project, step) pair.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamingRules {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_suffix: Option<String>,
    #[serde(default)]
    pub project: FormatOverrides,
    #[serde(default)]
    pub step: FormatOverrides,
}

// ---------------------------------------------------------------------------
// Versions and status
// ---------------------------------------------------------------------------

/// One version discovered by scanning a version or publish folder.
///
/// Never stored: entries are rebuilt from the folder on every query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionEntry {
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    pub path: PathBuf,
    pub modified: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<String>,
}

/// Status of a step as reported by the daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub state: String,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub completion: u8,
    #[serde(default)]
    pub published: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

impl StatusRecord {
    /// Whether this record reflects `update` having been applied.
    pub fn matches(&self, update: &StatusUpdate) -> bool {
        self.state == update.state
            && self.comment == update.comment
            && self.version == update.version
            && self.completion == update.completion
            && self.published == update.published
    }
}

/// A status change sent to the daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub state: String,
    pub comment: String,
    pub version: u32,
    pub completion: u8,
    pub published: bool,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
