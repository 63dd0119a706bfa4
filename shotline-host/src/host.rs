//! The capabilities the pipeline needs from an authoring application.
//!
//! Everything the publish workflow does to the open document goes through
//! [`HostApp`]; no concrete UI toolkit or scene graph leaks past it.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use shotline_core::{OutputKind, TechnicalSpec};

use crate::error::HostError;

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// Shared flag observed by long-running renders.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Anchors and renders
// ---------------------------------------------------------------------------

/// An output node as it currently exists in the open document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnchorNode {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<OutputKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codec: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, Value>,
    /// Set when the node is detached from the graph and would render nothing.
    #[serde(default)]
    pub disconnected: bool,
    /// Bypassed nodes render nothing until enabled.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub pass_through: bool,
}

impl AnchorNode {
    pub fn new(name: impl Into<String>, kind: OutputKind) -> Self {
        Self {
            name: name.into(),
            kind: Some(kind),
            path: None,
            format: None,
            codec: None,
            properties: BTreeMap::new(),
            disconnected: false,
            pass_through: false,
        }
    }
}

/// Node configuration pushed into the document before a render.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnchorConfig {
    pub path: PathBuf,
    pub format: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codec: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderJob {
    pub anchor: String,
    pub start_frame: i64,
    pub end_frame: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderStatus {
    Completed,
    Failed {
        exit_code: Option<i32>,
        message: String,
    },
    Cancelled,
}

/// What a render reported back: its status and the files it wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderOutcome {
    pub status: RenderStatus,
    pub written: Vec<PathBuf>,
}

impl RenderOutcome {
    pub fn completed(written: Vec<PathBuf>) -> Self {
        Self {
            status: RenderStatus::Completed,
            written,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == RenderStatus::Completed
    }
}

// ---------------------------------------------------------------------------
// Modal prompts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub title: String,
    pub message: String,
}

impl Prompt {
    pub fn new(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Prompt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.title, self.message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Choice {
    Continue,
    Cancel,
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

pub trait HostApp {
    /// Path of the open document, `None` when it was never saved.
    fn current_file(&self) -> Option<PathBuf>;

    /// Technical settings of the open document (resolution, rate, range).
    fn current_spec(&self) -> Option<TechnicalSpec>;

    fn anchors(&self) -> Vec<AnchorNode>;

    fn find_anchor(&self, name: &str) -> Option<AnchorNode> {
        self.anchors().into_iter().find(|anchor| anchor.name == name)
    }

    fn configure_anchor(&mut self, name: &str, config: &AnchorConfig) -> Result<(), HostError>;

    /// Add an output node named `name`. Existing nodes are left as they are.
    fn create_anchor(&mut self, name: &str, kind: OutputKind) -> Result<(), HostError>;

    fn set_pass_through(&mut self, name: &str, pass_through: bool) -> Result<(), HostError>;

    /// Push resolution, frame rate and frame range into the open document.
    fn apply_spec(&mut self, spec: &TechnicalSpec) -> Result<(), HostError>;

    /// Render `job` and block until it finishes, fails or `cancel` fires.
    fn render(&mut self, job: &RenderJob, cancel: &CancelToken) -> Result<RenderOutcome, HostError>;

    fn ask_user(&mut self, prompt: &Prompt) -> Choice;

    /// Flush the open document to its path.
    fn save_document(&mut self) -> Result<(), HostError> {
        Ok(())
    }
}
