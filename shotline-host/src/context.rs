//! Context detection from working-file names.
//!
//! Managed files are named `PROJ[_SEQ]_SHOT_STEP[_vNNN[_STATE]].ext`. The
//! underscore-separated stem is read right to left: an optional version and
//! state, then the step, the shot, an optional sequence and the project.

use std::path::Path;

use shotline_core::Context;

/// What a managed file name says about itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileIdentity {
    pub context: Context,
    pub version: Option<u32>,
    pub state: Option<String>,
    pub extension: Option<String>,
}

/// Forward slashes only; empty input stays empty.
pub fn normalize_path(path: &str) -> String {
    if path.trim().is_empty() {
        return String::new();
    }
    path.replace('\\', "/")
}

/// `v003` -> 3. Any digit count is accepted.
pub fn parse_version_token(token: &str) -> Option<u32> {
    let digits = token.strip_prefix('v').or_else(|| token.strip_prefix('V'))?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

fn is_state_token(token: &str) -> bool {
    !token.is_empty()
        && token
            .bytes()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
}

/// Parse the pipeline context out of a managed file path.
///
/// Returns `None` for names with fewer than three identifying tokens.
pub fn detect_context(path: &Path) -> Option<FileIdentity> {
    let normalized = normalize_path(&path.to_string_lossy());
    let file_name = normalized.rsplit('/').next()?;
    let (stem, extension) = match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext.to_string())),
        _ => (file_name, None),
    };

    let mut tokens: Vec<&str> = stem.split('_').collect();
    if tokens.iter().any(|t| t.is_empty()) {
        return None;
    }

    let mut version = None;
    let mut state = None;
    let n = tokens.len();
    if n >= 2 && parse_version_token(tokens[n - 2]).is_some() && is_state_token(tokens[n - 1]) {
        version = parse_version_token(tokens[n - 2]);
        state = Some(tokens[n - 1].to_string());
        tokens.truncate(n - 2);
    } else if let Some(v) = tokens.last().and_then(|t| parse_version_token(t)) {
        version = Some(v);
        tokens.pop();
    }

    let context = match tokens.as_slice() {
        [project, shot, step] => Context::new(*project, *shot, *step),
        [project, sequence, shot, step] => {
            Context::new(*project, *shot, *step).with_sequence(*sequence)
        }
        _ => return None,
    };

    Some(FileIdentity {
        context,
        version,
        state,
        extension,
    })
}

/// Outcome of comparing a file's project against the active one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectCheck {
    Matches,
    Mismatch { active: String, file: String },
    /// The file name carries no recognizable context.
    Unmanaged,
}

impl ProjectCheck {
    pub fn is_mismatch(&self) -> bool {
        matches!(self, ProjectCheck::Mismatch { .. })
    }

    /// Text for the modal prompt shown before working on a foreign file.
    pub fn warning(&self) -> Option<String> {
        match self {
            ProjectCheck::Mismatch { active, file } => Some(format!(
                "PROJECT MISMATCH: this file belongs to '{file}' but the active project is '{active}'"
            )),
            _ => None,
        }
    }
}

pub fn check_project(active: &Context, file: &Path) -> ProjectCheck {
    match detect_context(file) {
        Some(identity) if active.same_project(&identity.context) => ProjectCheck::Matches,
        Some(identity) => ProjectCheck::Mismatch {
            active: active.project.to_string(),
            file: identity.context.project.to_string(),
        },
        None => ProjectCheck::Unmanaged,
    }
}
