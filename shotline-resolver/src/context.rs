//! Template context for the step-root template.

use std::path::Path;

use serde::Serialize;

use shotline_core::Context;

/// Variables visible to `layout.step_root_template`.
#[derive(Debug, Clone, Serialize)]
pub struct LayoutContext {
    pub root: String,
    pub project: String,
    pub sequence: Option<String>,
    pub shot: String,
    pub step: String,
    pub user: Option<String>,
}

impl LayoutContext {
    pub fn new(root: &Path, ctx: &Context) -> Self {
        Self {
            root: root.to_string_lossy().trim_end_matches('/').to_string(),
            project: ctx.project.to_string(),
            sequence: ctx.sequence.clone(),
            shot: ctx.shot.to_string(),
            step: ctx.step.to_string(),
            user: ctx.user.clone(),
        }
    }

    pub fn to_tera_context(&self) -> Result<tera::Context, tera::Error> {
        tera::Context::from_serialize(self)
    }
}
