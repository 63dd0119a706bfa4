//! Deterministic path resolution for previews, publishes and working files.
//!
//! # Layout
//!
//! ```text
//! {step_root}/
//!   PROJ_SH010_COMP.nk                               working file
//!   _versions/PROJ_SH010_COMP_v004_WIP.nk            versioned saves
//!   _preview/PROJ_SH010_COMP_vfx.mov                 preview anchor
//!   _published/v003_WIP/PROJ_SH010_COMP_vfx.001.exr  final anchor
//! ```
//!
//! No I/O happens here: every result is a pure function of the layout
//! settings, the context, the technical spec and the naming rules.

use std::path::PathBuf;

use tera::Tera;

use shotline_core::{
    Context, LayoutSettings, NamingRules, OutputDefaults, OutputKind, TechnicalSpec, VersionSlot,
};

use crate::context::LayoutContext;
use crate::error::ResolutionError;
use crate::formats::{self, FormatInfo};
use crate::frames::SequencePattern;

const STEP_ROOT_SETTING: &str = "layout.step_root_template";

/// Format, codec and extension chosen for one output anchor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFormat {
    pub format: String,
    /// Only set for movie containers.
    pub codec: Option<String>,
    pub extension: String,
    pub movie: bool,
}

/// Where one output anchor writes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputTarget {
    /// Single-file container.
    Movie(PathBuf),
    /// One file per frame inside `folder`.
    Sequence {
        folder: PathBuf,
        pattern: SequencePattern,
    },
}

impl OutputTarget {
    /// Path to put on the render node: the movie file or the hash pattern.
    pub fn node_path(&self) -> PathBuf {
        match self {
            OutputTarget::Movie(path) => path.clone(),
            OutputTarget::Sequence { folder, pattern } => folder.join(pattern.hash_form()),
        }
    }

    pub fn folder(&self) -> PathBuf {
        match self {
            OutputTarget::Movie(path) => path
                .parent()
                .map(PathBuf::from)
                .unwrap_or_default(),
            OutputTarget::Sequence { folder, .. } => folder.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PathResolver {
    layout: LayoutSettings,
    defaults: OutputDefaults,
}

impl PathResolver {
    pub fn new(layout: &LayoutSettings, defaults: &OutputDefaults) -> Self {
        Self {
            layout: layout.clone(),
            defaults: defaults.clone(),
        }
    }

    pub fn layout(&self) -> &LayoutSettings {
        &self.layout
    }

    // -----------------------------------------------------------------------
    // Folders
    // -----------------------------------------------------------------------

    pub fn step_root(&self, ctx: &Context) -> Result<PathBuf, ResolutionError> {
        let template_err = |reason: String| ResolutionError::Template {
            setting: STEP_ROOT_SETTING,
            reason,
        };
        let tera_ctx = LayoutContext::new(&self.layout.projects_root, ctx)
            .to_tera_context()
            .map_err(|err| template_err(describe(&err)))?;
        let rendered = Tera::one_off(&self.layout.step_root_template, &tera_ctx, false)
            .map_err(|err| template_err(describe(&err)))?;
        let rendered = rendered.trim();
        if rendered.is_empty() {
            return Err(template_err("template rendered an empty path".to_string()));
        }
        Ok(PathBuf::from(rendered))
    }

    pub fn preview_folder(&self, ctx: &Context) -> Result<PathBuf, ResolutionError> {
        Ok(self.step_root(ctx)?.join(&self.layout.preview_folder))
    }

    /// Root holding every `v{NNN}_{STATE}` publish folder of the step.
    pub fn publish_root(&self, ctx: &Context) -> Result<PathBuf, ResolutionError> {
        Ok(self.step_root(ctx)?.join(&self.layout.publish_folder))
    }

    /// `{step_root}/_published/v003_WIP`
    pub fn publish_folder(
        &self,
        ctx: &Context,
        slot: &VersionSlot,
    ) -> Result<PathBuf, ResolutionError> {
        Ok(self.publish_root(ctx)?.join(slot.folder_name()))
    }

    pub fn versions_folder(&self, ctx: &Context) -> Result<PathBuf, ResolutionError> {
        Ok(self.step_root(ctx)?.join(&self.layout.versions_folder))
    }

    /// `{step_root}/PROJ_SH010_COMP.{ext}`
    pub fn working_file(&self, ctx: &Context, ext: &str) -> Result<PathBuf, ResolutionError> {
        let ext = formats::sanitize_extension(ext);
        Ok(self
            .step_root(ctx)?
            .join(format!("{}.{ext}", context_base(ctx))))
    }

    pub fn output_folder(
        &self,
        ctx: &Context,
        kind: OutputKind,
        slot: &VersionSlot,
    ) -> Result<PathBuf, ResolutionError> {
        match kind {
            OutputKind::Preview => self.preview_folder(ctx),
            OutputKind::Final => self.publish_folder(ctx, slot),
        }
    }

    // -----------------------------------------------------------------------
    // Names and formats
    // -----------------------------------------------------------------------

    /// `{project}[_{sequence}]_{shot}_{step}[_{client_suffix}]`
    pub fn output_base(&self, ctx: &Context, rules: &NamingRules) -> String {
        let mut base = context_base(ctx);
        if let Some(suffix) = rules
            .client_suffix
            .as_deref()
            .map(clean_component)
            .filter(|s| !s.is_empty())
        {
            base.push('_');
            base.push_str(suffix);
        }
        base
    }

    /// Walk the override chain step > project > default for `kind`.
    pub fn output_format(
        &self,
        kind: OutputKind,
        rules: &NamingRules,
    ) -> Result<ResolvedFormat, ResolutionError> {
        let format = first_non_empty([
            rules.step.format(kind),
            rules.project.format(kind),
            Some(self.defaults.format(kind)),
        ])
        .ok_or_else(|| ResolutionError::MissingSetting(format!("outputs.{kind}_format")))?;
        let info: &FormatInfo = formats::require(format)?;

        let codec = if info.movie {
            let codec = first_non_empty([
                rules.step.codec(kind),
                rules.project.codec(kind),
                Some(self.defaults.codec(kind)),
            ])
            .ok_or_else(|| ResolutionError::MissingSetting(format!("outputs.{kind}_codec")))?;
            Some(codec.to_string())
        } else {
            None
        };

        Ok(ResolvedFormat {
            format: info.id.to_string(),
            codec,
            extension: formats::sanitize_extension(info.extension).to_string(),
            movie: info.movie,
        })
    }

    pub fn sequence_pattern(
        &self,
        ctx: &Context,
        spec: &TechnicalSpec,
        rules: &NamingRules,
        kind: OutputKind,
    ) -> Result<SequencePattern, ResolutionError> {
        let format = self.output_format(kind, rules)?;
        Ok(SequencePattern::new(
            &self.output_base(ctx, rules),
            &format.extension,
            spec.frame_digits(),
        ))
    }

    // -----------------------------------------------------------------------
    // Resolution
    // -----------------------------------------------------------------------

    pub fn output_target(
        &self,
        ctx: &Context,
        spec: &TechnicalSpec,
        rules: &NamingRules,
        kind: OutputKind,
        slot: &VersionSlot,
    ) -> Result<OutputTarget, ResolutionError> {
        let format = self.output_format(kind, rules)?;
        let folder = self.output_folder(ctx, kind, slot)?;
        let base = self.output_base(ctx, rules);
        if format.movie {
            return Ok(OutputTarget::Movie(
                folder.join(format!("{base}.{}", format.extension)),
            ));
        }
        Ok(OutputTarget::Sequence {
            folder,
            pattern: SequencePattern::new(&base, &format.extension, spec.frame_digits()),
        })
    }

    /// Concrete path for one frame, or the node path when `frame` is `None`.
    ///
    /// Movie containers ignore `frame`. The preview kind ignores `slot`.
    pub fn resolve(
        &self,
        ctx: &Context,
        spec: &TechnicalSpec,
        rules: &NamingRules,
        kind: OutputKind,
        slot: &VersionSlot,
        frame: Option<i64>,
    ) -> Result<PathBuf, ResolutionError> {
        match self.output_target(ctx, spec, rules, kind, slot)? {
            OutputTarget::Movie(path) => Ok(path),
            OutputTarget::Sequence { folder, pattern } => match frame {
                None => Ok(folder.join(pattern.hash_form())),
                Some(frame) => {
                    check_frame(spec, frame)?;
                    Ok(folder.join(pattern.file_name(frame)))
                }
            },
        }
    }

    /// Every file a complete render of `kind` must produce.
    pub fn expected_outputs(
        &self,
        ctx: &Context,
        spec: &TechnicalSpec,
        rules: &NamingRules,
        kind: OutputKind,
        slot: &VersionSlot,
    ) -> Result<Vec<PathBuf>, ResolutionError> {
        Ok(match self.output_target(ctx, spec, rules, kind, slot)? {
            OutputTarget::Movie(path) => vec![path],
            OutputTarget::Sequence { folder, pattern } => (spec.start_frame..=spec.end_frame)
                .map(|frame| folder.join(pattern.file_name(frame)))
                .collect(),
        })
    }
}

/// `{project}[_{sequence}]_{shot}_{step}`, the name shared by working and version files.
pub fn context_base(ctx: &Context) -> String {
    let mut parts = vec![clean_component(ctx.project.as_str())];
    if let Some(sequence) = ctx.sequence.as_deref().map(clean_component) {
        if !sequence.is_empty() {
            parts.push(sequence);
        }
    }
    parts.push(clean_component(ctx.shot.as_str()));
    parts.push(clean_component(ctx.step.as_str()));
    parts.join("_")
}

/// `PROJ_SH010_COMP_v004_WIP.nk`
pub fn version_file_name(ctx: &Context, version: u32, state: Option<&str>, ext: &str) -> String {
    let ext = formats::sanitize_extension(ext);
    match state.map(clean_component).filter(|s| !s.is_empty()) {
        Some(state) => format!("{}_v{version:03}_{state}.{ext}", context_base(ctx)),
        None => format!("{}_v{version:03}.{ext}", context_base(ctx)),
    }
}

pub fn check_frame(spec: &TechnicalSpec, frame: i64) -> Result<(), ResolutionError> {
    if spec.contains_frame(frame) {
        Ok(())
    } else {
        Err(ResolutionError::FrameOutOfRange {
            frame,
            start: spec.start_frame,
            end: spec.end_frame,
        })
    }
}

fn first_non_empty<'a>(chain: [Option<&'a str>; 3]) -> Option<&'a str> {
    chain
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|value| !value.is_empty())
}

fn clean_component(raw: &str) -> &str {
    raw.trim().trim_matches('.')
}

fn describe(err: &tera::Error) -> String {
    let mut message = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(inner) = source {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        source = std::error::Error::source(inner);
    }
    message
}
