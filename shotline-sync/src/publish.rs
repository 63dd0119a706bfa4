//! The publish transaction.
//!
//! ```text
//! Idle -> Validating -> Rendering -> Archiving -> Registering -> Committed
//!    \________\____________\___________\______________\-> Failed(stage)
//! ```
//!
//! The work of each transition runs while the machine still sits in the
//! previous state. `Failed(s)` names the state that could not be reached:
//! a spec mismatch is `Failed(Validating)`, a missing anchor
//! `Failed(Rendering)`, a failed or cancelled render `Failed(Archiving)`, an
//! archive I/O error `Failed(Registering)` and a rejected status update
//! `Failed(Committed)`.
//!
//! The production database is written exactly once, in the last transition.
//! Every local artifact created along the way is recorded as a rollback
//! action and removed when the attempt fails. A status write that loses its
//! reply is settled by re-reading the status: a landed write commits, an
//! absent one rolls back, and an unreadable one keeps the artifacts.

use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use shotline_core::{
    sidecar, AnchorNames, Context, OutputKind, SidecarMeta, StatusUpdate, TechnicalSpec,
    VersionSlot,
};
use shotline_host::{
    check_project, AnchorConfig, CancelToken, Choice, HostApp, Prompt, RenderJob, RenderPreset,
};
use shotline_resolver::{version_file_name, PathResolver};

use crate::archive;
use crate::db::{naming_rules_or_default, ProductionDb};
use crate::error::{io_err, SyncError};
use crate::render::{check_outcome, ready_anchor, render_anchor, verify_outputs};
use crate::versions::{self, SourceRef};

// ---------------------------------------------------------------------------
// States
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Stage {
    Validating,
    Rendering,
    Archiving,
    Registering,
    Committed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PublishState {
    Idle,
    Validating,
    Rendering,
    Archiving,
    Registering,
    Committed,
    Failed(Stage),
}

impl From<Stage> for PublishState {
    fn from(stage: Stage) -> Self {
        match stage {
            Stage::Validating => PublishState::Validating,
            Stage::Rendering => PublishState::Rendering,
            Stage::Archiving => PublishState::Archiving,
            Stage::Registering => PublishState::Registering,
            Stage::Committed => PublishState::Committed,
        }
    }
}

impl fmt::Display for PublishState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublishState::Failed(stage) => write!(f, "Failed({stage})"),
            other => fmt::Debug::fmt(other, f),
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SpecField {
    Resolution,
    FrameRate,
    FrameRange,
}

impl fmt::Display for SpecField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SpecField::Resolution => "Resolution",
            SpecField::FrameRate => "Frame Rate",
            SpecField::FrameRange => "Frame Range",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldMismatch {
    pub field: SpecField,
    pub expected: String,
    pub actual: String,
}

impl fmt::Display for FieldMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} Mismatch: expected {}, got {}",
            self.field, self.expected, self.actual
        )
    }
}

/// The open document disagrees with the production database.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("technical settings differ from the production database in {} field(s)", .mismatches.len())]
pub struct ValidationError {
    pub mismatches: Vec<FieldMismatch>,
}

const FPS_TOLERANCE: f64 = 1e-3;

/// Field-by-field comparison of the database spec against the document's.
pub fn compare_specs(expected: &TechnicalSpec, actual: &TechnicalSpec) -> Vec<FieldMismatch> {
    let mut mismatches = Vec::new();
    if (expected.width, expected.height) != (actual.width, actual.height) {
        mismatches.push(FieldMismatch {
            field: SpecField::Resolution,
            expected: format!("{}x{}", expected.width, expected.height),
            actual: format!("{}x{}", actual.width, actual.height),
        });
    }
    if (expected.fps - actual.fps).abs() > FPS_TOLERANCE {
        mismatches.push(FieldMismatch {
            field: SpecField::FrameRate,
            expected: expected.fps.to_string(),
            actual: actual.fps.to_string(),
        });
    }
    if (expected.start_frame, expected.end_frame) != (actual.start_frame, actual.end_frame) {
        mismatches.push(FieldMismatch {
            field: SpecField::FrameRange,
            expected: format!("{}-{}", expected.start_frame, expected.end_frame),
            actual: format!("{}-{}", actual.start_frame, actual.end_frame),
        });
    }
    mismatches
}

// ---------------------------------------------------------------------------
// Render failures
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderFailure {
    #[error("render was cancelled")]
    Cancelled,

    #[error("render failed (exit code {exit_code:?}): {message}")]
    Exited {
        exit_code: Option<i32>,
        message: String,
    },

    #[error("render incomplete: {} missing and {} empty file(s)", .missing.len(), .empty.len())]
    Incomplete {
        missing: Vec<PathBuf>,
        empty: Vec<PathBuf>,
    },
}

// ---------------------------------------------------------------------------
// Request and report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub context: Context,
    /// Short state code recorded with the version (`WIP`, `OK`, ...).
    pub state: String,
    pub comment: String,
    pub completion: u8,
    /// Files the document imports; checked for newer published versions.
    pub sources: Vec<PathBuf>,
    /// Saver settings to apply instead of the resolved defaults.
    pub preset: Option<RenderPreset>,
}

impl PublishRequest {
    pub fn new(context: Context, state: impl Into<String>) -> Self {
        Self {
            context,
            state: state.into(),
            comment: String::new(),
            completion: 100,
            sources: Vec::new(),
            preset: None,
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }

    pub fn with_completion(mut self, completion: u8) -> Self {
        self.completion = completion.min(100);
        self
    }

    pub fn with_sources(mut self, sources: Vec<PathBuf>) -> Self {
        self.sources = sources;
        self
    }

    pub fn with_preset(mut self, preset: RenderPreset) -> Self {
        self.preset = Some(preset);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageRecord {
    pub state: PublishState,
    pub at: DateTime<Utc>,
}

/// Final state of a publish attempt plus everything needed to explain it.
#[derive(Debug)]
pub struct PublishReport {
    pub state: PublishState,
    /// Version the attempt used (or would have used).
    pub version: Option<u32>,
    pub stage_log: Vec<StageRecord>,
    pub diagnostics: Vec<String>,
    pub error: Option<SyncError>,
    /// Local artifacts still on disk after a failure: what the rollback could
    /// not remove, or everything when the commit outcome is unknown.
    pub residual_artifacts: Vec<PathBuf>,
    pub outputs: Vec<PathBuf>,
    pub archived: Option<PathBuf>,
}

impl PublishReport {
    pub fn is_committed(&self) -> bool {
        self.state == PublishState::Committed
    }

    pub fn failed_stage(&self) -> Option<Stage> {
        match self.state {
            PublishState::Failed(stage) => Some(stage),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Attempt bookkeeping
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum Rollback {
    RemoveDir(PathBuf),
    RemoveFile(PathBuf),
}

struct Attempt {
    state: PublishState,
    log: Vec<StageRecord>,
    diagnostics: Vec<String>,
    rollback: Vec<Rollback>,
    version: Option<u32>,
    outputs: Vec<PathBuf>,
    archived: Option<PathBuf>,
}

impl Attempt {
    fn new() -> Self {
        Self {
            state: PublishState::Idle,
            log: vec![StageRecord {
                state: PublishState::Idle,
                at: Utc::now(),
            }],
            diagnostics: Vec::new(),
            rollback: Vec::new(),
            version: None,
            outputs: Vec::new(),
            archived: None,
        }
    }

    fn enter(&mut self, state: impl Into<PublishState>) {
        let state = state.into();
        tracing::info!(from = %self.state, to = %state, "publish transition");
        self.state = state;
        self.log.push(StageRecord {
            state,
            at: Utc::now(),
        });
    }

    fn fail(mut self, stage: Stage, error: SyncError) -> PublishReport {
        tracing::warn!(stage = %stage, error = %error, "publish failed");
        self.diagnostics.push(format!("{stage}: {error}"));
        self.enter(PublishState::Failed(stage));
        let residual = self.roll_back();
        self.into_report(Some(error), residual)
    }

    /// Failure whose remote outcome cannot be established. Nothing is rolled
    /// back, so the artifacts stay consistent with a write that may have landed.
    fn fail_unknown(
        mut self,
        stage: Stage,
        error: SyncError,
        reread: &shotline_daemon::DaemonError,
    ) -> PublishReport {
        tracing::error!(stage = %stage, error = %error, reread = %reread, "publish outcome unknown");
        self.diagnostics.push(format!("{stage}: {error}"));
        self.diagnostics.push(format!(
            "outcome unknown, artifacts kept: status could not be re-read ({reread})"
        ));
        self.enter(PublishState::Failed(stage));
        let kept = self
            .rollback
            .drain(..)
            .map(|action| match action {
                Rollback::RemoveDir(path) | Rollback::RemoveFile(path) => path,
            })
            .filter(|path| path.exists())
            .collect();
        self.into_report(Some(error), kept)
    }

    /// Undo local side effects, newest first. Returns what is still on disk.
    fn roll_back(&mut self) -> Vec<PathBuf> {
        let mut residual = Vec::new();
        while let Some(action) = self.rollback.pop() {
            let (path, result) = match &action {
                Rollback::RemoveDir(path) => (path, fs::remove_dir_all(path)),
                Rollback::RemoveFile(path) => (path, fs::remove_file(path)),
            };
            match result {
                Ok(()) => tracing::info!(path = %path.display(), "rolled back"),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "rollback failed");
                    residual.push(path.clone());
                }
            }
        }
        // An older action may have removed what a newer one could not.
        residual.retain(|path| path.exists());
        residual
    }

    fn into_report(self, error: Option<SyncError>, residual: Vec<PathBuf>) -> PublishReport {
        PublishReport {
            state: self.state,
            version: self.version,
            stage_log: self.log,
            diagnostics: self.diagnostics,
            error,
            residual_artifacts: residual,
            outputs: self.outputs,
            archived: self.archived,
        }
    }
}

struct Validated {
    working_file: PathBuf,
    spec: TechnicalSpec,
}

struct Prepared {
    slot: VersionSlot,
    folder: PathBuf,
    anchor: String,
    expected: Vec<PathBuf>,
}

// ---------------------------------------------------------------------------
// Publisher
// ---------------------------------------------------------------------------

pub struct Publisher {
    resolver: PathResolver,
    anchors: AnchorNames,
}

impl Publisher {
    pub fn new(resolver: PathResolver, anchors: AnchorNames) -> Self {
        Self { resolver, anchors }
    }

    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    pub fn anchors(&self) -> &AnchorNames {
        &self.anchors
    }

    /// Run one publish attempt to completion or to its failed state.
    ///
    /// Safe to re-run after a failure: the version is recomputed from disk.
    pub fn publish<D, H>(
        &self,
        db: &D,
        host: &mut H,
        request: &PublishRequest,
        cancel: &CancelToken,
    ) -> PublishReport
    where
        D: ProductionDb + ?Sized,
        H: HostApp + ?Sized,
    {
        let ctx = &request.context;
        tracing::info!(context = %ctx, state = %request.state, "publish started");
        let mut attempt = Attempt::new();

        let validated = match self.validate(db, host, request, &mut attempt) {
            Ok(validated) => validated,
            Err(e) => return attempt.fail(Stage::Validating, e),
        };
        attempt.enter(Stage::Validating);

        let prepared = match self.prepare(db, host, request, &validated, &mut attempt) {
            Ok(prepared) => prepared,
            Err(e) => return attempt.fail(Stage::Rendering, e),
        };
        attempt.enter(Stage::Rendering);

        if let Err(e) = render(host, &validated, &prepared, cancel, &mut attempt) {
            return attempt.fail(Stage::Archiving, e);
        }
        attempt.enter(Stage::Archiving);

        if let Err(e) = archive_working_file(host, request, &validated, &prepared, &mut attempt) {
            return attempt.fail(Stage::Registering, e);
        }
        attempt.enter(Stage::Registering);

        let update = StatusUpdate {
            state: request.state.clone(),
            comment: request.comment.clone(),
            version: prepared.slot.version,
            completion: request.completion,
            published: true,
        };
        if let Err(e) = db.update_status(ctx, &update) {
            if !e.is_connectivity() {
                return attempt.fail(Stage::Committed, e.into());
            }
            // The reply was lost, not necessarily the write.
            match db.status(ctx) {
                Ok(record) if record.matches(&update) => {
                    tracing::warn!(context = %ctx, error = %e, "status write landed despite the lost reply");
                    attempt
                        .diagnostics
                        .push(format!("status write confirmed after a lost reply: {e}"));
                }
                Ok(_) => return attempt.fail(Stage::Committed, e.into()),
                Err(reread) => return attempt.fail_unknown(Stage::Committed, e.into(), &reread),
            }
        }
        attempt.enter(Stage::Committed);

        tracing::info!(
            context = %ctx,
            version = prepared.slot.version,
            folder = %prepared.folder.display(),
            "publish committed"
        );
        attempt.into_report(None, Vec::new())
    }

    /// Idle -> Validating.
    fn validate<D, H>(
        &self,
        db: &D,
        host: &mut H,
        request: &PublishRequest,
        attempt: &mut Attempt,
    ) -> Result<Validated, SyncError>
    where
        D: ProductionDb + ?Sized,
        H: HostApp + ?Sized,
    {
        let ctx = &request.context;
        let working_file = host
            .current_file()
            .filter(|path| path.is_file())
            .ok_or(SyncError::NoWorkingFile)?;

        let project = check_project(ctx, &working_file);
        if let Some(warning) = project.warning() {
            attempt.diagnostics.push(warning.clone());
            if host.ask_user(&Prompt::new("Project mismatch", warning)) == Choice::Cancel {
                return Err(SyncError::ProjectMismatch {
                    path: working_file,
                    project: ctx.project.to_string(),
                });
            }
        }

        let spec = db.technical_spec(ctx)?;
        let actual = host.current_spec().ok_or(SyncError::NoHostSpec)?;
        let mismatches = compare_specs(&spec, &actual);
        if !mismatches.is_empty() {
            attempt
                .diagnostics
                .extend(mismatches.iter().map(ToString::to_string));
            return Err(ValidationError { mismatches }.into());
        }

        let stale = self.stale_sources(&request.sources)?;
        if !stale.is_empty() {
            for (source, latest) in &stale {
                attempt.diagnostics.push(format!(
                    "Outdated source: {} (v{:03}, latest v{latest:03})",
                    source.path.display(),
                    source.version
                ));
            }
            let prompt = Prompt::new(
                "Outdated sources",
                format!(
                    "{} imported source(s) have newer published versions. Publish anyway?",
                    stale.len()
                ),
            );
            if host.ask_user(&prompt) == Choice::Cancel {
                return Err(SyncError::StaleSources {
                    sources: stale.into_iter().map(|(s, _)| s.path).collect(),
                });
            }
        }

        Ok(Validated { working_file, spec })
    }

    fn stale_sources(&self, sources: &[PathBuf]) -> Result<Vec<(SourceRef, u32)>, SyncError> {
        let publish_folder = &self.resolver.layout().publish_folder;
        let mut stale = Vec::new();
        for path in sources {
            let Some(source) = SourceRef::from_path_in(path, publish_folder) else {
                continue;
            };
            if let Some(latest) = versions::latest(&source.publish_root, None)? {
                if versions::is_outdated(source.version, latest.version) {
                    stale.push((source, latest.version));
                }
            }
        }
        Ok(stale)
    }

    /// Validating -> Rendering: anchor check, version folder, node setup.
    fn prepare<D, H>(
        &self,
        db: &D,
        host: &mut H,
        request: &PublishRequest,
        validated: &Validated,
        attempt: &mut Attempt,
    ) -> Result<Prepared, SyncError>
    where
        D: ProductionDb + ?Sized,
        H: HostApp + ?Sized,
    {
        let ctx = &request.context;
        let anchor_name = self.anchors.name(OutputKind::Final).to_string();
        ready_anchor(host, &anchor_name)?;
        let rules = naming_rules_or_default(db, ctx, &mut attempt.diagnostics)?;

        let publish_root = self.resolver.publish_root(ctx)?;
        let version = versions::next_version(&publish_root)?;
        attempt.version = Some(version);
        let slot = VersionSlot::new(version, request.state.clone());

        let spec = &validated.spec;
        let format = self.resolver.output_format(OutputKind::Final, &rules)?;
        let target = self
            .resolver
            .output_target(ctx, spec, &rules, OutputKind::Final, &slot)?;
        let expected = self
            .resolver
            .expected_outputs(ctx, spec, &rules, OutputKind::Final, &slot)?;

        let folder = self.resolver.publish_folder(ctx, &slot)?;
        fs::create_dir_all(&folder).map_err(|e| io_err(&folder, e))?;
        attempt.rollback.push(Rollback::RemoveDir(folder.clone()));

        let node_path = target.node_path();
        let config = match &request.preset {
            Some(preset) if preset.format == format.format => preset.to_anchor_config(&node_path),
            Some(preset) => {
                attempt.diagnostics.push(format!(
                    "preset format {} ignored, the step resolves to {}",
                    preset.format, format.format
                ));
                default_config(node_path, &format)
            }
            None => default_config(node_path, &format),
        };
        host.configure_anchor(&anchor_name, &config)?;

        Ok(Prepared {
            slot,
            folder,
            anchor: anchor_name,
            expected,
        })
    }
}

pub(crate) fn default_config(
    path: PathBuf,
    format: &shotline_resolver::ResolvedFormat,
) -> AnchorConfig {
    AnchorConfig {
        path,
        format: format.format.clone(),
        codec: format.codec.clone(),
        properties: Default::default(),
    }
}

/// Rendering -> Archiving: run the render and verify every expected file.
fn render<H: HostApp + ?Sized>(
    host: &mut H,
    validated: &Validated,
    prepared: &Prepared,
    cancel: &CancelToken,
    attempt: &mut Attempt,
) -> Result<(), SyncError> {
    if cancel.is_cancelled() {
        return Err(RenderFailure::Cancelled.into());
    }
    let job = RenderJob {
        anchor: prepared.anchor.clone(),
        start_frame: validated.spec.start_frame,
        end_frame: validated.spec.end_frame,
    };
    let outcome = render_anchor(host, &job, cancel)?;
    for path in &outcome.written {
        if !path.starts_with(&prepared.folder) {
            attempt.rollback.push(Rollback::RemoveFile(path.clone()));
        }
    }

    check_outcome(&outcome, cancel)?;
    if let Err(failure) = verify_outputs(&prepared.expected) {
        for path in failure.bad_outputs() {
            attempt
                .diagnostics
                .push(format!("bad render output: {}", path.display()));
        }
        return Err(failure.into());
    }

    attempt.outputs = prepared.expected.clone();
    Ok(())
}

/// Archiving -> Registering: versioned copy of the working file plus sidecar.
fn archive_working_file<H: HostApp + ?Sized>(
    host: &mut H,
    request: &PublishRequest,
    validated: &Validated,
    prepared: &Prepared,
    attempt: &mut Attempt,
) -> Result<(), SyncError> {
    host.save_document()?;

    let ext = validated
        .working_file
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default();
    let dest = prepared.folder.join(version_file_name(
        &request.context,
        prepared.slot.version,
        Some(&prepared.slot.state),
        ext,
    ));
    attempt.rollback.push(Rollback::RemoveFile(dest.clone()));
    let archived = archive::archive_copy(&validated.working_file, &dest)?;

    let mut meta = SidecarMeta::new(
        prepared.slot.version,
        Some(prepared.slot.state.clone()),
        request.comment.clone(),
    );
    meta.sources = request.sources.iter().map(|p| display(p)).collect();
    meta.user = request.context.user.clone();
    meta.sha256 = Some(archived.sha256);
    sidecar::write(&prepared.folder, &meta)?;

    attempt.archived = Some(archived.path);
    Ok(())
}

fn display(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Commit a status change without publishing anything.
pub fn update_status_only<D: ProductionDb + ?Sized>(
    db: &D,
    ctx: &Context,
    update: &StatusUpdate,
) -> Result<(), SyncError> {
    db.update_status(ctx, update)?;
    tracing::info!(context = %ctx, state = %update.state, "status updated without publish");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(width: u32, fps: f64, end: i64) -> TechnicalSpec {
        TechnicalSpec {
            width,
            height: 1080,
            pixel_aspect: 1.0,
            fps,
            start_frame: 1,
            end_frame: end,
        }
    }

    #[test]
    fn identical_specs_have_no_mismatch() {
        assert!(compare_specs(&spec(1920, 24.0, 120), &spec(1920, 24.0, 120)).is_empty());
        assert!(compare_specs(&spec(1920, 23.976, 120), &spec(1920, 23.9761, 120)).is_empty());
    }

    #[test]
    fn mismatches_are_itemized() {
        let found = compare_specs(&spec(1920, 24.0, 120), &spec(2048, 25.0, 100));
        let fields: Vec<SpecField> = found.iter().map(|m| m.field).collect();
        assert_eq!(
            fields,
            vec![SpecField::Resolution, SpecField::FrameRate, SpecField::FrameRange]
        );
        assert_eq!(
            found[0].to_string(),
            "Resolution Mismatch: expected 1920x1080, got 2048x1080"
        );
        assert_eq!(
            found[2].to_string(),
            "Frame Range Mismatch: expected 1-120, got 1-100"
        );
    }

    #[test]
    fn failed_state_display() {
        assert_eq!(
            PublishState::Failed(Stage::Archiving).to_string(),
            "Failed(Archiving)"
        );
        assert_eq!(PublishState::Committed.to_string(), "Committed");
    }

    #[test]
    fn completion_is_clamped() {
        let request = PublishRequest::new(Context::new("P", "S", "C"), "WIP").with_completion(140);
        assert_eq!(request.completion, 100);
    }
}
