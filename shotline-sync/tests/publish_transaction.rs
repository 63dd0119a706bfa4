use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tempfile::TempDir;

use shotline_core::{
    AnchorNames, CacheSettings, Context, DaemonSettings, LayoutSettings, NamingRules,
    OutputDefaults, OutputKind, ProjectId, StatusRecord, StatusUpdate, StepId, TechnicalSpec,
};
use shotline_daemon::{
    DaemonClient, DaemonError, MetadataCache, Production, StubDatabase, StubHandle, StubOptions,
};
use shotline_host::{
    AnchorConfig, AnchorNode, CancelToken, Choice, HostApp, HostError, Prompt, RenderJob,
    RenderOutcome, RenderStatus,
};
use shotline_resolver::PathResolver;
use shotline_sync::{
    list_versions, ProductionDb, PublishRequest, PublishState, Publisher, RenderFailure, Stage,
    SyncError,
};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn shot_spec() -> TechnicalSpec {
    TechnicalSpec {
        width: 1920,
        height: 1080,
        pixel_aspect: 1.0,
        fps: 24.0,
        start_frame: 1,
        end_frame: 120,
    }
}

fn initial_status() -> StatusRecord {
    StatusRecord {
        state: "WIP".into(),
        comment: "in progress".into(),
        version: 0,
        completion: 10,
        published: false,
        user: None,
    }
}

fn stub(options: StubOptions) -> StubHandle {
    let db = StubDatabase::default()
        .with_user("ana")
        .with_states(&["WIP", "REV", "OK"])
        .with_spec("PROJ", "SH010", shot_spec())
        .with_naming(
            "PROJ",
            "COMP",
            NamingRules {
                client_suffix: Some("vfx".into()),
                ..NamingRules::default()
            },
        )
        .with_status("PROJ", "SH010", "COMP", initial_status());
    StubHandle::spawn(db, options).expect("stub daemon")
}

fn ctx() -> Context {
    Context::new("PROJ", "SH010", "COMP").with_user("ana")
}

struct Studio {
    root: TempDir,
    publisher: Publisher,
}

impl Studio {
    fn new() -> Self {
        let root = TempDir::new().unwrap();
        let layout = LayoutSettings {
            projects_root: root.path().to_path_buf(),
            ..LayoutSettings::default()
        };
        let publisher = Publisher::new(
            PathResolver::new(&layout, &OutputDefaults::default()),
            AnchorNames::default(),
        );
        let studio = Self { root, publisher };
        fs::create_dir_all(studio.step_root()).unwrap();
        fs::write(studio.working_file(), "comp v1").unwrap();
        studio
    }

    fn step_root(&self) -> PathBuf {
        self.root.path().join("PROJ/shots/SH010/COMP")
    }

    fn working_file(&self) -> PathBuf {
        self.step_root().join("PROJ_SH010_COMP.comp")
    }

    fn publish_root(&self) -> PathBuf {
        self.step_root().join("_published")
    }

    fn host(&self) -> FakeHost {
        FakeHost::new(self.working_file(), shot_spec())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum RenderMode {
    Complete,
    Fail,
    SkipFrame(i64),
    EmptyFrame(i64),
    CancelMidway,
}

struct FakeHost {
    working_file: PathBuf,
    spec: TechnicalSpec,
    anchors: Vec<AnchorNode>,
    mode: RenderMode,
    choice: Choice,
    configured: Option<AnchorConfig>,
    renders: usize,
    prompts: Vec<Prompt>,
    /// Occupy the archive path with a directory while rendering.
    block_archive: bool,
}

impl FakeHost {
    fn new(working_file: PathBuf, spec: TechnicalSpec) -> Self {
        Self {
            working_file,
            spec,
            anchors: vec![
                AnchorNode::new("_PREVIEW", OutputKind::Preview),
                AnchorNode::new("_FINAL", OutputKind::Final),
            ],
            mode: RenderMode::Complete,
            choice: Choice::Continue,
            configured: None,
            renders: 0,
            prompts: Vec::new(),
            block_archive: false,
        }
    }

    fn rendering(mut self, mode: RenderMode) -> Self {
        self.mode = mode;
        self
    }

    fn anchor_mut(&mut self, name: &str) -> Result<&mut AnchorNode, HostError> {
        self.anchors
            .iter_mut()
            .find(|a| a.name == name)
            .ok_or_else(|| HostError::AnchorNotFound { name: name.into() })
    }

    fn anchor(&self, name: &str) -> &AnchorNode {
        self.anchors.iter().find(|a| a.name == name).unwrap()
    }
}

fn frame_path(pattern: &Path, frame: i64) -> PathBuf {
    let name = pattern.file_name().unwrap().to_string_lossy().into_owned();
    let digits = name.chars().filter(|c| *c == '#').count();
    let hashes = "#".repeat(digits);
    pattern.with_file_name(name.replace(&hashes, &format!("{frame:0digits$}")))
}

impl HostApp for FakeHost {
    fn current_file(&self) -> Option<PathBuf> {
        Some(self.working_file.clone())
    }

    fn current_spec(&self) -> Option<TechnicalSpec> {
        Some(self.spec.clone())
    }

    fn anchors(&self) -> Vec<AnchorNode> {
        self.anchors.clone()
    }

    fn configure_anchor(&mut self, name: &str, config: &AnchorConfig) -> Result<(), HostError> {
        let anchor = self.anchor_mut(name)?;
        anchor.path = Some(config.path.clone());
        anchor.format = Some(config.format.clone());
        anchor.codec = config.codec.clone();
        self.configured = Some(config.clone());
        Ok(())
    }

    fn create_anchor(&mut self, name: &str, kind: OutputKind) -> Result<(), HostError> {
        if self.find_anchor(name).is_none() {
            self.anchors.push(AnchorNode::new(name, kind));
        }
        Ok(())
    }

    fn set_pass_through(&mut self, name: &str, pass_through: bool) -> Result<(), HostError> {
        self.anchor_mut(name)?.pass_through = pass_through;
        Ok(())
    }

    fn apply_spec(&mut self, spec: &TechnicalSpec) -> Result<(), HostError> {
        self.spec = spec.clone();
        Ok(())
    }

    fn render(&mut self, job: &RenderJob, cancel: &CancelToken) -> Result<RenderOutcome, HostError> {
        self.renders += 1;
        let anchor = self.anchor_mut(&job.anchor)?.clone();
        if anchor.pass_through {
            return Err(HostError::AnchorPassThrough { name: anchor.name });
        }
        let pattern = anchor.path.ok_or_else(|| HostError::AnchorUnconfigured {
            name: job.anchor.clone(),
        })?;

        if !pattern.to_string_lossy().contains('#') {
            let body = match self.mode {
                RenderMode::EmptyFrame(_) => "",
                _ => "prores",
            };
            fs::write(&pattern, body).unwrap();
            return Ok(match self.mode {
                RenderMode::Fail => RenderOutcome {
                    status: RenderStatus::Failed {
                        exit_code: Some(1),
                        message: "renderer crashed".into(),
                    },
                    written: vec![pattern],
                },
                _ => RenderOutcome::completed(vec![pattern]),
            });
        }

        if self.block_archive {
            let folder = pattern.parent().unwrap();
            fs::create_dir_all(folder.join("PROJ_SH010_COMP_v001_WIP.comp/occupied")).unwrap();
        }

        let mut written = Vec::new();
        for frame in job.start_frame..=job.end_frame {
            if self.mode == RenderMode::SkipFrame(frame) {
                continue;
            }
            let path = frame_path(&pattern, frame);
            let body = if self.mode == RenderMode::EmptyFrame(frame) { "" } else { "px" };
            fs::write(&path, body).unwrap();
            written.push(path);

            if frame == job.start_frame + 1 {
                match self.mode {
                    RenderMode::Fail => {
                        return Ok(RenderOutcome {
                            status: RenderStatus::Failed {
                                exit_code: Some(1),
                                message: "renderer crashed".into(),
                            },
                            written,
                        })
                    }
                    RenderMode::CancelMidway => {
                        cancel.cancel();
                        return Ok(RenderOutcome {
                            status: RenderStatus::Cancelled,
                            written,
                        });
                    }
                    _ => {}
                }
            }
        }
        Ok(RenderOutcome::completed(written))
    }

    fn ask_user(&mut self, prompt: &Prompt) -> Choice {
        self.prompts.push(prompt.clone());
        self.choice
    }
}

fn production(stub: &StubHandle) -> Production {
    Production::from_settings(&stub.settings(), &CacheSettings::default())
}

/// Status writes whose reply never arrives.
struct LostReply {
    inner: Production,
    /// Whether the write reaches the daemon before the reply is lost.
    applied: bool,
    /// Whether re-reading the status fails as well.
    unreachable_after: bool,
}

impl ProductionDb for LostReply {
    fn technical_spec(&self, ctx: &Context) -> Result<TechnicalSpec, DaemonError> {
        self.inner.technical_spec(ctx)
    }

    fn naming_rules(&self, project: &ProjectId, step: &StepId) -> Result<NamingRules, DaemonError> {
        self.inner.naming_rules(project, step)
    }

    fn status(&self, ctx: &Context) -> Result<StatusRecord, DaemonError> {
        if self.unreachable_after {
            return Err(DaemonError::Disconnected {
                reason: "connection reset by peer".into(),
            });
        }
        self.inner.status(ctx)
    }

    fn update_status(&self, ctx: &Context, update: &StatusUpdate) -> Result<(), DaemonError> {
        if self.applied {
            self.inner.update_status(ctx, update)?;
        }
        Err(DaemonError::Timeout {
            cmd: "set_status".into(),
            timeout_ms: 200,
        })
    }
}

fn assert_no_residue(studio: &Studio) {
    let left = list_versions(&studio.publish_root()).unwrap();
    assert!(left.is_empty(), "leftover publish folders: {left:?}");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn publish_commits_outputs_archive_and_status() {
    let daemon = stub(StubOptions::default());
    let db = production(&daemon);
    let studio = Studio::new();
    let mut host = studio.host();

    let request = PublishRequest::new(ctx(), "WIP").with_comment("first pass");
    let report = studio
        .publisher
        .publish(&db, &mut host, &request, &CancelToken::new());

    assert!(report.is_committed(), "{:?}", report.error);
    assert_eq!(report.version, Some(1));
    let states: Vec<PublishState> = report.stage_log.iter().map(|r| r.state).collect();
    assert_eq!(
        states,
        vec![
            PublishState::Idle,
            PublishState::Validating,
            PublishState::Rendering,
            PublishState::Archiving,
            PublishState::Registering,
            PublishState::Committed,
        ]
    );

    let folder = studio.publish_root().join("v001_WIP");
    assert!(folder.join("PROJ_SH010_COMP_vfx.001.exr").is_file());
    assert!(folder.join("PROJ_SH010_COMP_vfx.120.exr").is_file());
    assert_eq!(report.outputs.len(), 120);
    assert_eq!(
        report.archived.as_deref(),
        Some(folder.join("PROJ_SH010_COMP_v001_WIP.comp").as_path())
    );
    let meta = shotline_core::sidecar::read(&folder).unwrap().unwrap();
    assert_eq!(meta.comment, "first pass");
    assert_eq!(meta.user.as_deref(), Some("ana"));

    let configured = host.configured.unwrap();
    assert_eq!(configured.format, "OpenEXRFormat");
    assert_eq!(configured.path, folder.join("PROJ_SH010_COMP_vfx.###.exr"));

    let status = daemon.status("PROJ/SH010/COMP").unwrap();
    assert_eq!(status.version, 1);
    assert!(status.published);
    assert_eq!(status.comment, "first pass");
    assert_eq!(daemon.count("set_status"), 1);
}

#[test]
fn second_publish_takes_a_strictly_greater_version() {
    let daemon = stub(StubOptions::default());
    let db = production(&daemon);
    let studio = Studio::new();
    let request = PublishRequest::new(ctx(), "WIP");

    let first = studio
        .publisher
        .publish(&db, &mut studio.host(), &request, &CancelToken::new());
    let second = studio
        .publisher
        .publish(&db, &mut studio.host(), &request, &CancelToken::new());

    assert!(first.is_committed() && second.is_committed());
    assert_eq!((first.version, second.version), (Some(1), Some(2)));
    assert_eq!(daemon.status("PROJ/SH010/COMP").unwrap().version, 2);
}

#[test]
fn spec_mismatch_stops_before_render_and_database() {
    let daemon = stub(StubOptions::default());
    let db = production(&daemon);
    let studio = Studio::new();
    let mut host = studio.host();
    host.spec.width = 2048;
    host.spec.end_frame = 100;

    let report = studio.publisher.publish(
        &db,
        &mut host,
        &PublishRequest::new(ctx(), "WIP"),
        &CancelToken::new(),
    );

    assert_eq!(report.state, PublishState::Failed(Stage::Validating));
    match report.error {
        Some(SyncError::Validation(ref err)) => assert_eq!(err.mismatches.len(), 2),
        ref other => panic!("expected validation error, got {other:?}"),
    }
    assert!(report
        .diagnostics
        .iter()
        .any(|d| d == "Resolution Mismatch: expected 1920x1080, got 2048x1080"));
    assert!(report.diagnostics.iter().any(|d| d.starts_with("Frame Range Mismatch")));
    assert_eq!(host.renders, 0);
    assert!(host.configured.is_none());
    assert_eq!(daemon.count("set_status"), 0);
    assert!(!studio.publish_root().exists());
}

#[test]
fn render_failure_leaves_no_residue_and_status_untouched() {
    let daemon = stub(StubOptions::default());
    let db = production(&daemon);
    let studio = Studio::new();
    let mut host = studio.host().rendering(RenderMode::Fail);

    let report = studio.publisher.publish(
        &db,
        &mut host,
        &PublishRequest::new(ctx(), "WIP"),
        &CancelToken::new(),
    );

    assert_eq!(report.state, PublishState::Failed(Stage::Archiving));
    assert!(matches!(
        report.error,
        Some(SyncError::Render(RenderFailure::Exited { exit_code: Some(1), .. }))
    ));
    assert!(report.residual_artifacts.is_empty());
    assert_no_residue(&studio);
    assert_eq!(daemon.status("PROJ/SH010/COMP").unwrap(), initial_status());
    assert_eq!(daemon.count("set_status"), 0);
}

#[test]
fn missing_and_empty_frames_fail_the_render() {
    let daemon = stub(StubOptions::default());
    let db = production(&daemon);
    let studio = Studio::new();

    for mode in [RenderMode::SkipFrame(60), RenderMode::EmptyFrame(7)] {
        let mut host = studio.host().rendering(mode);
        let report = studio.publisher.publish(
            &db,
            &mut host,
            &PublishRequest::new(ctx(), "WIP"),
            &CancelToken::new(),
        );
        assert_eq!(report.failed_stage(), Some(Stage::Archiving));
        match report.error {
            Some(SyncError::Render(RenderFailure::Incomplete { missing, empty })) => {
                let bad: Vec<PathBuf> = missing.into_iter().chain(empty).collect();
                assert_eq!(bad.len(), 1);
                let name = bad[0].file_name().unwrap().to_string_lossy().into_owned();
                let expected = match mode {
                    RenderMode::SkipFrame(_) => "PROJ_SH010_COMP_vfx.060.exr",
                    _ => "PROJ_SH010_COMP_vfx.007.exr",
                };
                assert_eq!(name, expected);
            }
            other => panic!("expected incomplete render, got {other:?}"),
        }
        assert_no_residue(&studio);
    }
}

#[test]
fn cancelled_render_is_a_render_failure() {
    let daemon = stub(StubOptions::default());
    let db = production(&daemon);
    let studio = Studio::new();
    let mut host = studio.host().rendering(RenderMode::CancelMidway);

    let report = studio.publisher.publish(
        &db,
        &mut host,
        &PublishRequest::new(ctx(), "WIP"),
        &CancelToken::new(),
    );

    assert_eq!(report.state, PublishState::Failed(Stage::Archiving));
    assert!(matches!(
        report.error,
        Some(SyncError::Render(RenderFailure::Cancelled))
    ));
    assert_no_residue(&studio);
    assert_eq!(daemon.count("set_status"), 0);
}

#[test]
fn missing_final_anchor_fails_before_rendering() {
    let daemon = stub(StubOptions::default());
    let db = production(&daemon);
    let studio = Studio::new();
    let mut host = studio.host();
    host.anchors.retain(|a| a.name != "_FINAL");

    let report = studio.publisher.publish(
        &db,
        &mut host,
        &PublishRequest::new(ctx(), "WIP"),
        &CancelToken::new(),
    );

    assert_eq!(report.state, PublishState::Failed(Stage::Rendering));
    assert!(matches!(report.error, Some(SyncError::AnchorMissing { .. })));
    assert_eq!(host.renders, 0);
    assert_no_residue(&studio);
}

#[test]
fn disconnected_final_anchor_fails_before_rendering() {
    let daemon = stub(StubOptions::default());
    let db = production(&daemon);
    let studio = Studio::new();
    let mut host = studio.host();
    for anchor in &mut host.anchors {
        anchor.disconnected = true;
    }

    let report = studio.publisher.publish(
        &db,
        &mut host,
        &PublishRequest::new(ctx(), "WIP"),
        &CancelToken::new(),
    );
    assert_eq!(report.failed_stage(), Some(Stage::Rendering));
    assert!(matches!(report.error, Some(SyncError::AnchorDisconnected { .. })));
    assert_eq!(host.renders, 0);
}

#[test]
fn rejected_status_update_rolls_back_local_artifacts() {
    let daemon = stub(StubOptions::default().failing("set_status"));
    let db = production(&daemon);
    let studio = Studio::new();
    let mut host = studio.host();

    let report = studio.publisher.publish(
        &db,
        &mut host,
        &PublishRequest::new(ctx(), "WIP"),
        &CancelToken::new(),
    );

    assert_eq!(report.state, PublishState::Failed(Stage::Committed));
    assert!(matches!(report.error, Some(SyncError::Daemon(_))));
    assert_eq!(host.renders, 1);
    assert!(report.residual_artifacts.is_empty());
    assert_no_residue(&studio);
    assert_eq!(daemon.status("PROJ/SH010/COMP").unwrap(), initial_status());
}

#[test]
fn lost_reply_of_an_applied_write_still_commits() {
    let daemon = stub(StubOptions::default());
    let db = LostReply {
        inner: production(&daemon),
        applied: true,
        unreachable_after: false,
    };
    let studio = Studio::new();

    let report = studio.publisher.publish(
        &db,
        &mut studio.host(),
        &PublishRequest::new(ctx(), "WIP").with_comment("late ack"),
        &CancelToken::new(),
    );

    assert!(report.is_committed(), "{:?}", report.error);
    assert!(report
        .diagnostics
        .iter()
        .any(|d| d.starts_with("status write confirmed after a lost reply")));
    assert!(studio.publish_root().join("v001_WIP").is_dir());
    let status = daemon.status("PROJ/SH010/COMP").unwrap();
    assert_eq!((status.version, status.published), (1, true));

    // The next publish must not reuse the version the daemon already holds.
    let next = studio.publisher.publish(
        &production(&daemon),
        &mut studio.host(),
        &PublishRequest::new(ctx(), "WIP"),
        &CancelToken::new(),
    );
    assert_eq!(next.version, Some(2));
}

#[test]
fn lost_reply_of_an_absent_write_rolls_back() {
    let daemon = stub(StubOptions::default());
    let db = LostReply {
        inner: production(&daemon),
        applied: false,
        unreachable_after: false,
    };
    let studio = Studio::new();

    let report = studio.publisher.publish(
        &db,
        &mut studio.host(),
        &PublishRequest::new(ctx(), "WIP"),
        &CancelToken::new(),
    );

    assert_eq!(report.state, PublishState::Failed(Stage::Committed));
    assert!(matches!(report.error, Some(SyncError::Daemon(DaemonError::Timeout { .. }))));
    assert!(report.residual_artifacts.is_empty());
    assert_no_residue(&studio);
    assert_eq!(daemon.status("PROJ/SH010/COMP").unwrap(), initial_status());
}

#[test]
fn unknown_commit_outcome_keeps_the_artifacts() {
    let daemon = stub(StubOptions::default());
    let db = LostReply {
        inner: production(&daemon),
        applied: true,
        unreachable_after: true,
    };
    let studio = Studio::new();

    let report = studio.publisher.publish(
        &db,
        &mut studio.host(),
        &PublishRequest::new(ctx(), "WIP"),
        &CancelToken::new(),
    );

    assert_eq!(report.state, PublishState::Failed(Stage::Committed));
    assert!(report
        .diagnostics
        .iter()
        .any(|d| d.starts_with("outcome unknown, artifacts kept")));
    let folder = studio.publish_root().join("v001_WIP");
    assert!(folder.join("PROJ_SH010_COMP_v001_WIP.comp").is_file());
    assert!(report.residual_artifacts.contains(&folder));
    assert_eq!(daemon.status("PROJ/SH010/COMP").unwrap().version, 1);
}

#[test]
fn lost_reply_over_a_slow_daemon_never_deletes_a_registered_publish() {
    let daemon = stub(StubOptions::default().with_delay(Duration::from_millis(600)));
    let cache = Arc::new(MetadataCache::from_settings(&CacheSettings::default()));
    let patient = Production::new(Arc::new(DaemonClient::new(&daemon.settings())), cache.clone());
    patient.technical_spec(&ctx()).unwrap();
    patient.naming_rules(&ctx().project, &ctx().step).unwrap();

    let hasty = DaemonSettings {
        timeout_ms: 200,
        ..daemon.settings()
    };
    let db = Production::new(Arc::new(DaemonClient::new(&hasty)), cache);
    let studio = Studio::new();

    let report = studio.publisher.publish(
        &db,
        &mut studio.host(),
        &PublishRequest::new(ctx(), "WIP"),
        &CancelToken::new(),
    );
    assert!(!report.is_committed());

    thread::sleep(Duration::from_millis(800));
    let status = daemon.status("PROJ/SH010/COMP").unwrap();
    assert!(status.published);
    assert!(studio.publish_root().join("v001_WIP").is_dir());
}

#[test]
fn blocked_archive_destination_fails_registering_cleanly() {
    let daemon = stub(StubOptions::default());
    let db = production(&daemon);
    let studio = Studio::new();
    let mut host = studio.host();
    host.block_archive = true;

    let report = studio.publisher.publish(
        &db,
        &mut host,
        &PublishRequest::new(ctx(), "WIP"),
        &CancelToken::new(),
    );

    assert_eq!(report.state, PublishState::Failed(Stage::Registering));
    assert!(matches!(report.error, Some(SyncError::Io { .. })));
    assert_eq!(host.renders, 1);
    assert!(report.residual_artifacts.is_empty());
    assert!(!studio
        .publish_root()
        .join("v001_WIP/PROJ_SH010_COMP_v001_WIP.comp.tmp")
        .exists());
    assert_no_residue(&studio);
    assert_eq!(daemon.status("PROJ/SH010/COMP").unwrap(), initial_status());
    assert_eq!(daemon.count("set_status"), 0);
}

#[test]
fn rerun_after_failure_recomputes_the_version() {
    let daemon = stub(StubOptions::default());
    let db = production(&daemon);
    let studio = Studio::new();
    let request = PublishRequest::new(ctx(), "WIP");

    let failed = studio.publisher.publish(
        &db,
        &mut studio.host().rendering(RenderMode::Fail),
        &request,
        &CancelToken::new(),
    );
    assert_eq!(failed.version, Some(1));
    assert!(!failed.is_committed());

    let retried = studio
        .publisher
        .publish(&db, &mut studio.host(), &request, &CancelToken::new());
    assert!(retried.is_committed());
    assert_eq!(retried.version, Some(1));
}

#[test]
fn stale_sources_prompt_the_artist() {
    let daemon = stub(StubOptions::default());
    let db = production(&daemon);
    let studio = Studio::new();

    let plate_root = studio.root.path().join("PROJ/shots/SH010/PLATE/_published");
    for folder in ["v001_OK", "v002_OK"] {
        fs::create_dir_all(plate_root.join(folder)).unwrap();
    }
    let imported = plate_root.join("v001_OK").join("PROJ_SH010_PLATE.0001.exr");
    let request = PublishRequest::new(ctx(), "WIP").with_sources(vec![imported.clone()]);

    let mut declining = studio.host();
    declining.choice = Choice::Cancel;
    let report = studio
        .publisher
        .publish(&db, &mut declining, &request, &CancelToken::new());
    assert_eq!(report.state, PublishState::Failed(Stage::Validating));
    match report.error {
        Some(SyncError::StaleSources { ref sources }) => assert_eq!(sources, &vec![imported]),
        ref other => panic!("expected stale sources, got {other:?}"),
    }
    assert_eq!(declining.prompts.len(), 1);
    assert_eq!(declining.renders, 0);

    let mut accepting = studio.host();
    let report = studio
        .publisher
        .publish(&db, &mut accepting, &request, &CancelToken::new());
    assert!(report.is_committed());
    assert!(report
        .diagnostics
        .iter()
        .any(|d| d.starts_with("Outdated source:")));
    let meta = shotline_core::sidecar::read(&studio.publish_root().join("v001_WIP"))
        .unwrap()
        .unwrap();
    assert_eq!(meta.sources.len(), 1);
}

#[test]
fn unsaved_document_cannot_be_published() {
    let daemon = stub(StubOptions::default());
    let db = production(&daemon);
    let studio = Studio::new();
    let mut host = FakeHost::new(studio.step_root().join("never_saved.comp"), shot_spec());

    let report = studio.publisher.publish(
        &db,
        &mut host,
        &PublishRequest::new(ctx(), "WIP"),
        &CancelToken::new(),
    );
    assert_eq!(report.failed_stage(), Some(Stage::Validating));
    assert!(matches!(report.error, Some(SyncError::NoWorkingFile)));
    assert_eq!(daemon.count("get_spec"), 0);
}

#[cfg(unix)]
#[test]
fn command_host_publish_end_to_end() {
    use shotline_host::{CommandHost, SceneManifest};

    let short = TechnicalSpec {
        end_frame: 3,
        ..shot_spec()
    };
    let db = StubDatabase::default()
        .with_states(&["WIP"])
        .with_spec("PROJ", "SH010", short.clone());
    let daemon = StubHandle::spawn(db, StubOptions::default()).unwrap();
    let production = production(&daemon);
    let studio = Studio::new();

    let mut host = CommandHost::new(SceneManifest {
        working_file: Some(studio.working_file()),
        spec: Some(short),
        render_command: Some(
            r#"sh -c 'for f in $(seq {start} {end}); do printf x > "$(printf {output_printf} $f)"; done'"#
                .into(),
        ),
        anchors: vec![AnchorNode::new("_FINAL", OutputKind::Final)],
    });

    let report = studio.publisher.publish(
        &production,
        &mut host,
        &PublishRequest::new(ctx(), "WIP"),
        &CancelToken::new(),
    );
    assert!(report.is_committed(), "{:?}", report.error);
    assert!(report
        .diagnostics
        .iter()
        .any(|d| d.starts_with("no naming rules")));
    let folder = studio.publish_root().join("v001_WIP");
    for frame in ["1", "2", "3"] {
        assert!(folder.join(format!("PROJ_SH010_COMP.{frame}.exr")).is_file());
    }
}

// ---------------------------------------------------------------------------
// Preview and scene setup
// ---------------------------------------------------------------------------

#[test]
fn preview_renders_the_movie_into_the_preview_folder() {
    let daemon = stub(StubOptions::default());
    let db = production(&daemon);
    let studio = Studio::new();
    let mut host = studio.host();

    let report = studio
        .publisher
        .preview(&db, &mut host, &ctx(), &CancelToken::new())
        .unwrap();

    let movie = studio.step_root().join("_preview/PROJ_SH010_COMP_vfx.mov");
    assert_eq!(report.outputs, vec![movie.clone()]);
    assert!(movie.is_file());
    let anchor = host.anchor("_PREVIEW");
    assert_eq!(anchor.format.as_deref(), Some("QuickTimeMovies"));
    assert_eq!(anchor.codec.as_deref(), Some("Apple ProRes 422_apcn"));
    assert_eq!(daemon.count("set_status"), 0);
    assert_no_residue(&studio);
}

#[test]
fn empty_preview_is_incomplete_and_removed() {
    let daemon = stub(StubOptions::default());
    let db = production(&daemon);
    let studio = Studio::new();
    let mut host = studio.host().rendering(RenderMode::EmptyFrame(1));

    let err = studio
        .publisher
        .preview(&db, &mut host, &ctx(), &CancelToken::new())
        .unwrap_err();

    let movie = studio.step_root().join("_preview/PROJ_SH010_COMP_vfx.mov");
    match err {
        SyncError::Render(RenderFailure::Incomplete { missing, empty }) => {
            assert!(missing.is_empty());
            assert_eq!(empty, vec![movie.clone()]);
        }
        other => panic!("expected an incomplete render, got {other:?}"),
    }
    assert!(!movie.exists());
}

#[test]
fn preview_refuses_a_mismatched_document() {
    let daemon = stub(StubOptions::default());
    let db = production(&daemon);
    let studio = Studio::new();
    let mut host = FakeHost::new(
        studio.working_file(),
        TechnicalSpec {
            fps: 25.0,
            ..shot_spec()
        },
    );

    let err = studio
        .publisher
        .preview(&db, &mut host, &ctx(), &CancelToken::new())
        .unwrap_err();
    assert!(matches!(err, SyncError::Validation(_)), "{err:?}");
    assert_eq!(host.renders, 0);
}

#[test]
fn setup_creates_bypassed_anchors_at_resolved_paths() {
    let daemon = stub(StubOptions::default());
    let db = production(&daemon);
    let studio = Studio::new();
    let mut host = FakeHost::new(
        studio.working_file(),
        TechnicalSpec {
            width: 640,
            ..shot_spec()
        },
    );
    host.anchors.clear();

    let report = studio
        .publisher
        .setup_scene(&db, &mut host, &ctx(), "WIP")
        .unwrap();

    assert_eq!(host.spec, shot_spec());
    assert_eq!(report.anchors.len(), 2);
    assert!(report.anchors.iter().all(|a| a.created));

    let preview = host.anchor("_PREVIEW");
    assert!(preview.pass_through);
    assert_eq!(
        preview.path,
        Some(studio.step_root().join("_preview/PROJ_SH010_COMP_vfx.mov"))
    );
    let fin = host.anchor("_FINAL");
    assert!(fin.pass_through);
    assert_eq!(fin.format.as_deref(), Some("OpenEXRFormat"));
    assert_eq!(
        fin.path,
        Some(studio.publish_root().join("v001_WIP/PROJ_SH010_COMP_vfx.###.exr"))
    );
    assert!(!studio.publish_root().exists());
    assert!(!studio.step_root().join("_preview").exists());
}

#[test]
fn publish_after_setup_renders_through_the_bypass() {
    let daemon = stub(StubOptions::default());
    let db = production(&daemon);
    let studio = Studio::new();
    let mut host = studio.host();
    let setup = studio
        .publisher
        .setup_scene(&db, &mut host, &ctx(), "WIP")
        .unwrap();
    assert!(setup.anchors.iter().all(|a| !a.created));

    let report = studio.publisher.publish(
        &db,
        &mut host,
        &PublishRequest::new(ctx(), "WIP"),
        &CancelToken::new(),
    );
    assert!(report.is_committed(), "{:?}", report.error);
    assert!(host.anchor("_FINAL").pass_through);
}

#[cfg(unix)]
#[test]
fn command_host_setup_then_publish() {
    use shotline_host::{CommandHost, SceneManifest};

    let short = TechnicalSpec {
        end_frame: 2,
        ..shot_spec()
    };
    let db = StubDatabase::default()
        .with_states(&["WIP"])
        .with_spec("PROJ", "SH010", short.clone());
    let daemon = StubHandle::spawn(db, StubOptions::default()).unwrap();
    let production = production(&daemon);
    let studio = Studio::new();

    let mut host = CommandHost::new(SceneManifest {
        working_file: Some(studio.working_file()),
        spec: None,
        render_command: Some(
            r#"sh -c 'for f in $(seq {start} {end}); do printf x > "$(printf {output_printf} $f)"; done'"#
                .into(),
        ),
        anchors: Vec::new(),
    });

    studio
        .publisher
        .setup_scene(&production, &mut host, &ctx(), "WIP")
        .unwrap();
    assert_eq!(host.current_spec(), Some(short));
    assert!(host.find_anchor("_FINAL").is_some_and(|a| a.pass_through));

    let report = studio.publisher.publish(
        &production,
        &mut host,
        &PublishRequest::new(ctx(), "WIP"),
        &CancelToken::new(),
    );
    assert!(report.is_committed(), "{:?}", report.error);
    assert!(studio
        .publish_root()
        .join("v001_WIP/PROJ_SH010_COMP.1.exr")
        .is_file());
}
