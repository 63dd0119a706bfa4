//! Headless [`HostApp`] driven by a YAML scene manifest.
//!
//! The manifest stands in for the open document: its working file, technical
//! settings and output anchors. Renders run an external command built from a
//! template, so any renderer with a command line can sit behind the publish
//! workflow.
//!
//! ```yaml
//! working_file: /productions/PROJ/shots/SH010/COMP/PROJ_SH010_COMP.comp
//! spec: { width: 1920, height: 1080, fps: 24.0, start_frame: 1, end_frame: 120 }
//! render_command: "renderer --scene {scene} --out {output_printf} -s {start} -e {end}"
//! anchors:
//!   - { name: _FINAL, kind: final }
//!   - { name: _PREVIEW, kind: preview }
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::io;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use shotline_core::{OutputKind, TechnicalSpec};

use crate::error::{io_err, HostError};
use crate::host::{
    AnchorConfig, AnchorNode, CancelToken, Choice, HostApp, Prompt, RenderJob, RenderOutcome,
    RenderStatus,
};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SceneManifest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec: Option<TechnicalSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub render_command: Option<String>,
    #[serde(default)]
    pub anchors: Vec<AnchorNode>,
}

impl SceneManifest {
    pub fn load(path: &Path) -> Result<Self, HostError> {
        let raw = fs::read_to_string(path).map_err(|e| io_err(path, e))?;
        serde_yaml::from_str(&raw).map_err(|source| HostError::Manifest {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Atomic write through a `.tmp` sibling.
    pub fn save(&self, path: &Path) -> Result<(), HostError> {
        let yaml = serde_yaml::to_string(self)?;
        let tmp = path.with_extension("yaml.tmp");
        fs::write(&tmp, yaml).map_err(|e| io_err(&tmp, e))?;
        fs::rename(&tmp, path).map_err(|e| io_err(path, e))?;
        Ok(())
    }
}

pub struct CommandHost {
    manifest: SceneManifest,
    manifest_path: Option<PathBuf>,
    default_choice: Choice,
    prompts: Vec<Prompt>,
}

impl CommandHost {
    pub fn new(manifest: SceneManifest) -> Self {
        Self {
            manifest,
            manifest_path: None,
            default_choice: Choice::Continue,
            prompts: Vec::new(),
        }
    }

    /// Load the manifest at `path`; configuration changes are written back to it.
    pub fn open(path: &Path) -> Result<Self, HostError> {
        let manifest = SceneManifest::load(path)?;
        tracing::debug!(manifest = %path.display(), anchors = manifest.anchors.len(), "scene manifest loaded");
        Ok(Self {
            manifest_path: Some(path.to_path_buf()),
            ..Self::new(manifest)
        })
    }

    /// The answer every modal prompt receives.
    pub fn with_default_choice(mut self, choice: Choice) -> Self {
        self.default_choice = choice;
        self
    }

    pub fn manifest(&self) -> &SceneManifest {
        &self.manifest
    }

    /// Prompts shown so far, oldest first.
    pub fn prompts(&self) -> &[Prompt] {
        &self.prompts
    }

    fn anchor_mut(&mut self, name: &str) -> Result<&mut AnchorNode, HostError> {
        self.manifest
            .anchors
            .iter_mut()
            .find(|a| a.name == name)
            .ok_or_else(|| HostError::AnchorNotFound {
                name: name.to_string(),
            })
    }

    fn persist(&self) -> Result<(), HostError> {
        match &self.manifest_path {
            Some(path) => self.manifest.save(path),
            None => Ok(()),
        }
    }

    fn build_command(&self, job: &RenderJob, output: &Path) -> Result<Vec<String>, HostError> {
        let template = self
            .manifest
            .render_command
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .ok_or(HostError::NoRenderCommand)?;
        let words = shell_words::split(template).map_err(|e| HostError::RenderCommand {
            command: template.to_string(),
            reason: e.to_string(),
        })?;
        if words.is_empty() {
            return Err(HostError::NoRenderCommand);
        }

        let output_hash = output.to_string_lossy().into_owned();
        let output_printf = hash_to_printf(&output_hash);
        let scene = self
            .manifest
            .working_file
            .as_ref()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(words
            .into_iter()
            .map(|word| {
                word.replace("{output_printf}", &output_printf)
                    .replace("{output}", &output_hash)
                    .replace("{start}", &job.start_frame.to_string())
                    .replace("{end}", &job.end_frame.to_string())
                    .replace("{scene}", &scene)
            })
            .collect())
    }
}

/// `name.###.exr` -> `name.%03d.exr`. Paths without a `#` run are unchanged.
pub fn hash_to_printf(path: &str) -> String {
    let Some(start) = path.rfind('#').map(|end| {
        path[..=end]
            .rfind(|c: char| c != '#')
            .map_or(0, |idx| idx + 1)
    }) else {
        return path.to_string();
    };
    let end = start + path[start..].chars().take_while(|c| *c == '#').count();
    format!("{}%0{}d{}", &path[..start], end - start, &path[end..])
}

/// Files in the output folder that belong to `output` (a movie path or a
/// `#`-padded sequence path).
fn scan_written(output: &Path) -> Vec<PathBuf> {
    let Some(folder) = output.parent() else {
        return Vec::new();
    };
    let name = output
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let (prefix, suffix) = match (name.find('#'), name.rfind('#')) {
        (Some(first), Some(last)) => (name[..first].to_string(), name[last + 1..].to_string()),
        _ => {
            return if output.is_file() {
                vec![output.to_path_buf()]
            } else {
                Vec::new()
            }
        }
    };

    let Ok(entries) = fs::read_dir(folder) else {
        return Vec::new();
    };
    let mut written: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .map(|n| n.to_string_lossy())
                .is_some_and(|n| {
                    n.len() > prefix.len() + suffix.len()
                        && n.starts_with(&prefix)
                        && n.ends_with(&suffix)
                        && n[prefix.len()..n.len() - suffix.len()]
                            .bytes()
                            .all(|b| b.is_ascii_digit() || b == b'-')
                })
        })
        .collect();
    written.sort();
    written
}

/// A spawned renderer. Killed and reaped when dropped before it exits.
struct Renderer {
    child: Child,
    reaped: bool,
}

impl Renderer {
    fn new(child: Child) -> Self {
        Self {
            child,
            reaped: false,
        }
    }

    fn try_wait(&mut self) -> io::Result<Option<ExitStatus>> {
        let status = self.child.try_wait()?;
        self.reaped = status.is_some();
        Ok(status)
    }

    fn stop(&mut self) {
        if self.reaped {
            return;
        }
        if let Err(e) = self.child.kill() {
            tracing::warn!(pid = self.child.id(), error = %e, "failed to kill renderer");
        }
        let _ = self.child.wait();
        self.reaped = true;
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        self.stop();
    }
}

impl HostApp for CommandHost {
    fn current_file(&self) -> Option<PathBuf> {
        self.manifest.working_file.clone()
    }

    fn current_spec(&self) -> Option<TechnicalSpec> {
        self.manifest.spec.clone()
    }

    fn anchors(&self) -> Vec<AnchorNode> {
        self.manifest.anchors.clone()
    }

    fn configure_anchor(&mut self, name: &str, config: &AnchorConfig) -> Result<(), HostError> {
        let anchor = self.anchor_mut(name)?;
        anchor.path = Some(config.path.clone());
        anchor.format = Some(config.format.clone());
        anchor.codec = config.codec.clone();
        anchor.properties = config.properties.clone();
        tracing::debug!(anchor = name, path = %config.path.display(), format = %config.format, "anchor configured");
        self.persist()
    }

    fn create_anchor(&mut self, name: &str, kind: OutputKind) -> Result<(), HostError> {
        if self.manifest.anchors.iter().any(|a| a.name == name) {
            return Ok(());
        }
        tracing::info!(anchor = name, kind = %kind, "anchor created");
        self.manifest.anchors.push(AnchorNode::new(name, kind));
        self.persist()
    }

    fn set_pass_through(&mut self, name: &str, pass_through: bool) -> Result<(), HostError> {
        self.anchor_mut(name)?.pass_through = pass_through;
        self.persist()
    }

    fn apply_spec(&mut self, spec: &TechnicalSpec) -> Result<(), HostError> {
        tracing::info!(
            width = spec.width,
            height = spec.height,
            fps = spec.fps,
            start = spec.start_frame,
            end = spec.end_frame,
            "document settings applied"
        );
        self.manifest.spec = Some(spec.clone());
        self.persist()
    }

    fn render(&mut self, job: &RenderJob, cancel: &CancelToken) -> Result<RenderOutcome, HostError> {
        let anchor = self
            .find_anchor(&job.anchor)
            .ok_or_else(|| HostError::AnchorNotFound {
                name: job.anchor.clone(),
            })?;
        if anchor.pass_through {
            return Err(HostError::AnchorPassThrough {
                name: job.anchor.clone(),
            });
        }
        let output = anchor.path.ok_or_else(|| HostError::AnchorUnconfigured {
            name: job.anchor.clone(),
        })?;
        let argv = self.build_command(job, &output)?;

        tracing::info!(
            anchor = %job.anchor,
            start = job.start_frame,
            end = job.end_frame,
            program = %argv[0],
            "starting render"
        );
        let child = Command::new(&argv[0])
            .args(&argv[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| HostError::RenderCommand {
                command: argv.join(" "),
                reason: e.to_string(),
            })?;
        let mut renderer = Renderer::new(child);

        let status = loop {
            if cancel.is_cancelled() {
                tracing::warn!(anchor = %job.anchor, "render cancelled, stopping renderer");
                renderer.stop();
                return Ok(RenderOutcome {
                    status: RenderStatus::Cancelled,
                    written: scan_written(&output),
                });
            }
            match renderer.try_wait().map_err(|e| io_err(&argv[0], e))? {
                Some(status) => break status,
                None => thread::sleep(POLL_INTERVAL),
            }
        };

        let written = scan_written(&output);
        if status.success() {
            tracing::info!(anchor = %job.anchor, files = written.len(), "render finished");
            Ok(RenderOutcome::completed(written))
        } else {
            Ok(RenderOutcome {
                status: RenderStatus::Failed {
                    exit_code: status.code(),
                    message: format!("renderer exited with {status}"),
                },
                written,
            })
        }
    }

    fn ask_user(&mut self, prompt: &Prompt) -> Choice {
        tracing::warn!(title = %prompt.title, choice = ?self.default_choice, "{}", prompt.message);
        self.prompts.push(prompt.clone());
        self.default_choice
    }

    fn save_document(&mut self) -> Result<(), HostError> {
        self.persist()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_runs_become_printf() {
        assert_eq!(hash_to_printf("/out/A_B_C.###.exr"), "/out/A_B_C.%03d.exr");
        assert_eq!(hash_to_printf("/out/A.#####.dpx"), "/out/A.%05d.dpx");
        assert_eq!(hash_to_printf("/out/A.mov"), "/out/A.mov");
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn dropped_renderer_does_not_outlive_the_host() {
        let child = Command::new("sleep").arg("30").spawn().unwrap();
        let pid = child.id();
        let renderer = Renderer::new(child);
        assert!(Path::new(&format!("/proc/{pid}")).exists());

        drop(renderer);
        assert!(!Path::new(&format!("/proc/{pid}")).exists());
    }

    #[cfg(unix)]
    #[test]
    fn finished_renderer_is_left_alone() {
        let child = Command::new("true").spawn().unwrap();
        let mut renderer = Renderer::new(child);
        let status = loop {
            if let Some(status) = renderer.try_wait().unwrap() {
                break status;
            }
            thread::sleep(POLL_INTERVAL);
        };
        assert!(status.success());
        assert!(renderer.reaped);
    }

    #[test]
    fn missing_render_command_is_reported() {
        let mut host = CommandHost::new(SceneManifest {
            anchors: vec![AnchorNode {
                path: Some(PathBuf::from("/tmp/out.####.exr")),
                ..AnchorNode::new("_FINAL", shotline_core::OutputKind::Final)
            }],
            ..SceneManifest::default()
        });
        let job = RenderJob {
            anchor: "_FINAL".into(),
            start_frame: 1,
            end_frame: 2,
        };
        let err = host.render(&job, &CancelToken::new()).unwrap_err();
        assert!(matches!(err, HostError::NoRenderCommand));
    }

    #[test]
    fn placeholders_are_substituted_per_word() {
        let host = CommandHost::new(SceneManifest {
            working_file: Some(PathBuf::from("/shots/My Scene.comp")),
            render_command: Some("render --scene {scene} -o '{output}' -f {start}-{end}".into()),
            ..SceneManifest::default()
        });
        let job = RenderJob {
            anchor: "_FINAL".into(),
            start_frame: 1001,
            end_frame: 1010,
        };
        let argv = host
            .build_command(&job, Path::new("/out/A.####.exr"))
            .unwrap();
        assert_eq!(
            argv,
            vec![
                "render",
                "--scene",
                "/shots/My Scene.comp",
                "-o",
                "/out/A.####.exr",
                "-f",
                "1001-1010"
            ]
        );
    }

    #[test]
    fn ask_user_records_prompt_and_returns_default() {
        let mut host = CommandHost::new(SceneManifest::default()).with_default_choice(Choice::Cancel);
        let choice = host.ask_user(&Prompt::new("Outdated sources", "2 imports are stale"));
        assert_eq!(choice, Choice::Cancel);
        assert_eq!(host.prompts().len(), 1);
    }
}
