//! `shotline publish`: one publish transaction through the headless command host.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;

use shotline_host::{parse_saver_node, CancelToken, Choice, CommandHost};
use shotline_sync::{PublishReport, PublishRequest, Publisher};

use super::{cancel_on_ctrl_c, print_json, production, resolver};
use crate::{ContextArgs, GlobalArgs};

#[derive(Args, Debug)]
pub struct PublishArgs {
    /// Scene manifest (YAML) describing the working file, spec, anchors and render command.
    pub manifest: PathBuf,

    #[command(flatten)]
    pub context: ContextArgs,

    #[arg(long, default_value = "WIP")]
    pub state: String,

    #[arg(long, short = 'm', default_value = "")]
    pub comment: String,

    /// Completion percentage recorded with the status.
    #[arg(long, default_value_t = 100)]
    pub completion: u8,

    /// Imported source, checked for newer published versions. Repeatable.
    #[arg(long = "source", value_name = "PATH")]
    pub sources: Vec<PathBuf>,

    /// Copied saver node whose settings configure the final anchor.
    #[arg(long)]
    pub preset: Option<PathBuf>,

    /// Answer "cancel" to every prompt instead of "continue".
    #[arg(long)]
    pub strict: bool,
}

#[derive(Serialize)]
struct PublishJson {
    committed: bool,
    state: String,
    version: Option<u32>,
    stages: Vec<String>,
    diagnostics: Vec<String>,
    outputs: usize,
    archived: Option<PathBuf>,
    residual_artifacts: Vec<PathBuf>,
    error: Option<String>,
}

impl From<&PublishReport> for PublishJson {
    fn from(report: &PublishReport) -> Self {
        Self {
            committed: report.is_committed(),
            state: report.state.to_string(),
            version: report.version,
            stages: report.stage_log.iter().map(|r| r.state.to_string()).collect(),
            diagnostics: report.diagnostics.clone(),
            outputs: report.outputs.len(),
            archived: report.archived.clone(),
            residual_artifacts: report.residual_artifacts.clone(),
            error: report.error.as_ref().map(ToString::to_string),
        }
    }
}

impl PublishArgs {
    pub fn run(self, global: &GlobalArgs) -> Result<()> {
        let config = global.config()?;
        let choice = if self.strict { Choice::Cancel } else { Choice::Continue };
        let mut host = CommandHost::open(&self.manifest)
            .with_context(|| format!("failed to open scene manifest {}", self.manifest.display()))?
            .with_default_choice(choice);
        let ctx = self.context.resolve(host.manifest().working_file.as_deref())?;

        let mut request = PublishRequest::new(ctx, self.state)
            .with_comment(self.comment)
            .with_completion(self.completion)
            .with_sources(self.sources);
        if let Some(path) = &self.preset {
            let text = fs::read_to_string(path)
                .with_context(|| format!("failed to read preset {}", path.display()))?;
            let preset = parse_saver_node(&text)
                .with_context(|| format!("failed to parse preset {}", path.display()))?
                .with_context(|| format!("no saver node found in {}", path.display()))?;
            request = request.with_preset(preset);
        }

        let cancel = CancelToken::new();
        cancel_on_ctrl_c(&cancel)?;
        let publisher = Publisher::new(resolver(&config), config.anchors.clone());
        let db = production(&config);
        let mut report = publisher.publish(&db, &mut host, &request, &cancel);

        if global.json {
            print_json(&PublishJson::from(&report))?;
        } else {
            print_report(&report);
        }

        match report.error.take() {
            None => Ok(()),
            Some(err) => Err(err).with_context(|| format!("publish ended in {}", report.state)),
        }
    }
}

fn print_report(report: &PublishReport) {
    let stages: Vec<String> = report.stage_log.iter().map(|r| r.state.to_string()).collect();
    println!("{}", stages.join(" -> ").bright_black());
    for line in &report.diagnostics {
        println!("  {} {line}", "!".yellow());
    }
    for path in &report.residual_artifacts {
        println!("  {} left behind: {}", "✗".red(), path.display());
    }

    let version = report
        .version
        .map(|v| format!("v{v:03}"))
        .unwrap_or_else(|| "-".to_string());
    if report.is_committed() {
        println!(
            "{} Published {version} ({} output file(s))",
            "✓".green(),
            report.outputs.len()
        );
        if let Some(archived) = &report.archived {
            println!("  {}", archived.display());
        }
    } else {
        println!("{} Publish of {version} {}", "✗".red(), report.state.to_string().red());
    }
}
