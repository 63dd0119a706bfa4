//! `shotline preview`: render the preview anchor of a scene manifest.

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;

use shotline_host::{CancelToken, CommandHost};
use shotline_sync::Publisher;

use super::{cancel_on_ctrl_c, print_json, production, resolver};
use crate::{ContextArgs, GlobalArgs};

#[derive(Args, Debug)]
pub struct PreviewArgs {
    /// Scene manifest (YAML) describing the working file, spec, anchors and render command.
    pub manifest: PathBuf,

    #[command(flatten)]
    pub context: ContextArgs,
}

#[derive(Serialize)]
struct PreviewJson<'a> {
    outputs: &'a [PathBuf],
    diagnostics: &'a [String],
}

impl PreviewArgs {
    pub fn run(self, global: &GlobalArgs) -> Result<()> {
        let config = global.config()?;
        let mut host = CommandHost::open(&self.manifest)
            .with_context(|| format!("failed to open scene manifest {}", self.manifest.display()))?;
        let ctx = self.context.resolve(host.manifest().working_file.as_deref())?;

        let cancel = CancelToken::new();
        cancel_on_ctrl_c(&cancel)?;
        let publisher = Publisher::new(resolver(&config), config.anchors.clone());
        let report = publisher
            .preview(&production(&config), &mut host, &ctx, &cancel)
            .with_context(|| format!("preview of {ctx} failed"))?;

        if global.json {
            return print_json(&PreviewJson {
                outputs: &report.outputs,
                diagnostics: &report.diagnostics,
            });
        }
        for line in &report.diagnostics {
            println!("  {} {line}", "!".yellow());
        }
        println!("{} Preview rendered", "✓".green());
        for path in &report.outputs {
            println!("  {}", path.display());
        }
        Ok(())
    }
}
