//! `shotline setup`: apply the shot spec and create the output anchors.

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use shotline_host::CommandHost;
use shotline_sync::{AnchorSetup, Publisher};

use super::{print_json, production, resolver};
use crate::{ContextArgs, GlobalArgs};

#[derive(Args, Debug)]
pub struct SetupArgs {
    /// Scene manifest (YAML); the settings and anchors are written back to it.
    pub manifest: PathBuf,

    #[command(flatten)]
    pub context: ContextArgs,

    /// State of the version the final anchor points at.
    #[arg(long, default_value = "WIP")]
    pub state: String,
}

#[derive(Tabled)]
struct AnchorRow {
    #[tabled(rename = "anchor")]
    name: String,
    #[tabled(rename = "format")]
    format: String,
    #[tabled(rename = "path")]
    path: String,
    #[tabled(rename = "")]
    created: &'static str,
}

impl From<&AnchorSetup> for AnchorRow {
    fn from(anchor: &AnchorSetup) -> Self {
        Self {
            name: anchor.name.clone(),
            format: anchor.format.clone(),
            path: anchor.path.display().to_string(),
            created: if anchor.created { "new" } else { "" },
        }
    }
}

impl SetupArgs {
    pub fn run(self, global: &GlobalArgs) -> Result<()> {
        let config = global.config()?;
        let mut host = CommandHost::open(&self.manifest)
            .with_context(|| format!("failed to open scene manifest {}", self.manifest.display()))?;
        let ctx = self.context.resolve(host.manifest().working_file.as_deref())?;

        let publisher = Publisher::new(resolver(&config), config.anchors.clone());
        let report = publisher
            .setup_scene(&production(&config), &mut host, &ctx, &self.state)
            .with_context(|| format!("setup of {ctx} failed"))?;

        if global.json {
            return print_json(&report);
        }
        for line in &report.diagnostics {
            println!("  {} {line}", "!".yellow());
        }
        let spec = &report.spec;
        println!(
            "{} {} {}x{} @ {} fps, frames {}-{}",
            "✓".green(),
            ctx.to_string().bold(),
            spec.width,
            spec.height,
            spec.fps,
            spec.start_frame,
            spec.end_frame
        );
        let rows: Vec<AnchorRow> = report.anchors.iter().map(AnchorRow::from).collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
        Ok(())
    }
}
