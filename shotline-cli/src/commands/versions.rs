//! `shotline versions`: published versions or working-file saves of a step.

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use chrono::Local;
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use shotline_core::VersionEntry;
use shotline_sync::list_versions;

use super::{print_json, resolver};
use crate::{ContextArgs, GlobalArgs};

#[derive(Args, Debug)]
pub struct VersionsArgs {
    #[command(flatten)]
    pub context: ContextArgs,

    /// Managed file to detect the context from.
    #[arg(long)]
    pub file: Option<PathBuf>,

    /// List `_versions` saves of the working file instead of publishes.
    #[arg(long)]
    pub saves: bool,
}

#[derive(Tabled)]
struct VersionRow {
    #[tabled(rename = "version")]
    version: String,
    #[tabled(rename = "state")]
    state: String,
    #[tabled(rename = "modified")]
    modified: String,
    #[tabled(rename = "comment")]
    comment: String,
}

impl From<&VersionEntry> for VersionRow {
    fn from(entry: &VersionEntry) -> Self {
        Self {
            version: format!("v{:03}", entry.version),
            state: entry.state.clone().unwrap_or_else(|| "-".to_string()),
            modified: entry
                .modified
                .with_timezone(&Local)
                .format("%Y-%m-%d %H:%M")
                .to_string(),
            comment: entry.comment.clone().unwrap_or_default(),
        }
    }
}

impl VersionsArgs {
    pub fn run(self, global: &GlobalArgs) -> Result<()> {
        let config = global.config()?;
        let ctx = self.context.resolve(self.file.as_deref())?;
        let resolver = resolver(&config);
        let folder = if self.saves {
            resolver.versions_folder(&ctx)?
        } else {
            resolver.publish_root(&ctx)?
        };

        let entries = list_versions(&folder)
            .with_context(|| format!("failed to list versions in {}", folder.display()))?;
        if global.json {
            return print_json(&entries);
        }

        println!("{} {}", ctx.to_string().bold(), folder.display().to_string().bright_black());
        if entries.is_empty() {
            println!("No versions yet.");
            return Ok(());
        }
        let rows: Vec<VersionRow> = entries.iter().map(VersionRow::from).collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
        Ok(())
    }
}
