//! `shotline outdated`: imported sources with newer published versions.

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use shotline_sync::{ContextEvent, StalenessMonitor};

use super::print_json;
use crate::GlobalArgs;

#[derive(Args, Debug)]
pub struct OutdatedArgs {
    /// Paths the document imports.
    #[arg(required = true)]
    pub sources: Vec<PathBuf>,

    /// The active working file.
    #[arg(long)]
    pub file: Option<PathBuf>,
}

#[derive(Serialize)]
struct OutdatedJson {
    checked: usize,
    stale: Vec<StaleJson>,
}

#[derive(Serialize)]
struct StaleJson {
    path: PathBuf,
    version: u32,
    latest_version: u32,
    latest_state: Option<String>,
}

#[derive(Tabled)]
struct StaleRow {
    #[tabled(rename = "source")]
    source: String,
    #[tabled(rename = "imported")]
    imported: String,
    #[tabled(rename = "latest")]
    latest: String,
}

impl OutdatedArgs {
    pub fn run(self, global: &GlobalArgs) -> Result<()> {
        let config = global.config()?;
        let mut monitor = StalenessMonitor::for_layout(&config.layout);
        let report = monitor
            .on_context_event(ContextEvent::Opened, self.file.as_deref(), &self.sources)
            .context("failed to check imported sources")?;

        if global.json {
            return print_json(&OutdatedJson {
                checked: report.checked,
                stale: report
                    .stale
                    .iter()
                    .map(|s| StaleJson {
                        path: s.source.path.clone(),
                        version: s.source.version,
                        latest_version: s.latest_version,
                        latest_state: s.latest_state.clone(),
                    })
                    .collect(),
            });
        }

        if report.is_clean() {
            println!(
                "{} {} published source(s) checked, all current",
                "✓".green(),
                report.checked
            );
            return Ok(());
        }

        let rows: Vec<StaleRow> = report
            .stale
            .iter()
            .map(|s| StaleRow {
                source: s.source.path.display().to_string(),
                imported: format!("v{:03}", s.source.version),
                latest: match &s.latest_state {
                    Some(state) => format!("v{:03}_{state}", s.latest_version),
                    None => format!("v{:03}", s.latest_version),
                },
            })
            .collect();
        println!(
            "{} {} of {} source(s) outdated",
            "■".yellow().bold(),
            rows.len(),
            report.checked
        );
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
        Ok(())
    }
}
