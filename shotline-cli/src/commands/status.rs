//! `shotline status`: production status of a step, read or set.

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use shotline_core::{StatusRecord, StatusUpdate};
use shotline_sync::update_status_only;

use super::{print_json, production};
use crate::{ContextArgs, GlobalArgs};

#[derive(Args, Debug)]
pub struct StatusArgs {
    #[command(flatten)]
    pub context: ContextArgs,

    /// Managed file to detect the context from.
    #[arg(long)]
    pub file: Option<PathBuf>,

    /// Commit this state without publishing.
    #[arg(long, value_name = "STATE")]
    pub set: Option<String>,

    #[arg(long, short = 'm', default_value = "", requires = "set")]
    pub comment: String,

    /// Version to record. Defaults to the current one.
    #[arg(long = "version-number", short = 'n', value_name = "N", requires = "set")]
    pub version: Option<u32>,

    #[arg(long, requires = "set")]
    pub completion: Option<u8>,
}

#[derive(Tabled)]
struct StatusRow {
    #[tabled(rename = "step")]
    step: String,
    #[tabled(rename = "state")]
    state: String,
    #[tabled(rename = "version")]
    version: String,
    #[tabled(rename = "done")]
    completion: String,
    #[tabled(rename = "published")]
    published: String,
    #[tabled(rename = "comment")]
    comment: String,
}

impl StatusArgs {
    pub fn run(self, global: &GlobalArgs) -> Result<()> {
        let config = global.config()?;
        let ctx = self.context.resolve(self.file.as_deref())?;
        let db = production(&config);

        if let Some(state) = self.set {
            let current = match db.status(&ctx) {
                Ok(record) => Some(record),
                Err(err) if err.is_not_found() => None,
                Err(err) => {
                    return Err(err).with_context(|| format!("failed to read the status of {ctx}"))
                }
            };
            let update = StatusUpdate {
                state,
                comment: self.comment,
                version: self
                    .version
                    .or_else(|| current.as_ref().map(|r| r.version))
                    .unwrap_or(0),
                completion: self
                    .completion
                    .or_else(|| current.as_ref().map(|r| r.completion))
                    .unwrap_or(0)
                    .min(100),
                published: false,
            };
            update_status_only(&db, &ctx, &update)
                .with_context(|| format!("failed to update the status of {ctx}"))?;
        }

        let record = db
            .status(&ctx)
            .with_context(|| format!("failed to read the status of {ctx}"))?;
        if global.json {
            return print_json(&record);
        }
        print_table(&ctx.to_string(), &record);
        Ok(())
    }
}

fn state_label(state: &str) -> String {
    match state.to_ascii_uppercase().as_str() {
        "OK" | "APPROVED" => state.green().bold().to_string(),
        "REV" | "RETAKE" => state.red().bold().to_string(),
        _ => state.yellow().bold().to_string(),
    }
}

fn print_table(step: &str, record: &StatusRecord) {
    let row = StatusRow {
        step: step.to_string(),
        state: state_label(&record.state),
        version: format!("v{:03}", record.version),
        completion: format!("{}%", record.completion),
        published: if record.published { "yes" } else { "no" }.to_string(),
        comment: record.comment.clone(),
    };
    let mut table = Table::new([row]);
    table.with(Style::rounded());
    println!("{table}");
    if let Some(user) = &record.user {
        println!("{}", format!("last change by {user}").bright_black());
    }
}
