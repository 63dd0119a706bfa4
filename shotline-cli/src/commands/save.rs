//! `shotline save`: versioned backups of the working file.

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;

use shotline_sync::{list_versions, restore_version, save::versions_dir, save_version};

use super::print_json;
use crate::{ContextArgs, GlobalArgs};

#[derive(Args, Debug)]
pub struct SaveArgs {
    /// The working file.
    pub file: PathBuf,

    #[command(flatten)]
    pub context: ContextArgs,

    #[arg(long, default_value = "WIP")]
    pub state: String,

    #[arg(long, short = 'm', default_value = "")]
    pub comment: String,

    /// Copy this saved version over the working file. The current file is backed up first.
    #[arg(long, value_name = "VERSION")]
    pub restore: Option<u32>,
}

#[derive(Serialize)]
struct SaveJson {
    version: u32,
    path: PathBuf,
    sha256: String,
}

#[derive(Serialize)]
struct RestoreJson {
    restored: u32,
    from: PathBuf,
    backup: Option<SaveJson>,
}

impl SaveArgs {
    pub fn run(self, global: &GlobalArgs) -> Result<()> {
        let config = global.config()?;
        let ctx = self.context.resolve(Some(&self.file))?;

        if let Some(wanted) = self.restore {
            let folder = versions_dir(&self.file, &config.layout);
            let entry = list_versions(&folder)
                .with_context(|| format!("failed to list {}", folder.display()))?
                .into_iter()
                .filter(|e| e.version == wanted)
                .last()
                .with_context(|| format!("no saved v{wanted:03} in {}", folder.display()))?;
            let restored = restore_version(&entry, &self.file, &ctx, &config.layout, &self.state)
                .with_context(|| format!("failed to restore v{wanted:03}"))?;

            if global.json {
                return print_json(&RestoreJson {
                    restored: restored.version,
                    from: restored.restored_from,
                    backup: restored.backup.map(|b| SaveJson {
                        version: b.version,
                        path: b.path,
                        sha256: b.sha256,
                    }),
                });
            }
            if let Some(backup) = &restored.backup {
                println!("  backup v{:03}: {}", backup.version, backup.path.display());
            }
            println!("{} Restored v{:03} over {}", "✓".green(), restored.version, self.file.display());
            return Ok(());
        }

        let saved = save_version(&self.file, &ctx, &config.layout, &self.state, &self.comment)
            .with_context(|| format!("failed to save {}", self.file.display()))?;
        if global.json {
            return print_json(&SaveJson {
                version: saved.version,
                path: saved.path,
                sha256: saved.sha256,
            });
        }
        println!("{} Saved v{:03}: {}", "✓".green(), saved.version, saved.path.display());
        Ok(())
    }
}
