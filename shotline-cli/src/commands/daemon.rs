//! `shotline daemon`: reach the production daemon, or stand in for it.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context as _, Result};
use clap::{Args, Subcommand};
use colored::Colorize;
use serde_json::json;

use shotline_daemon::{stub, StubDatabase, StubOptions};

use super::{print_json, production};
use crate::GlobalArgs;

#[derive(Subcommand, Debug)]
pub enum DaemonCommand {
    /// Check that the daemon answers.
    Ping,
    /// Serve a YAML-seeded stand-in daemon in the foreground.
    Stub(StubArgs),
}

#[derive(Args, Debug)]
pub struct StubArgs {
    /// YAML seed with users, states, specs, naming rules and statuses.
    #[arg(long)]
    pub seed: Option<PathBuf>,

    /// Listen address. Defaults to the configured daemon host and port.
    #[arg(long, value_name = "ADDR")]
    pub listen: Option<String>,

    /// Delay every response, to exercise client timeouts.
    #[arg(long, value_name = "MS")]
    pub delay_ms: Option<u64>,
}

pub fn run(command: DaemonCommand, global: &GlobalArgs) -> Result<()> {
    let config = global.config()?;
    let addr = format!("{}:{}", config.daemon.host, config.daemon.port);

    match command {
        DaemonCommand::Ping => {
            let started = Instant::now();
            production(&config)
                .ping()
                .with_context(|| format!("daemon at {addr} did not answer"))?;
            let elapsed_ms = started.elapsed().as_millis();
            if global.json {
                print_json(&json!({ "reachable": true, "addr": addr, "elapsed_ms": elapsed_ms }))?;
            } else {
                println!("{} daemon at {addr} answered in {elapsed_ms} ms", "✓".green());
            }
        }
        DaemonCommand::Stub(args) => {
            let db = match &args.seed {
                Some(path) => StubDatabase::load(path)
                    .with_context(|| format!("failed to load stub seed {}", path.display()))?,
                None => StubDatabase::default(),
            };
            let mut options = StubOptions::default();
            if let Some(ms) = args.delay_ms {
                options = options.with_delay(Duration::from_millis(ms));
            }
            let listen = args.listen.unwrap_or(addr);
            stub::start_blocking(&listen, db, options).context("stub daemon exited with error")?;
        }
    }
    Ok(())
}
