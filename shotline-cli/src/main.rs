//! Shotline: pipeline paths, versions and publishes from the command line.
//!
//! # Usage
//!
//! ```text
//! shotline resolve -p PROJ -s SH010 --step COMP [--kind final] [--version 3] [--frame 7]
//! shotline versions -p PROJ -s SH010 --step COMP [--saves]
//! shotline outdated <sources>... [--file <working file>]
//! shotline publish <scene manifest> [--state WIP] [--comment ..] [--preset <saver.setting>]
//! shotline save <working file> [--state WIP] [--comment ..] [--restore <version>]
//! shotline status -p PROJ -s SH010 --step COMP [--set REV --comment ..]
//! shotline daemon ping|stub
//! ```
//!
//! `--host`, `--port`, `--timeout-ms` and `--json` apply to every command.

mod commands;

use std::path::Path;

use anyhow::{Context as _, Result};
use clap::{Args, Parser, Subcommand};

use shotline_core::{config, Context, ShotlineConfig};
use shotline_host::detect_context;

use commands::{
    daemon::DaemonCommand, outdated::OutdatedArgs, preview::PreviewArgs, publish::PublishArgs,
    resolve::ResolveArgs, save::SaveArgs, setup::SetupArgs, status::StatusArgs,
    versions::VersionsArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "shotline",
    version,
    about = "Resolve, version and publish shot work against the production daemon",
    long_about = None,
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the output path for a context.
    Resolve(ResolveArgs),

    /// List published versions (or working-file saves) of a step.
    Versions(VersionsArgs),

    /// Report imported sources that have newer published versions.
    Outdated(OutdatedArgs),

    /// Apply the shot settings to a scene and create its output anchors.
    Setup(SetupArgs),

    /// Render the preview movie of a scene.
    Preview(PreviewArgs),

    /// Validate, render, archive and register a new published version.
    Publish(PublishArgs),

    /// Back up the working file as a new version, or restore an old one.
    Save(SaveArgs),

    /// Show or change the production status of a step.
    Status(StatusArgs),

    /// Talk to, or stand in for, the production daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
}

/// Flags shared by every command.
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Daemon host, overriding `daemon.host`.
    #[arg(long, global = true)]
    pub host: Option<String>,

    /// Daemon port, overriding `daemon.port`.
    #[arg(long, global = true)]
    pub port: Option<u16>,

    /// Per-call daemon timeout, overriding `daemon.timeout_ms`.
    #[arg(long = "timeout-ms", global = true, value_name = "MS")]
    pub timeout_ms: Option<u64>,

    /// Emit machine-readable JSON.
    #[arg(long, global = true)]
    pub json: bool,
}

impl GlobalArgs {
    /// `~/.shotline/config.yaml` with the flag overrides applied.
    pub fn config(&self) -> Result<ShotlineConfig> {
        let home = dirs::home_dir().context("could not determine home directory")?;
        let mut config = config::load_at(&home).context("failed to load shotline config")?;
        if let Some(host) = &self.host {
            config.daemon.host = host.clone();
        }
        if let Some(port) = self.port {
            config.daemon.port = port;
        }
        if let Some(timeout_ms) = self.timeout_ms {
            config.daemon.timeout_ms = timeout_ms;
        }
        Ok(config)
    }
}

// ---------------------------------------------------------------------------
// Shared context selection
// ---------------------------------------------------------------------------

/// Explicit context selection. Missing parts are taken from a managed file name.
#[derive(Args, Debug, Clone, Default)]
pub struct ContextArgs {
    #[arg(long, short = 'p')]
    pub project: Option<String>,

    #[arg(long)]
    pub sequence: Option<String>,

    #[arg(long, short = 's')]
    pub shot: Option<String>,

    #[arg(long)]
    pub step: Option<String>,

    /// Artist recorded in sidecars.
    #[arg(long, env = "SHOTLINE_USER")]
    pub user: Option<String>,
}

impl ContextArgs {
    pub fn resolve(&self, file: Option<&Path>) -> Result<Context> {
        let detected = file.and_then(detect_context).map(|identity| identity.context);
        let pick = |explicit: &Option<String>, part: fn(&Context) -> String, flag: &str| {
            explicit
                .clone()
                .or_else(|| detected.as_ref().map(part))
                .with_context(|| {
                    format!("missing --{flag} (no context could be detected from a file name)")
                })
        };

        let project = pick(&self.project, |c| c.project.to_string(), "project")?;
        let shot = pick(&self.shot, |c| c.shot.to_string(), "shot")?;
        let step = pick(&self.step, |c| c.step.to_string(), "step")?;

        let mut ctx = Context::new(project, shot, step);
        if let Some(sequence) = self
            .sequence
            .clone()
            .or_else(|| detected.as_ref().and_then(|c| c.sequence.clone()))
        {
            ctx = ctx.with_sequence(sequence);
        }
        if let Some(user) = &self.user {
            ctx = ctx.with_user(user.clone());
        }
        Ok(ctx)
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    if !matches!(cli.command, Commands::Daemon { .. }) {
        init_tracing();
    }
    let global = cli.global;
    match cli.command {
        Commands::Resolve(args) => args.run(&global),
        Commands::Versions(args) => args.run(&global),
        Commands::Outdated(args) => args.run(&global),
        Commands::Setup(args) => args.run(&global),
        Commands::Preview(args) => args.run(&global),
        Commands::Publish(args) => args.run(&global),
        Commands::Save(args) => args.run(&global),
        Commands::Status(args) => args.run(&global),
        Commands::Daemon { command } => commands::daemon::run(command, &global),
    }
}
