pub mod daemon;
pub mod outdated;
pub mod preview;
pub mod publish;
pub mod resolve;
pub mod save;
pub mod setup;
pub mod status;
pub mod versions;

use std::thread;

use anyhow::{Context as _, Result};
use serde::Serialize;

use shotline_core::{Context, NamingRules, ShotlineConfig};
use shotline_daemon::Production;
use shotline_host::CancelToken;
use shotline_resolver::PathResolver;
use shotline_sync::ProductionDb;

pub fn production(config: &ShotlineConfig) -> Production {
    Production::from_settings(&config.daemon, &config.cache)
}

pub fn resolver(config: &ShotlineConfig) -> PathResolver {
    PathResolver::new(&config.layout, &config.outputs)
}

/// Naming rules of the step; a step the daemon does not know uses the defaults.
pub fn naming_rules(db: &impl ProductionDb, ctx: &Context) -> Result<NamingRules> {
    match db.naming_rules(&ctx.project, &ctx.step) {
        Ok(rules) => Ok(rules),
        Err(err) if err.is_not_found() => {
            tracing::warn!(project = %ctx.project, step = %ctx.step, "no naming rules, using defaults");
            Ok(NamingRules::default())
        }
        Err(err) => Err(err)
            .with_context(|| format!("failed to fetch naming rules for {}/{}", ctx.project, ctx.step)),
    }
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("failed to serialize JSON output")?
    );
    Ok(())
}

/// Cancel `token` when the process receives ctrl-c.
///
/// The handler stays installed until exit, so a second ctrl-c does not
/// interrupt the rollback of a cancelled render.
pub fn cancel_on_ctrl_c(token: &CancelToken) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_io()
        .build()
        .context("failed to start the signal runtime")?;
    let token = token.clone();
    thread::Builder::new()
        .name("shotline-ctrl-c".into())
        .spawn(move || {
            runtime.block_on(async {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => {
                        tracing::warn!("received ctrl-c, cancelling");
                        token.cancel();
                    }
                    Err(err) => tracing::warn!(error = %err, "ctrl-c handler failed"),
                }
            })
        })
        .context("failed to spawn the ctrl-c thread")?;
    Ok(())
}
