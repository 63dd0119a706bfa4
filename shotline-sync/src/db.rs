//! The production database as the publish workflow sees it.

use shotline_core::{Context, NamingRules, ProjectId, StatusRecord, StatusUpdate, StepId, TechnicalSpec};
use shotline_daemon::{DaemonError, Production};

/// Reads and the one write the publish workflow performs.
///
/// [`Production`] is the real implementation; tests may substitute their own.
pub trait ProductionDb {
    fn technical_spec(&self, ctx: &Context) -> Result<TechnicalSpec, DaemonError>;

    fn naming_rules(&self, project: &ProjectId, step: &StepId) -> Result<NamingRules, DaemonError>;

    fn status(&self, ctx: &Context) -> Result<StatusRecord, DaemonError>;

    fn update_status(&self, ctx: &Context, update: &StatusUpdate) -> Result<(), DaemonError>;
}

impl ProductionDb for Production {
    fn technical_spec(&self, ctx: &Context) -> Result<TechnicalSpec, DaemonError> {
        Production::technical_spec(self, ctx)
    }

    fn naming_rules(&self, project: &ProjectId, step: &StepId) -> Result<NamingRules, DaemonError> {
        Production::naming_rules(self, project, step)
    }

    fn status(&self, ctx: &Context) -> Result<StatusRecord, DaemonError> {
        Production::status(self, ctx)
    }

    fn update_status(&self, ctx: &Context, update: &StatusUpdate) -> Result<(), DaemonError> {
        Production::update_status(self, ctx, update)
    }
}

/// Naming rules of the step, or the defaults when the daemon knows none.
/// The fallback is noted in `diagnostics`.
pub(crate) fn naming_rules_or_default<D: ProductionDb + ?Sized>(
    db: &D,
    ctx: &Context,
    diagnostics: &mut Vec<String>,
) -> Result<NamingRules, DaemonError> {
    match db.naming_rules(&ctx.project, &ctx.step) {
        Ok(rules) => Ok(rules),
        Err(e) if e.is_not_found() => {
            diagnostics.push(format!(
                "no naming rules for {}/{}, using defaults",
                ctx.project, ctx.step
            ));
            Ok(NamingRules::default())
        }
        Err(e) => Err(e),
    }
}
