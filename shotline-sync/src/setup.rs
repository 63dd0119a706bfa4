//! Scene setup: bring the open document in line with production data.
//!
//! The document receives the shot's technical settings, and both output
//! anchors are created where missing, pointed at their resolved paths and
//! bypassed. Renders enable an anchor only for their own duration.

use std::path::PathBuf;

use serde::Serialize;

use shotline_core::{Context, OutputKind, TechnicalSpec, VersionSlot};
use shotline_host::HostApp;

use crate::db::{naming_rules_or_default, ProductionDb};
use crate::error::SyncError;
use crate::publish::{default_config, Publisher};
use crate::versions;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnchorSetup {
    pub name: String,
    pub kind: OutputKind,
    pub path: PathBuf,
    pub format: String,
    /// False when the node already existed and was only reconfigured.
    pub created: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SetupReport {
    pub spec: TechnicalSpec,
    pub anchors: Vec<AnchorSetup>,
    pub diagnostics: Vec<String>,
}

impl Publisher {
    /// Apply the shot spec and configure both output anchors.
    ///
    /// The final anchor points at the next free version with `state`; a
    /// publish reconfigures it anyway. No folder is created.
    pub fn setup_scene<D, H>(
        &self,
        db: &D,
        host: &mut H,
        ctx: &Context,
        state: &str,
    ) -> Result<SetupReport, SyncError>
    where
        D: ProductionDb + ?Sized,
        H: HostApp + ?Sized,
    {
        let mut diagnostics = Vec::new();
        let spec = db.technical_spec(ctx)?;
        host.apply_spec(&spec)?;
        let rules = naming_rules_or_default(db, ctx, &mut diagnostics)?;

        let resolver = self.resolver();
        let version = versions::next_version(&resolver.publish_root(ctx)?)?;
        let slot = VersionSlot::new(version, state);

        let mut anchors = Vec::new();
        for kind in [OutputKind::Preview, OutputKind::Final] {
            let name = self.anchors().name(kind).to_string();
            let created = host.find_anchor(&name).is_none();
            if created {
                host.create_anchor(&name, kind)?;
            }
            let format = resolver.output_format(kind, &rules)?;
            let path = resolver.output_target(ctx, &spec, &rules, kind, &slot)?.node_path();
            host.configure_anchor(&name, &default_config(path.clone(), &format))?;
            host.set_pass_through(&name, true)?;
            tracing::info!(anchor = %name, kind = %kind, path = %path.display(), created, "anchor set up");
            anchors.push(AnchorSetup {
                name,
                kind,
                path,
                format: format.format,
                created,
            });
        }

        Ok(SetupReport {
            spec,
            anchors,
            diagnostics,
        })
    }
}
