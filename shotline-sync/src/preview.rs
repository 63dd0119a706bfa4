//! Preview renders.
//!
//! A preview renders the preview anchor over the shot range into the step's
//! preview folder, replacing the previous preview. Nothing is versioned and
//! the production database is only read.

use std::fs;
use std::path::PathBuf;

use shotline_core::{Context, OutputKind, VersionSlot};
use shotline_host::{CancelToken, HostApp, RenderJob};

use crate::db::{naming_rules_or_default, ProductionDb};
use crate::error::{io_err, SyncError};
use crate::publish::{compare_specs, default_config, Publisher, ValidationError};
use crate::render::{check_outcome, ready_anchor, render_anchor, verify_outputs};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreviewReport {
    /// Verified preview files, usually one movie.
    pub outputs: Vec<PathBuf>,
    pub diagnostics: Vec<String>,
}

impl Publisher {
    /// Render the preview anchor and verify the result.
    ///
    /// A failed render removes what it wrote, so no half-written preview is
    /// left in place of the previous one.
    pub fn preview<D, H>(
        &self,
        db: &D,
        host: &mut H,
        ctx: &Context,
        cancel: &CancelToken,
    ) -> Result<PreviewReport, SyncError>
    where
        D: ProductionDb + ?Sized,
        H: HostApp + ?Sized,
    {
        tracing::info!(context = %ctx, "preview started");
        let mut report = PreviewReport::default();

        host.current_file()
            .filter(|path| path.is_file())
            .ok_or(SyncError::NoWorkingFile)?;
        let spec = db.technical_spec(ctx)?;
        let actual = host.current_spec().ok_or(SyncError::NoHostSpec)?;
        let mismatches = compare_specs(&spec, &actual);
        if !mismatches.is_empty() {
            return Err(ValidationError { mismatches }.into());
        }

        let anchor = self.anchors().name(OutputKind::Preview).to_string();
        ready_anchor(host, &anchor)?;
        let rules = naming_rules_or_default(db, ctx, &mut report.diagnostics)?;

        let resolver = self.resolver();
        let slot = VersionSlot::new(0, "");
        let format = resolver.output_format(OutputKind::Preview, &rules)?;
        let target = resolver.output_target(ctx, &spec, &rules, OutputKind::Preview, &slot)?;
        let expected = resolver.expected_outputs(ctx, &spec, &rules, OutputKind::Preview, &slot)?;

        let folder = target.folder();
        fs::create_dir_all(&folder).map_err(|e| io_err(&folder, e))?;
        host.configure_anchor(&anchor, &default_config(target.node_path(), &format))?;

        let job = RenderJob {
            anchor,
            start_frame: spec.start_frame,
            end_frame: spec.end_frame,
        };
        let outcome = render_anchor(host, &job, cancel)?;
        let checked = check_outcome(&outcome, cancel).and_then(|()| verify_outputs(&expected));
        if let Err(failure) = checked {
            for path in outcome.written.iter().chain(&expected) {
                match fs::remove_file(path) {
                    Ok(()) => tracing::debug!(path = %path.display(), "removed partial preview"),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "failed to remove partial preview")
                    }
                }
            }
            tracing::warn!(context = %ctx, error = %failure, "preview failed");
            return Err(failure.into());
        }

        tracing::info!(context = %ctx, files = expected.len(), "preview rendered");
        report.outputs = expected;
        Ok(report)
    }
}
