//! Rendering one output anchor and checking what it wrote.

use std::fs;
use std::path::PathBuf;

use shotline_host::{AnchorNode, CancelToken, HostApp, RenderJob, RenderOutcome, RenderStatus};

use crate::error::SyncError;
use crate::publish::RenderFailure;

/// The anchor named `name`, present and connected.
pub(crate) fn ready_anchor<H: HostApp + ?Sized>(host: &H, name: &str) -> Result<AnchorNode, SyncError> {
    let anchor = host
        .find_anchor(name)
        .ok_or_else(|| SyncError::AnchorMissing {
            name: name.to_string(),
        })?;
    if anchor.disconnected {
        return Err(SyncError::AnchorDisconnected {
            name: name.to_string(),
        });
    }
    Ok(anchor)
}

/// Render `job`. A bypassed anchor is enabled for the render and bypassed again afterwards.
pub(crate) fn render_anchor<H: HostApp + ?Sized>(
    host: &mut H,
    job: &RenderJob,
    cancel: &CancelToken,
) -> Result<RenderOutcome, SyncError> {
    let bypassed = host
        .find_anchor(&job.anchor)
        .is_some_and(|anchor| anchor.pass_through);
    if bypassed {
        host.set_pass_through(&job.anchor, false)?;
    }
    let outcome = host.render(job, cancel);
    if bypassed {
        if let Err(e) = host.set_pass_through(&job.anchor, true) {
            tracing::warn!(anchor = %job.anchor, error = %e, "failed to bypass anchor after render");
        }
    }
    Ok(outcome?)
}

/// Map a finished render to success or the reason it must not be kept.
pub(crate) fn check_outcome(outcome: &RenderOutcome, cancel: &CancelToken) -> Result<(), RenderFailure> {
    match &outcome.status {
        RenderStatus::Completed if cancel.is_cancelled() => Err(RenderFailure::Cancelled),
        RenderStatus::Completed => Ok(()),
        RenderStatus::Cancelled => Err(RenderFailure::Cancelled),
        RenderStatus::Failed { exit_code, message } => Err(RenderFailure::Exited {
            exit_code: *exit_code,
            message: message.clone(),
        }),
    }
}

/// Every expected file must exist and be non-empty.
pub(crate) fn verify_outputs(expected: &[PathBuf]) -> Result<(), RenderFailure> {
    let mut missing = Vec::new();
    let mut empty = Vec::new();
    for path in expected {
        match fs::metadata(path) {
            Ok(meta) if meta.len() == 0 => empty.push(path.clone()),
            Ok(_) => {}
            Err(_) => missing.push(path.clone()),
        }
    }
    if missing.is_empty() && empty.is_empty() {
        return Ok(());
    }
    Err(RenderFailure::Incomplete { missing, empty })
}

impl RenderFailure {
    /// Offending files of an incomplete render, missing first.
    pub fn bad_outputs(&self) -> Vec<&PathBuf> {
        match self {
            RenderFailure::Incomplete { missing, empty } => missing.iter().chain(empty).collect(),
            _ => Vec::new(),
        }
    }
}
