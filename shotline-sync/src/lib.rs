//! # shotline-sync
//!
//! Version discovery, staleness, versioned saves, scene setup, previews and
//! the publish transaction.
//!
//! [`Publisher::publish`] drives one attempt through
//! `Idle -> Validating -> Rendering -> Archiving -> Registering -> Committed`
//! against a [`ProductionDb`] and a [`shotline_host::HostApp`], and returns a
//! [`PublishReport`] whatever the outcome.

pub mod archive;
pub mod db;
pub mod error;
pub mod preview;
pub mod publish;
mod render;
pub mod save;
pub mod setup;
pub mod staleness;
pub mod versions;

pub use db::ProductionDb;
pub use error::SyncError;
pub use preview::PreviewReport;
pub use publish::{
    compare_specs, update_status_only, FieldMismatch, PublishReport, PublishRequest, PublishState,
    Publisher, RenderFailure, SpecField, Stage, StageRecord, ValidationError,
};
pub use save::{restore_version, save_version, Restored, SavedVersion};
pub use setup::{AnchorSetup, SetupReport};
pub use staleness::{ContextEvent, StaleSource, StalenessMonitor, StalenessReport};
pub use versions::{is_outdated, latest, list_versions, next_version, SourceRef};
