//! Shotline core library: domain types, pipeline config, sidecar metadata, errors.
//!
//! Public API surface:
//! - [`types`]: identifiers, [`Context`], [`TechnicalSpec`], [`VersionEntry`], status records
//! - [`config`]: `~/.shotline/config.yaml` load / save
//! - [`sidecar`]: per-file JSON metadata next to managed artifacts
//! - [`error`]: [`CoreError`]

pub mod config;
pub mod error;
pub mod sidecar;
pub mod types;

pub use config::{
    AnchorNames, CacheSettings, DaemonSettings, LayoutSettings, OutputDefaults, ShotlineConfig,
};
pub use error::CoreError;
pub use sidecar::SidecarMeta;
pub use types::{
    Context, FormatOverrides, NamingRules, OutputKind, ProjectId, ShotId, StatusRecord,
    StatusUpdate, StepId, TechnicalSpec, VersionEntry, VersionSlot,
};
