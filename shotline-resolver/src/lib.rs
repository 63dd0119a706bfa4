//! # shotline-resolver
//!
//! Pure path resolution: step roots from a tera template, canonical output
//! names, frame padding, format/codec override chains.
//!
//! ```rust,no_run
//! use shotline_core::{Context, NamingRules, OutputKind, ShotlineConfig, TechnicalSpec, VersionSlot};
//! use shotline_resolver::PathResolver;
//!
//! fn first_frame(config: &ShotlineConfig, spec: &TechnicalSpec, rules: &NamingRules) {
//!     let resolver = PathResolver::new(&config.layout, &config.outputs);
//!     let ctx = Context::new("PROJ", "SH010", "COMP");
//!     let slot = VersionSlot::new(3, "WIP");
//!     if let Ok(path) = resolver.resolve(&ctx, spec, rules, OutputKind::Final, &slot, Some(spec.start_frame)) {
//!         println!("{}", path.display());
//!     }
//! }
//! ```

pub mod context;
pub mod error;
pub mod formats;
pub mod frames;
pub mod resolver;

pub use context::LayoutContext;
pub use error::ResolutionError;
pub use frames::{frame_token, parse_frame, SequencePattern};
pub use resolver::{
    check_frame, context_base, version_file_name, OutputTarget, PathResolver, ResolvedFormat,
};
