//! Host-application integration for shotline.
//!
//! The publish workflow never talks to an authoring tool directly. It sees
//! the [`HostApp`] trait: current file, output anchors, node configuration,
//! renders and modal prompts. [`CommandHost`] implements it headlessly for
//! batch use and tests.
//!
//! Two helpers sit beside the trait: [`context`] reads a pipeline context
//! out of a managed file name, and [`preset`] turns a saver node copied out
//! of the host into a typed [`RenderPreset`].

pub mod command_host;
pub mod context;
mod error;
pub mod host;
pub mod preset;

pub use command_host::{CommandHost, SceneManifest};
pub use context::{
    check_project, detect_context, normalize_path, parse_version_token, FileIdentity, ProjectCheck,
};
pub use error::HostError;
pub use host::{
    AnchorConfig, AnchorNode, CancelToken, Choice, HostApp, Prompt, RenderJob, RenderOutcome,
    RenderStatus,
};
pub use preset::{extract_block, parse_lua, parse_saver_node, LuaTable, LuaValue, RenderPreset};
