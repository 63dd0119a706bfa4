//! Production daemon access: wire protocol, blocking client, metadata cache,
//! typed production API and a stand-in daemon server.

pub mod api;
pub mod cache;
pub mod client;
mod error;
pub mod protocol;
pub mod stub;

pub use api::Production;
pub use cache::MetadataCache;
pub use client::DaemonClient;
pub use error::DaemonError;
pub use protocol::{DaemonRequest, DaemonResponse, ResponseStatus};
pub use stub::{StubDatabase, StubHandle, StubOptions};
