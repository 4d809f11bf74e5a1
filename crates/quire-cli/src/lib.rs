//! Documents rendered by the `quire` binary.
//!
//! The binary itself (`src/main.rs`) only wires configuration, the cache and
//! the render pipeline together; the renderables it exports live here so they
//! can be unit tested without spawning a converter.

pub mod report;
pub mod snapshot;

pub use report::{CompositeReport, REPORT_FORMAT_VERSION};
pub use snapshot::Snapshot;
