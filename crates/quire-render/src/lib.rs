//! Render pipeline in front of [`quire_cache::DiskCache`].
//!
//! A [`Renderable`] describes a document: a stable cache key, cheap
//! fingerprint inputs, and an HTML view. [`RenderPipeline::render`] checks that
//! the external [`Converter`] can run, fingerprints the renderable, and either
//! serves the cached artifact or renders the HTML, converts it and stores the
//! result.
//!
//! Failures come in two kinds only ([`RenderError`]): the converter is missing
//! from the environment, or this artifact could not be produced. Scratch files
//! are removed on every path through the pipeline.

mod context;
mod converter;
mod error;
mod fingerprint;
mod output;
mod pipeline;
pub mod process;
mod renderable;
mod temp;

pub use context::RenderContext;
pub use converter::{
    CommandConverter, ConversionFailure, Converter, MediaType, RenderOptions,
    CONVERTER_DEPENDENCY, DEFAULT_CONVERT_TIMEOUT, DEFAULT_DPI, DEFAULT_MARGIN_MM,
    DEFAULT_MAX_OUTPUT_BYTES, DEFAULT_PAGE_SIZE,
};
pub use error::RenderError;
pub use fingerprint::{FingerprintComputer, FingerprintInputs, ABSENT};
pub use output::{Cleanup, RenderOutput};
pub use pipeline::RenderPipeline;
pub use renderable::Renderable;
pub use temp::TempArtifact;

pub use quire_cache::Fingerprint;
pub use tokio_util::sync::CancellationToken;
