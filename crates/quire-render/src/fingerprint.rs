//! Deterministic content fingerprints for renderables.
//!
//! A fingerprint is the SHA-256 of an ordered tuple of cheap signals (ids,
//! collection sizes, latest timestamps, status flags). Any change to one of
//! those signals changes the digest, so a stored artifact is invalidated
//! without anyone having to delete it.

use std::fmt::{self, Write as _};

use anyhow::Context as _;
use quire_cache::Fingerprint;

use crate::Renderable;

/// Stand-in value for an absent relation or an empty collection's timestamp.
pub const ABSENT: &str = "~";

const FIELD_SEPARATOR: char = '|';

/// Ordered fingerprint tuple, built field by field.
///
/// Field order is significant: two builders that add the same fields in a
/// different order produce different fingerprints.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FingerprintInputs {
    version: String,
    fields: Vec<(String, Option<String>)>,
}

impl FingerprintInputs {
    /// Start a tuple with a format/version tag. Bumping the tag invalidates
    /// every artifact rendered under the old one.
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            fields: Vec::new(),
        }
    }

    /// Identity of a related record, or [`ABSENT`] when the relation is missing.
    pub fn identity(self, name: &str, id: Option<u64>) -> Self {
        self.push(name, id.map(|id| id.to_string()))
    }

    /// A free-form value, or [`ABSENT`] when missing.
    pub fn value(self, name: &str, value: Option<&str>) -> Self {
        self.push(name, value.map(str::to_string))
    }

    /// Modification time of a single related record, or [`ABSENT`].
    pub fn timestamp(self, name: &str, at: Option<u64>) -> Self {
        self.push(&format!("{name}.updated_at"), at.map(|ts| ts.to_string()))
    }

    /// Volatility signal for a collection: its size and its most recent
    /// modification timestamp.
    pub fn collection(self, name: &str, count: usize, latest: Option<u64>) -> Self {
        self.push(&format!("{name}.count"), Some(count.to_string()))
            .push(&format!("{name}.latest"), latest.map(|ts| ts.to_string()))
    }

    /// Same as [`Self::collection`], computing count and maximum from the
    /// per-record timestamps.
    pub fn collection_of<I>(self, name: &str, timestamps: I) -> Self
    where
        I: IntoIterator<Item = u64>,
    {
        let (count, latest) = timestamps
            .into_iter()
            .fold((0usize, None::<u64>), |(count, latest), ts| {
                (count + 1, Some(latest.map_or(ts, |prev| prev.max(ts))))
            });
        self.collection(name, count, latest)
    }

    pub fn flag(self, name: &str, value: bool) -> Self {
        self.push(name, Some(value.to_string()))
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// The canonical `|`-joined form that gets hashed.
    pub fn canonical(&self) -> String {
        let mut out = String::new();
        push_escaped(&mut out, &self.version);
        for (name, value) in &self.fields {
            out.push(FIELD_SEPARATOR);
            push_escaped(&mut out, name);
            out.push('=');
            match value {
                Some(value) => push_escaped(&mut out, value),
                None => out.push_str(ABSENT),
            }
        }
        out
    }

    pub fn digest(&self) -> Fingerprint {
        Fingerprint::from_bytes(self.canonical())
    }

    fn push(mut self, name: &str, value: Option<String>) -> Self {
        self.fields.push((name.to_string(), value));
        self
    }
}

impl fmt::Display for FingerprintInputs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

// Separators and the sentinel inside values would otherwise let two distinct
// tuples share a canonical form.
fn push_escaped(out: &mut String, raw: &str) {
    for ch in raw.chars() {
        match ch {
            '\\' | '|' | '=' | '~' => {
                let _ = write!(out, "\\{ch}");
            }
            _ => out.push(ch),
        }
    }
}

/// Computes fingerprints from a renderable's declared inputs.
#[derive(Clone, Copy, Debug, Default)]
pub struct FingerprintComputer;

impl FingerprintComputer {
    pub fn new() -> Self {
        Self
    }

    pub fn compute(&self, renderable: &dyn Renderable) -> anyhow::Result<Fingerprint> {
        self.compute_with_settings(renderable, "")
    }

    /// Same as [`Self::compute`], with converter settings appended as a final
    /// `converter` field when non-empty.
    pub fn compute_with_settings(
        &self,
        renderable: &dyn Renderable,
        settings: &str,
    ) -> anyhow::Result<Fingerprint> {
        let mut inputs = renderable
            .fingerprint_inputs()
            .with_context(|| format!("collecting fingerprint inputs for {}", renderable.cache_key()))?;
        if !settings.is_empty() {
            inputs = inputs.value("converter", Some(settings));
        }
        let fingerprint = inputs.digest();
        tracing::trace!(
            target: "quire.render",
            key = %renderable.cache_key(),
            fingerprint = %fingerprint.prefix(12),
            fields = inputs.len(),
            "computed fingerprint"
        );
        Ok(fingerprint)
    }
}
