use crate::error::CacheError;
use crate::util::atomic_write;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};

/// Extension of the per-entry metadata document.
pub const METADATA_EXTENSION: &str = "json";

/// On-disk metadata for one cache entry (`<root>/<safe_name>.json`).
///
/// Timestamps are float seconds since the Unix epoch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntryMetadata {
    pub fingerprint: String,
    pub size: u64,
    pub expires_at: Option<f64>,
    pub last_accessed_at: f64,
}

impl EntryMetadata {
    /// `true` once `expires_at` is no longer strictly in the future.
    pub fn is_expired(&self, now_secs: f64) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now_secs)
    }

    pub fn matches(&self, fingerprint: &str) -> bool {
        self.fingerprint == fingerprint
    }

    pub(crate) fn write(&self, path: &Path) -> Result<(), CacheError> {
        let bytes = serde_json::to_vec(self)?;
        atomic_write(path, &bytes)?;
        Ok(())
    }
}

/// Outcome of reading a metadata document.
#[derive(Debug)]
pub(crate) enum MetadataRead {
    Missing,
    /// The file exists but is not a valid metadata document.
    Corrupt(CacheError),
    Present(EntryMetadata),
}

pub(crate) fn read_metadata(path: &Path) -> MetadataRead {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) => {
            if err.kind() != io::ErrorKind::NotFound {
                tracing::debug!(
                    target: "quire.cache",
                    path = %path.display(),
                    error = %err,
                    "failed to read cache metadata"
                );
            }
            return MetadataRead::Missing;
        }
    };
    match serde_json::from_slice::<EntryMetadata>(&bytes) {
        Ok(metadata) => MetadataRead::Present(metadata),
        Err(err) => MetadataRead::Corrupt(CacheError::from(err)),
    }
}

/// A persisted entry as seen when listing the cache root.
///
/// The on-disk schema does not record the logical key, only the safe name
/// derived from it.
#[derive(Clone, Debug, PartialEq)]
pub struct CacheEntry {
    pub name: String,
    pub fingerprint: String,
    pub size_bytes: u64,
    /// Seconds since the Unix epoch; `None` never expires by TTL.
    pub expires_at: Option<f64>,
    /// Seconds since the Unix epoch.
    pub last_accessed_at: f64,
    pub payload_path: PathBuf,
    pub metadata_path: PathBuf,
}

impl CacheEntry {
    pub(crate) fn from_metadata(
        name: String,
        metadata: EntryMetadata,
        payload_path: PathBuf,
        metadata_path: PathBuf,
    ) -> Self {
        Self {
            name,
            fingerprint: metadata.fingerprint,
            size_bytes: metadata.size,
            expires_at: metadata.expires_at,
            last_accessed_at: metadata.last_accessed_at,
            payload_path,
            metadata_path,
        }
    }
}

/// The value handed back by [`crate::DiskCache::fetch`].
#[derive(Clone, Debug, PartialEq)]
pub struct CachedArtifact {
    pub key: String,
    pub fingerprint: String,
    /// Location of the payload inside the cache root.
    pub path: PathBuf,
    pub size_bytes: u64,
    /// `true` for a hit, `false` when the artifact was generated by this call.
    pub cached: bool,
    pub expires_at: Option<f64>,
}
