//! Disk-backed, fingerprint-validated artifact cache.
//!
//! Artifacts are addressed by a logical key (stable across content changes) and
//! validated by a fingerprint supplied by the caller on every lookup. A stored
//! entry is served only while its fingerprint matches and its optional TTL has
//! not run out; otherwise the caller's generator runs and the new artifact
//! replaces the old one.
//!
//! ## On-disk layout
//!
//! Everything lives directly under the cache root:
//! - `<safe_name>.json`: [`EntryMetadata`] (`fingerprint`, `size`, `expires_at`,
//!   `last_accessed_at`, timestamps in float epoch seconds)
//! - `<safe_name>.pdf`: the payload (extension configurable)
//!
//! `safe_name` is produced by [`safe_name`]: a sanitized, truncated copy of the
//! key followed by a prefix of the key's SHA-256 digest.
//!
//! ## Retention
//!
//! Every fetch starts with a sweep that drops expired, corrupt and orphaned
//! files. Every write ends with [`CacheLimits`] enforcement, evicting entries by
//! least recent access until both the entry count and total size fit.

mod clock;
mod disk_cache;
mod entry;
mod error;
mod fingerprint;
mod naming;
mod util;

pub use clock::{Clock, ManualClock, SystemClock};
pub use disk_cache::{
    CacheLimits, CacheStats, DiskCache, EvictionReport, SweepReport, DEFAULT_MAX_BYTES,
    DEFAULT_MAX_ENTRIES, DEFAULT_PAYLOAD_EXTENSION,
};
pub use entry::{CacheEntry, CachedArtifact, EntryMetadata, METADATA_EXTENSION};
pub use error::{CacheError, Result};
pub use fingerprint::Fingerprint;
pub use naming::{safe_name, SAFE_NAME_DIGEST_LEN, SAFE_NAME_PREFIX_LEN};
pub use util::{atomic_write, move_file};
