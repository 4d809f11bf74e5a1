use crate::clock::{Clock, SystemClock};
use crate::entry::{
    read_metadata, CacheEntry, CachedArtifact, EntryMetadata, MetadataRead, METADATA_EXTENSION,
};
use crate::error::CacheError;
use crate::naming::safe_name;
use crate::util::{move_file, remove_file_best_effort, TMP_MARKER};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_MAX_ENTRIES: usize = 50;
pub const DEFAULT_MAX_BYTES: u64 = 250 * 1024 * 1024;
pub const DEFAULT_PAYLOAD_EXTENSION: &str = "pdf";

/// Retention budget enforced after every write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheLimits {
    /// Maximum number of entries kept on disk.
    pub max_entries: usize,
    /// Maximum aggregate payload size in bytes.
    pub max_bytes: u64,
}

impl Default for CacheLimits {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
            max_bytes: DEFAULT_MAX_BYTES,
        }
    }
}

/// What a cleanup sweep removed.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Entries whose `expires_at` had passed.
    pub expired: usize,
    /// Metadata documents that failed to parse.
    pub corrupt: usize,
    /// Payloads without metadata, metadata without payloads, and leftover temp files.
    pub orphaned: usize,
}

/// What a limit enforcement pass evicted, oldest access first.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct EvictionReport {
    pub evicted: Vec<String>,
    pub freed_bytes: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub total_bytes: u64,
}

/// Key/fingerprint addressed artifact store rooted at a single directory.
///
/// Layout:
/// - `<root>/<safe_name>.json`: [`EntryMetadata`]
/// - `<root>/<safe_name>.<ext>`: payload bytes (`pdf` unless configured otherwise)
///
/// All metadata mutation (sweep, touch, persist, eviction, reset) is serialized
/// by one in-process mutex. The generation callback passed to [`DiskCache::fetch`]
/// runs outside of it, so two concurrent misses for the same key both generate
/// and the last writer wins. Nothing coordinates separate processes sharing a
/// root.
#[derive(Debug)]
pub struct DiskCache {
    root: PathBuf,
    limits: CacheLimits,
    payload_extension: String,
    clock: Arc<dyn Clock>,
    lock: Mutex<()>,
}

impl DiskCache {
    pub fn new(root: impl AsRef<Path>, limits: CacheLimits) -> Result<Self, CacheError> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            limits,
            payload_extension: DEFAULT_PAYLOAD_EXTENSION.to_string(),
            clock: Arc::new(SystemClock),
            lock: Mutex::new(()),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Use `extension` (without the leading dot) for payload files.
    pub fn with_payload_extension(mut self, extension: impl Into<String>) -> Self {
        let extension = extension.into();
        let extension = extension.trim_start_matches('.');
        if !extension.is_empty() && extension != METADATA_EXTENSION {
            self.payload_extension = extension.to_string();
        }
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn limits(&self) -> CacheLimits {
        self.limits
    }

    /// Look up `key`, generating and persisting the artifact on a miss.
    ///
    /// A hit requires the stored fingerprint to equal `fingerprint` and the entry
    /// to be unexpired; it refreshes `last_accessed_at`. On a miss `generate` is
    /// called without holding the metadata lock and must return the path of a
    /// freshly written file, which is moved into the cache root. `ttl = None`
    /// stores an entry that only eviction removes.
    ///
    /// Returns `Ok(None)` when `generate` produced nothing usable or the artifact
    /// could not be persisted. Errors from `generate` are returned unchanged; the
    /// cache itself never fails a fetch.
    pub fn fetch<F, E>(
        &self,
        key: &str,
        fingerprint: &str,
        ttl: Option<Duration>,
        generate: F,
    ) -> Result<Option<CachedArtifact>, E>
    where
        F: FnOnce() -> Result<Option<PathBuf>, E>,
    {
        let name = safe_name(key);

        {
            let _guard = self.lock.lock();
            self.sweep_locked();
            if let Some(metadata) = self.lookup_locked(&name, fingerprint) {
                let metadata = self.touch_locked(&name, metadata);
                tracing::debug!(target: "quire.cache", key, name = %name, "cache hit");
                return Ok(Some(self.artifact(key, &name, metadata, true)));
            }
        }

        tracing::debug!(target: "quire.cache", key, name = %name, "cache miss; generating");
        let Some(source) = generate()? else {
            tracing::debug!(target: "quire.cache", key, "generator produced no artifact");
            return Ok(None);
        };
        if !source.is_file() {
            tracing::debug!(
                target: "quire.cache",
                key,
                path = %source.display(),
                "generator returned a path that is not a file"
            );
            return Ok(None);
        }

        let _guard = self.lock.lock();
        if self.persist_locked(&name, fingerprint, ttl, &source).is_none() {
            return Ok(None);
        }
        self.enforce_limits_locked(Some(&name));

        match read_metadata(&self.metadata_path(&name)) {
            MetadataRead::Present(metadata) if self.payload_path(&name).is_file() => {
                Ok(Some(self.artifact(key, &name, metadata, false)))
            }
            _ => {
                tracing::debug!(
                    target: "quire.cache",
                    key,
                    name = %name,
                    "entry did not survive limit enforcement"
                );
                Ok(None)
            }
        }
    }

    /// Remove expired, corrupt and orphaned entries.
    pub fn sweep_expired(&self) -> SweepReport {
        let _guard = self.lock.lock();
        self.sweep_locked()
    }

    /// Evict least-recently-accessed entries until both budgets are satisfied.
    pub fn enforce_limits(&self) -> EvictionReport {
        let _guard = self.lock.lock();
        self.enforce_limits_locked(None)
    }

    /// Drop the entry stored for `key`, returning whether one existed.
    pub fn remove(&self, key: &str) -> bool {
        let name = safe_name(key);
        let _guard = self.lock.lock();
        let existed = self.metadata_path(&name).exists();
        self.remove_files(&name, "remove");
        existed
    }

    /// Delete the whole cache root and recreate it empty.
    pub fn reset(&self) -> Result<(), CacheError> {
        let _guard = self.lock.lock();
        match std::fs::remove_dir_all(&self.root) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        std::fs::create_dir_all(&self.root)?;
        tracing::info!(target: "quire.cache", root = %self.root.display(), "cache reset");
        Ok(())
    }

    /// Entries currently on disk, in directory order.
    pub fn entries(&self) -> Vec<CacheEntry> {
        let _guard = self.lock.lock();
        self.entries_locked()
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self.entries();
        CacheStats {
            entries: entries.len(),
            total_bytes: entries.iter().map(|entry| entry.size_bytes).sum(),
        }
    }

    fn metadata_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.{METADATA_EXTENSION}"))
    }

    fn payload_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.{}", self.payload_extension))
    }

    fn artifact(
        &self,
        key: &str,
        name: &str,
        metadata: EntryMetadata,
        cached: bool,
    ) -> CachedArtifact {
        CachedArtifact {
            key: key.to_string(),
            fingerprint: metadata.fingerprint,
            path: self.payload_path(name),
            size_bytes: metadata.size,
            cached,
            expires_at: metadata.expires_at,
        }
    }

    fn lookup_locked(&self, name: &str, fingerprint: &str) -> Option<EntryMetadata> {
        let metadata = match read_metadata(&self.metadata_path(name)) {
            MetadataRead::Missing => return None,
            MetadataRead::Corrupt(err) => {
                tracing::debug!(
                    target: "quire.cache",
                    name,
                    error = %err,
                    "discarding corrupt cache metadata"
                );
                self.remove_files(name, "lookup.corrupt");
                return None;
            }
            MetadataRead::Present(metadata) => metadata,
        };

        if metadata.is_expired(self.clock.now_secs()) {
            self.remove_files(name, "lookup.expired");
            return None;
        }
        if !metadata.matches(fingerprint) {
            return None;
        }
        if !self.payload_path(name).is_file() {
            self.remove_files(name, "lookup.missing_payload");
            return None;
        }
        Some(metadata)
    }

    fn touch_locked(&self, name: &str, mut metadata: EntryMetadata) -> EntryMetadata {
        metadata.last_accessed_at = self.clock.now_secs();
        if let Err(err) = metadata.write(&self.metadata_path(name)) {
            // The entry itself is still valid; it just keeps its old access time.
            tracing::debug!(
                target: "quire.cache",
                name,
                error = %err,
                "failed to record cache access"
            );
        }
        metadata
    }

    fn persist_locked(
        &self,
        name: &str,
        fingerprint: &str,
        ttl: Option<Duration>,
        source: &Path,
    ) -> Option<EntryMetadata> {
        let payload_path = self.payload_path(name);
        let metadata_path = self.metadata_path(name);

        if let Err(err) = std::fs::create_dir_all(&self.root) {
            tracing::debug!(
                target: "quire.cache",
                root = %self.root.display(),
                error = %err,
                "failed to create cache root"
            );
            return None;
        }

        if let Err(err) = move_file(source, &payload_path) {
            tracing::debug!(
                target: "quire.cache",
                name,
                source = %source.display(),
                error = %err,
                "failed to move generated artifact into the cache"
            );
            self.remove_files(name, "persist.move_failed");
            return None;
        }

        let size = match std::fs::metadata(&payload_path) {
            Ok(meta) => meta.len(),
            Err(err) => {
                tracing::debug!(
                    target: "quire.cache",
                    path = %payload_path.display(),
                    error = %err,
                    "failed to stat persisted artifact"
                );
                self.remove_files(name, "persist.stat_failed");
                return None;
            }
        };

        let now = self.clock.now_secs();
        let metadata = EntryMetadata {
            fingerprint: fingerprint.to_string(),
            size,
            expires_at: ttl.map(|ttl| now + ttl.as_secs_f64()),
            last_accessed_at: now,
        };
        if let Err(err) = metadata.write(&metadata_path) {
            tracing::debug!(
                target: "quire.cache",
                path = %metadata_path.display(),
                error = %err,
                "failed to write cache metadata"
            );
            self.remove_files(name, "persist.metadata_failed");
            return None;
        }

        tracing::debug!(target: "quire.cache", name, size, "stored artifact");
        Some(metadata)
    }

    fn sweep_locked(&self) -> SweepReport {
        let mut report = SweepReport::default();
        let now = self.clock.now_secs();

        let read_dir = match std::fs::read_dir(&self.root) {
            Ok(read_dir) => read_dir,
            Err(err) => {
                if err.kind() == io::ErrorKind::NotFound {
                    let _ = std::fs::create_dir_all(&self.root);
                } else {
                    tracing::debug!(
                        target: "quire.cache",
                        root = %self.root.display(),
                        error = %err,
                        "failed to read cache root during sweep"
                    );
                }
                return report;
            }
        };
        // Collect first; entries are deleted while classifying.
        let paths: Vec<PathBuf> = read_dir
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_ok_and(|ty| ty.is_file()))
            .map(|entry| entry.path())
            .collect();

        for path in paths {
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if file_name.contains(TMP_MARKER) {
                if remove_file_best_effort(&path, "sweep.tmp") {
                    report.orphaned += 1;
                }
                continue;
            }
            let (Some(stem), Some(ext)) = (
                path.file_stem().and_then(|s| s.to_str()),
                path.extension().and_then(|s| s.to_str()),
            ) else {
                continue;
            };

            if ext == METADATA_EXTENSION {
                match read_metadata(&path) {
                    MetadataRead::Missing => {}
                    MetadataRead::Corrupt(err) => {
                        tracing::debug!(
                            target: "quire.cache",
                            path = %path.display(),
                            error = %err,
                            "removing corrupt cache metadata"
                        );
                        self.remove_files(stem, "sweep.corrupt");
                        report.corrupt += 1;
                    }
                    MetadataRead::Present(metadata) if metadata.is_expired(now) => {
                        self.remove_files(stem, "sweep.expired");
                        report.expired += 1;
                    }
                    MetadataRead::Present(_) if !self.payload_path(stem).is_file() => {
                        remove_file_best_effort(&path, "sweep.missing_payload");
                        report.orphaned += 1;
                    }
                    MetadataRead::Present(_) => {}
                }
            } else if ext == self.payload_extension && !self.metadata_path(stem).exists() {
                if remove_file_best_effort(&path, "sweep.orphaned_payload") {
                    report.orphaned += 1;
                }
            }
        }

        if report != SweepReport::default() {
            tracing::debug!(
                target: "quire.cache",
                expired = report.expired,
                corrupt = report.corrupt,
                orphaned = report.orphaned,
                "cache sweep removed entries"
            );
        }
        report
    }

    fn entries_locked(&self) -> Vec<CacheEntry> {
        let read_dir = match std::fs::read_dir(&self.root) {
            Ok(read_dir) => read_dir,
            Err(_) => return Vec::new(),
        };

        let mut entries = Vec::new();
        for entry in read_dir.filter_map(|entry| entry.ok()) {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some(METADATA_EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if stem.contains(TMP_MARKER) {
                continue;
            }
            if let MetadataRead::Present(metadata) = read_metadata(&path) {
                entries.push(CacheEntry::from_metadata(
                    stem.to_string(),
                    metadata,
                    self.payload_path(stem),
                    path.clone(),
                ));
            }
        }
        entries
    }

    /// `newest` names an entry persisted under the current lock; it ranks after
    /// every entry with the same access time.
    fn enforce_limits_locked(&self, newest: Option<&str>) -> EvictionReport {
        let mut entries = self.entries_locked();
        let is_newest = |entry: &CacheEntry| newest == Some(entry.name.as_str());
        entries.sort_by(|a, b| {
            a.last_accessed_at
                .total_cmp(&b.last_accessed_at)
                .then_with(|| is_newest(a).cmp(&is_newest(b)))
                .then_with(|| a.name.cmp(&b.name))
        });
        let mut entries = VecDeque::from(entries);
        let mut report = EvictionReport::default();

        while entries.len() > self.limits.max_entries {
            let Some(entry) = entries.pop_front() else {
                break;
            };
            self.evict(entry, &mut report);
        }

        let mut total_bytes: u64 = entries.iter().map(|entry| entry.size_bytes).sum();
        while total_bytes > self.limits.max_bytes {
            let Some(entry) = entries.pop_front() else {
                break;
            };
            total_bytes = total_bytes.saturating_sub(entry.size_bytes);
            self.evict(entry, &mut report);
        }

        if !report.evicted.is_empty() {
            tracing::info!(
                target: "quire.cache",
                evicted = report.evicted.len(),
                freed_bytes = report.freed_bytes,
                remaining_bytes = total_bytes,
                "evicted cache entries"
            );
        }
        report
    }

    fn evict(&self, entry: CacheEntry, report: &mut EvictionReport) {
        self.remove_files(&entry.name, "evict");
        report.freed_bytes = report.freed_bytes.saturating_add(entry.size_bytes);
        report.evicted.push(entry.name);
    }

    fn remove_files(&self, name: &str, reason: &'static str) {
        remove_file_best_effort(&self.metadata_path(name), reason);
        remove_file_best_effort(&self.payload_path(name), reason);
    }
}
