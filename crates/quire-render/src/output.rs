use std::{
    fs, io,
    path::{Path, PathBuf},
};

use crate::TempArtifact;

/// Deletes an uncached artifact once the caller is done with it.
///
/// Dropping a `Cleanup` without calling [`Cleanup::run`] still deletes the
/// file; `run` only adds error reporting.
#[derive(Debug)]
pub struct Cleanup(TempArtifact);

impl Cleanup {
    pub(crate) fn new(artifact: TempArtifact) -> Self {
        Self(artifact)
    }

    pub fn path(&self) -> &Path {
        self.0.path()
    }

    pub fn run(self) -> io::Result<()> {
        self.0.release()
    }

    /// Cancel the cleanup; the file stays on disk.
    pub fn keep(self) -> PathBuf {
        self.0.keep()
    }
}

/// A rendered artifact on disk.
///
/// `cached` artifacts live inside the cache root and belong to the cache; the
/// caller must not delete them. Uncached artifacts carry a [`Cleanup`].
#[derive(Debug)]
pub struct RenderOutput {
    pub path: PathBuf,
    pub cached: bool,
    pub size_bytes: u64,
    cleanup: Option<Cleanup>,
}

impl RenderOutput {
    pub(crate) fn from_cache(path: PathBuf, cached: bool, size_bytes: u64) -> Self {
        Self {
            path,
            cached,
            size_bytes,
            cleanup: None,
        }
    }

    pub(crate) fn uncached(artifact: TempArtifact, size_bytes: u64) -> Self {
        Self {
            path: artifact.path().to_path_buf(),
            cached: false,
            size_bytes,
            cleanup: Some(Cleanup::new(artifact)),
        }
    }

    /// `true` when the caller is responsible for deleting the artifact.
    pub fn needs_cleanup(&self) -> bool {
        self.cleanup.is_some()
    }

    pub fn take_cleanup(&mut self) -> Option<Cleanup> {
        self.cleanup.take()
    }

    pub fn read(&self) -> io::Result<Vec<u8>> {
        fs::read(&self.path)
    }

    /// Copy the artifact to `dest`, leaving the original in place.
    pub fn copy_to(&self, dest: &Path) -> io::Result<u64> {
        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::copy(&self.path, dest)
    }

    /// Give up ownership tracking and return the artifact's path. An uncached
    /// artifact is no longer deleted.
    pub fn into_path(mut self) -> PathBuf {
        match self.cleanup.take() {
            Some(cleanup) => cleanup.keep(),
            None => std::mem::take(&mut self.path),
        }
    }

    /// Run the cleanup action, if any. Cached artifacts are left alone.
    pub fn finish(mut self) -> io::Result<()> {
        match self.cleanup.take() {
            Some(cleanup) => cleanup.run(),
            None => Ok(()),
        }
    }
}
