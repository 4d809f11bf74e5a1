use std::{
    fs, io,
    path::{Path, PathBuf},
};

/// A scratch file deleted when the guard goes out of scope.
///
/// If the file was moved elsewhere in the meantime (for instance into the
/// cache root) there is nothing left to delete and drop is a no-op.
#[derive(Debug)]
pub struct TempArtifact {
    path: PathBuf,
    armed: bool,
}

impl TempArtifact {
    /// Create a new, empty file with a unique name inside `dir`.
    pub fn create_in(dir: &Path, prefix: &str, suffix: &str) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        let file = tempfile::Builder::new()
            .prefix(prefix)
            .suffix(suffix)
            .tempfile_in(dir)?;
        let path = file.into_temp_path().keep().map_err(|err| err.error)?;
        Ok(Self { path, armed: true })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Disarm the guard and hand the file over to the caller.
    pub fn keep(mut self) -> PathBuf {
        self.armed = false;
        std::mem::take(&mut self.path)
    }

    /// Delete the file now, reporting failures instead of logging them.
    pub fn release(mut self) -> io::Result<()> {
        self.armed = false;
        remove_if_present(&self.path)
    }
}

fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

impl Drop for TempArtifact {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Err(err) = remove_if_present(&self.path) {
            tracing::debug!(
                target: "quire.render",
                path = %self.path.display(),
                error = %err,
                "failed to remove temporary file"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drop_removes_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = {
            let guard = TempArtifact::create_in(dir.path(), "quire-", ".pdf").unwrap();
            assert!(guard.path().is_file());
            guard.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn drop_after_relocation_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let moved = dir.path().join("moved.pdf");
        {
            let guard = TempArtifact::create_in(dir.path(), "quire-", ".pdf").unwrap();
            fs::rename(guard.path(), &moved).unwrap();
        }
        assert!(moved.is_file());
    }

    #[test]
    fn kept_file_survives_the_guard() {
        let dir = tempfile::tempdir().unwrap();
        let guard = TempArtifact::create_in(dir.path(), "quire-", ".pdf").unwrap();
        let path = guard.keep();
        assert!(path.is_file());
    }

    #[test]
    fn release_reports_success_for_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let guard = TempArtifact::create_in(dir.path(), "quire-", ".html").unwrap();
        fs::remove_file(guard.path()).unwrap();
        guard.release().unwrap();
    }
}
