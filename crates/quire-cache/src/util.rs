use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Marker embedded in the names of in-flight temporary files inside the cache root.
pub(crate) const TMP_MARKER: &str = ".tmp.";

/// Write `bytes` to `path` by writing a sibling temporary file and renaming it
/// into place, so readers never observe a partially written file.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let Some(parent) = path.parent() else {
        return Err(io::Error::other("path has no parent"));
    };
    let parent = if parent.as_os_str().is_empty() {
        Path::new(".")
    } else {
        parent
    };
    fs::create_dir_all(parent)?;

    let (tmp_path, mut file) = open_unique_tmp_file(path, parent)?;
    let write_result = file.write_all(bytes).and_then(|()| file.sync_all());
    drop(file);
    if let Err(err) = write_result {
        remove_file_best_effort(&tmp_path, "atomic_write.write_failed");
        return Err(err);
    }

    if let Err(err) = replace_file(&tmp_path, path) {
        remove_file_best_effort(&tmp_path, "atomic_write.rename_failed");
        return Err(err);
    }
    Ok(())
}

/// Move `from` to `to`, replacing any existing file at `to`.
///
/// Falls back to copy + delete when a plain rename is not possible (for example
/// when the source lives on another filesystem such as a tmpfs).
pub fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    match replace_file(from, to) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Err(err),
        Err(rename_err) => {
            tracing::debug!(
                target: "quire.cache",
                from = %from.display(),
                to = %to.display(),
                error = %rename_err,
                "rename failed; falling back to copy"
            );
            let parent = to.parent().unwrap_or_else(|| Path::new("."));
            let (tmp_path, file) = open_unique_tmp_file(to, parent)?;
            drop(file);
            let copied = fs::copy(from, &tmp_path).and_then(|_| replace_file(&tmp_path, to));
            if let Err(err) = copied {
                remove_file_best_effort(&tmp_path, "move_file.copy_failed");
                return Err(err);
            }
            remove_file_best_effort(from, "move_file.remove_source");
            Ok(())
        }
    }
}

pub(crate) fn remove_file_best_effort(path: &Path, reason: &'static str) -> bool {
    match fs::remove_file(path) {
        Ok(()) => true,
        Err(err) if err.kind() == io::ErrorKind::NotFound => true,
        Err(err) => {
            tracing::debug!(
                target: "quire.cache",
                path = %path.display(),
                reason,
                error = %err,
                "failed to remove cache file"
            );
            false
        }
    }
}

fn replace_file(from: &Path, to: &Path) -> io::Result<()> {
    const MAX_RENAME_ATTEMPTS: usize = 64;
    let mut attempts = 0usize;
    loop {
        match fs::rename(from, to) {
            Ok(()) => return Ok(()),
            Err(err)
                if cfg!(windows)
                    && from.exists()
                    && (err.kind() == io::ErrorKind::AlreadyExists || to.exists()) =>
            {
                // `rename` doesn't overwrite on Windows.
                match fs::remove_file(to) {
                    Ok(()) => {}
                    Err(remove_err) if remove_err.kind() == io::ErrorKind::NotFound => {}
                    Err(remove_err) => return Err(remove_err),
                }
                attempts += 1;
                if attempts >= MAX_RENAME_ATTEMPTS {
                    return Err(err);
                }
            }
            Err(err) => return Err(err),
        }
    }
}

fn open_unique_tmp_file(dest: &Path, parent: &Path) -> io::Result<(PathBuf, fs::File)> {
    let file_name = dest
        .file_name()
        .ok_or_else(|| io::Error::other("destination path has no file name"))?;
    let pid = std::process::id();

    loop {
        let counter = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        let mut tmp_name = file_name.to_os_string();
        tmp_name.push(format!("{TMP_MARKER}{pid}.{counter}"));
        let tmp_path = parent.join(tmp_name);

        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp_path)
        {
            Ok(file) => return Ok((tmp_path, file)),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(err) => return Err(err),
        }
    }
}
