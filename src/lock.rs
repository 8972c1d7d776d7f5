//! Advisory lock on `<notebook>.lock`.
//!
//! Held around every read-modify-write of a notebook. Processes taking the
//! same lock serialize their edits; other writers are not coordinated. When
//! the lock file cannot be created the edit goes ahead unlocked.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::{NbError, Result};

const RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Exclusive lock on one notebook, released on drop.
#[derive(Debug)]
pub struct NotebookLock {
    path: PathBuf,
    file: Option<File>,
}

impl NotebookLock {
    /// Take the lock for `notebook`, retrying until `timeout` has passed.
    pub fn acquire(notebook: &Path, timeout: Duration) -> Result<Self> {
        let path = lock_path(notebook);
        let file = match OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
        {
            Ok(file) => file,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "cannot create lock file, continuing unlocked");
                return Ok(Self { path, file: None });
            }
        };

        let deadline = Instant::now() + timeout;
        loop {
            match try_lock(&file) {
                Ok(true) => {
                    return Ok(Self {
                        path,
                        file: Some(file),
                    })
                }
                Ok(false) if Instant::now() < deadline => thread::sleep(RETRY_INTERVAL),
                Ok(false) => return Err(NbError::NotebookLocked(notebook.to_path_buf())),
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "locking unsupported, continuing unlocked");
                    return Ok(Self { path, file: None });
                }
            }
        }
    }

    /// Whether the lock is actually held.
    pub fn is_held(&self) -> bool {
        self.file.is_some()
    }
}

impl Drop for NotebookLock {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            let _ = fs::remove_file(&self.path);
            drop(file);
        }
    }
}

/// `<notebook>.lock`, next to the notebook.
pub fn lock_path(notebook: &Path) -> PathBuf {
    let mut name = notebook.as_os_str().to_os_string();
    name.push(".lock");
    PathBuf::from(name)
}

#[cfg(unix)]
fn try_lock(file: &File) -> std::io::Result<bool> {
    use nix::errno::Errno;
    use nix::fcntl::{flock, FlockArg};
    use std::os::unix::io::AsRawFd;

    match flock(file.as_raw_fd(), FlockArg::LockExclusiveNonblock) {
        Ok(()) => Ok(true),
        Err(e) if e == Errno::EAGAIN => Ok(false),
        Err(e) => Err(e.into()),
    }
}

#[cfg(not(unix))]
fn try_lock(_file: &File) -> std::io::Result<bool> {
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_path_appends_suffix() {
        assert_eq!(
            lock_path(Path::new("/w/a.ipynb")),
            PathBuf::from("/w/a.ipynb.lock")
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_second_holder_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let nb = dir.path().join("a.ipynb");

        let held = NotebookLock::acquire(&nb, Duration::from_secs(1)).unwrap();
        assert!(held.is_held());
        assert!(lock_path(&nb).exists());

        let err = NotebookLock::acquire(&nb, Duration::from_millis(200)).unwrap_err();
        assert!(matches!(err, NbError::NotebookLocked(_)));

        drop(held);
        assert!(!lock_path(&nb).exists());
        assert!(NotebookLock::acquire(&nb, Duration::from_millis(200))
            .unwrap()
            .is_held());
    }

    #[test]
    fn test_missing_directory_goes_unlocked() {
        let dir = tempfile::tempdir().unwrap();
        let nb = dir.path().join("missing/a.ipynb");
        let lock = NotebookLock::acquire(&nb, Duration::from_millis(100)).unwrap();
        assert!(!lock.is_held());
    }
}
