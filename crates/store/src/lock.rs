//! Advisory file lock with stale reclaim.
//!
//! Used to fence memory compaction: whoever creates the lock file owns the
//! critical section. A lock older than the stale threshold is treated as
//! the leftover of a crashed process and may be reclaimed.

use std::path::{Path, PathBuf};
use std::time::Duration;

use perch_domain::Result;

/// Locks older than this are reclaimable.
const STALE_AFTER: Duration = Duration::from_secs(3600);

/// An acquired lock. Dropping it removes the lock file.
pub struct FileLock {
    path: PathBuf,
}

impl FileLock {
    /// Try to take the lock. Returns `None` when another (live) holder
    /// already has it.
    pub fn try_acquire(path: &Path) -> Result<Option<FileLock>> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
        {
            Ok(_) => Ok(Some(FileLock { path: path.to_path_buf() })),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                if Self::is_stale(path) {
                    tracing::warn!(path = %path.display(), "reclaiming stale lock");
                    std::fs::remove_file(path)?;
                    return Self::try_acquire(path);
                }
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn is_stale(path: &Path) -> bool {
        let Ok(meta) = std::fs::metadata(path) else {
            return false;
        };
        let Ok(modified) = meta.modified() else {
            return false;
        };
        modified
            .elapsed()
            .map(|age| age > STALE_AFTER)
            .unwrap_or(false)
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to release lock");
            }
        }
    }
}
