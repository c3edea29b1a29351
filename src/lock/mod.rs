//! Run lock preventing overlapping pipeline invocations.
//!
//! A second trigger arriving mid-run must exit immediately without side
//! effects, so the lock is advisory, non-blocking, and scoped: it is
//! released on every exit path when the guard drops.

use anyhow::{Context, Result};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum LockError {
    #[error("Another run is already in progress")]
    AlreadyRunning,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Marker contents recorded by the holding process.
#[derive(Debug, Serialize, Deserialize)]
struct LockMarker {
    pid: u32,
    acquired_at: chrono::DateTime<chrono::Utc>,
}

/// Exclusive run lock. Held for the lifetime of the value; the flock and
/// the marker file are released in `Drop`.
pub struct RunLock {
    file: File,
    path: PathBuf,
}

impl RunLock {
    /// Acquire the run lock at `path`, failing with `AlreadyRunning` if a
    /// live process holds it.
    ///
    /// The advisory lock dies with its holder, so a marker left behind by
    /// a crashed run does not block acquisition; it is logged as stale and
    /// overwritten.
    pub fn acquire(path: &Path) -> Result<Self, LockError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create lock directory {:?}", parent))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)?;

        if file.try_lock_exclusive().is_err() {
            return Err(LockError::AlreadyRunning);
        }

        // We hold the lock. Any marker still present belongs to a run that
        // died without cleaning up.
        let mut existing = String::new();
        file.read_to_string(&mut existing).ok();
        if let Ok(stale) = serde_json::from_str::<LockMarker>(&existing) {
            warn!(
                "Reclaiming stale run lock left by pid {} (acquired {})",
                stale.pid, stale.acquired_at
            );
        }

        let marker = LockMarker {
            pid: std::process::id(),
            acquired_at: chrono::Utc::now(),
        };
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(serde_json::to_string(&marker).unwrap_or_default().as_bytes())?;
        file.flush()?;

        debug!("Run lock acquired at {:?} (pid {})", path, marker.pid);

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = self.file.set_len(0);
        let _ = fs2::FileExt::unlock(&self.file);
        let _ = std::fs::remove_file(&self.path);
        debug!("Run lock released at {:?}", self.path);
    }
}
