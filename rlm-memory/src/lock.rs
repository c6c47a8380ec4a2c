//! Cross-process layer lock
//!
//! The lock is a sentinel file `<target>.lock` created with an exclusive,
//! create-only open. Any thread or process that can see the file system can
//! take part. Waiters poll until a timeout; the guard deletes the sentinel on
//! drop.
//!
//! A writer that crashes while holding the lock leaves the sentinel behind.
//! Stale sentinels are never expired automatically; remove them by hand once
//! no writer is running.

use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::{Error, Result};

/// How long to wait for a busy lock before giving up
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(60);

/// Sleep between acquisition attempts
pub const DEFAULT_LOCK_POLL: Duration = Duration::from_millis(5);

/// Sentinel path guarding `target`
pub fn lock_path_for(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_os_string();
    name.push(".lock");
    PathBuf::from(name)
}

/// Held lock on one layer file. Released on drop.
#[derive(Debug)]
pub struct LayerLock {
    path: PathBuf,
}

impl LayerLock {
    /// Acquire the lock for `target`, polling every `poll` until `timeout`.
    pub fn acquire(target: &Path, timeout: Duration, poll: Duration) -> Result<Self> {
        let path = lock_path_for(target);
        let start = Instant::now();

        loop {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(_) => {
                    debug!(lock = %path.display(), waited = ?start.elapsed(), "Acquired layer lock");
                    return Ok(Self { path });
                }
                // Windows reports PermissionDenied while another process deletes the file.
                Err(e) if matches!(e.kind(), ErrorKind::AlreadyExists | ErrorKind::PermissionDenied) => {
                    let waited = start.elapsed();
                    if waited >= timeout {
                        return Err(Error::LockTimeout {
                            path: target.to_path_buf(),
                            waited,
                        });
                    }
                    thread::sleep(poll);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Path of the sentinel file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LayerLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            debug!(lock = %self.path.display(), error = %e, "Failed to remove lock sentinel");
        }
    }
}
