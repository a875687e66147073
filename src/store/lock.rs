//! Named cross-process lock backed by an exclusively created lock file.
//!
//! Acquisition polls until a bounded deadline and never blocks
//! indefinitely. A lock file older than the stale threshold is assumed to
//! belong to a crashed holder and is broken; the staleness re-check and the
//! removal happen under a separate breaker file so two contenders can never
//! both break and re-create it.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Default acquisition deadline.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(500);

/// Age after which a lock file is considered abandoned.
pub const STALE_LOCK_AGE: Duration = Duration::from_secs(30);

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// A system-wide lock identified by a file path.
#[derive(Debug, Clone)]
pub struct NamedLock {
    path: PathBuf,
    timeout: Duration,
    stale_after: Duration,
}

/// Held lock; released on drop.
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
    token: String,
}

impl NamedLock {
    /// Lock at `path` with default timeout and stale threshold.
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            timeout: DEFAULT_LOCK_TIMEOUT,
            stale_after: STALE_LOCK_AGE,
        }
    }

    /// Override the acquisition deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Override the stale threshold.
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    /// Lock file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Try to acquire within the deadline. `None` on timeout or I/O error.
    pub fn acquire(&self) -> Option<LockGuard> {
        let deadline = Instant::now() + self.timeout;

        loop {
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&self.path)
            {
                Ok(mut file) => {
                    let token = format!("{}:{:016x}", std::process::id(), rand::random::<u64>());
                    if let Err(e) = file.write_all(token.as_bytes()) {
                        debug!(path = %self.path.display(), error = %e, "Lock token write failed");
                    }
                    return Some(LockGuard {
                        path: self.path.clone(),
                        token,
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if self.is_stale(&self.path) {
                        self.break_stale();
                    }
                }
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "Lock file unavailable");
                    return None;
                }
            }

            if Instant::now() >= deadline {
                warn!(
                    path = %self.path.display(),
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Timed out acquiring lock"
                );
                return None;
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    fn is_stale(&self, path: &Path) -> bool {
        fs::metadata(path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| modified.elapsed().ok())
            .is_some_and(|age| age > self.stale_after)
    }

    /// Remove the lock file if it is stale, under a short-lived breaker lock
    /// so that the check and the removal cannot interleave with another
    /// contender's.
    fn break_stale(&self) {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let breaker = self.path.with_file_name(format!("{}.break", name));

        match OpenOptions::new().write(true).create_new(true).open(&breaker) {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                // A breaker that crashed mid-way.
                if self.is_stale(&breaker) {
                    let _ = fs::remove_file(&breaker);
                }
                return;
            }
            Err(_) => return,
        }

        if self.is_stale(&self.path) && fs::remove_file(&self.path).is_ok() {
            debug!(path = %self.path.display(), "Broke stale lock");
        }
        let _ = fs::remove_file(&breaker);
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        // Only remove the file if it is still ours; a stale-breaker may have
        // replaced it.
        match fs::read_to_string(&self.path) {
            Ok(current) if current == self.token => {
                let _ = fs::remove_file(&self.path);
            }
            _ => debug!(path = %self.path.display(), "Lock no longer held at release"),
        }
    }
}
