//! Advisory lock files for cache entries
//!
//! One lock file per cache slot, created with `O_CREAT | O_EXCL`. The file
//! records the holder's pid and a random token. Waiters poll until the holder
//! drops the lock or the timeout expires.
//!
//! A lock is only broken when its owner is gone: the recorded pid no longer
//! runs, or the file never got an owner line and is older than the stale
//! threshold. Pids are checked on the local host only.

use chrono::Utc;
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};
use sysinfo::{Pid, System};

use crate::error::{RepoError, Result};

/// Interval between two attempts while the lock is held elsewhere
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Held lock on a cache entry; released on drop
#[derive(Debug)]
pub struct CacheLock {
    path: PathBuf,
    token: String,
}

/// Owner line of a lock file: `<pid> <token> <timestamp>`
#[derive(Debug, PartialEq, Eq)]
struct LockOwner {
    pid: u32,
    token: String,
}

impl LockOwner {
    fn parse(content: &str) -> Option<Self> {
        let mut fields = content.split_whitespace();
        let pid = fields.next()?.parse().ok()?;
        let token = fields.next()?.to_string();
        Some(Self { pid, token })
    }
}

impl CacheLock {
    /// Acquire the lock, waiting at most `timeout`
    pub async fn acquire(path: impl Into<PathBuf>, timeout: Duration) -> Result<Self> {
        Self::acquire_with(path, timeout, timeout).await
    }

    /// Acquire the lock; a lock file without an owner line is broken once
    /// older than `stale_after`
    pub async fn acquire_with(
        path: impl Into<PathBuf>,
        timeout: Duration,
        stale_after: Duration,
    ) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let token = format!("{:016x}", rand::random::<u64>());
        let start = Instant::now();
        let mut announced = false;

        loop {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    writeln!(file, "{} {} {}", std::process::id(), token, Utc::now().to_rfc3339())?;
                    tracing::debug!("Acquired lock {}", path.display());
                    return Ok(Self { path, token });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if let Some(seen) = abandoned(&path, stale_after) {
                        tracing::warn!("Breaking abandoned lock {}", path.display());
                        break_lock(&path, &seen, &token)?;
                        continue;
                    }

                    if start.elapsed() >= timeout {
                        return Err(RepoError::LockTimeout {
                            path: path.display().to_string(),
                            seconds: timeout.as_secs(),
                        });
                    }

                    if !announced {
                        tracing::info!("Waiting for lock {}", path.display());
                        announced = true;
                    }
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for CacheLock {
    fn drop(&mut self) {
        let owner = std::fs::read_to_string(&self.path)
            .ok()
            .and_then(|content| LockOwner::parse(&content));

        match owner {
            Some(owner) if owner.token == self.token => {}
            Some(_) => {
                tracing::warn!("Lock {} changed hands, leaving it in place", self.path.display());
                return;
            }
            None => {
                tracing::debug!("Lock {} already gone", self.path.display());
                return;
            }
        }

        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!("Released lock {}", self.path.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Failed to release lock {}: {}", self.path.display(), e),
        }
    }
}

/// Content of the lock file at `path` if its owner is gone
fn abandoned(path: &Path, stale_after: Duration) -> Option<String> {
    let content = std::fs::read_to_string(path).ok()?;
    let gone = match LockOwner::parse(&content) {
        Some(owner) => !process_alive(owner.pid),
        // Holder crashed between creating the file and writing its owner line
        None => lock_age(path).is_some_and(|age| age >= stale_after),
    };
    gone.then_some(content)
}

/// Remove an abandoned lock file, handing it back if a live holder replaced it meanwhile
fn break_lock(path: &Path, seen: &str, token: &str) -> Result<()> {
    let aside = path.with_extension(format!("broken-{}", token));
    match std::fs::rename(path, &aside) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    }

    let taken = std::fs::read_to_string(&aside).unwrap_or_default();
    if taken != seen {
        if let Err(e) = std::fs::hard_link(&aside, path) {
            tracing::warn!("Failed to restore lock {}: {}", path.display(), e);
        }
    }

    if let Err(e) = std::fs::remove_file(&aside) {
        tracing::warn!("Failed to remove {}: {}", aside.display(), e);
    }
    Ok(())
}

fn process_alive(pid: u32) -> bool {
    if !sysinfo::IS_SUPPORTED_SYSTEM {
        return true;
    }
    System::new().refresh_process(Pid::from_u32(pid))
}

/// Age of an existing lock file, from its modification time
fn lock_age(path: &Path) -> Option<Duration> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    SystemTime::now().duration_since(modified).ok()
}
