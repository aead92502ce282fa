//! Switch coordination: an in-process lock nested inside a cross-process file lock
//!
//! The gateway and every worker drive their own controller against the same physical
//! backend slot, so the in-process lock alone cannot serialize switches. The file lock
//! is an advisory `flock(2)` on a well-known path; it is tied to the open file
//! description, so two coordinators in the same process contend exactly like two
//! processes would.

use crate::error::{SwitchboardError, SwitchboardResult};
use anyhow::Context;
use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tokio::time::Instant;

const FILE_LOCK_POLL: Duration = Duration::from_millis(50);

/// Held for the duration of one switch; releases both layers on drop
pub struct SwitchGuard {
    // Declaration order is drop order: file lock first, then the local lock.
    _file: Flock<File>,
    _local: OwnedRwLockWriteGuard<()>,
}

/// Shared permit held by an admitted synchronous request while it talks to the backend
pub type ServingPermit = OwnedRwLockReadGuard<()>;

pub struct SwitchCoordinator {
    local: Arc<RwLock<()>>,
    lock_path: PathBuf,
    poll_interval: Duration,
}

impl SwitchCoordinator {
    pub fn new(lock_path: impl Into<PathBuf>) -> Self {
        Self {
            local: Arc::new(RwLock::new(())),
            lock_path: lock_path.into(),
            poll_interval: FILE_LOCK_POLL,
        }
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// Acquire both layers within a single overall timeout
    ///
    /// Timing out is fatal for the caller: no retry happens here.
    pub async fn acquire(&self, timeout: Duration) -> SwitchboardResult<SwitchGuard> {
        let deadline = Instant::now() + timeout;
        let timed_out = || SwitchboardError::LockTimeout {
            waited_secs: timeout.as_secs(),
        };

        let local = tokio::time::timeout(timeout, self.local.clone().write_owned())
            .await
            .map_err(|_| timed_out())?;

        let mut file = open_lock_file(&self.lock_path)?;

        loop {
            match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
                Ok(flock) => {
                    tracing::debug!(path = ?self.lock_path, "Switch lock acquired");
                    return Ok(SwitchGuard {
                        _file: flock,
                        _local: local,
                    });
                }
                Err((returned, errno)) if errno == Errno::EWOULDBLOCK => {
                    file = returned;
                }
                Err((_, errno)) => {
                    return Err(anyhow::anyhow!(
                        "flock on {:?} failed: {}",
                        self.lock_path,
                        errno
                    )
                    .into());
                }
            }

            let now = Instant::now();
            if now >= deadline {
                tracing::warn!(
                    path = ?self.lock_path,
                    timeout_secs = timeout.as_secs(),
                    "Switch lock held by another process"
                );
                return Err(timed_out());
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    /// Shared permit that is only granted when no switch holds or awaits the local lock
    pub fn try_serve(&self) -> Option<ServingPermit> {
        self.local.clone().try_read_owned().ok()
    }
}

fn open_lock_file(path: &Path) -> SwitchboardResult<File> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Cannot create lock directory: {:?}", parent))?;
    }

    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(path)
        .with_context(|| format!("Failed to open switch lock file: {:?}", path))?;

    Ok(file)
}
