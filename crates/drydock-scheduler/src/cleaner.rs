//! Deferred deletion of job working directories.
//!
//! The container runtime can hold a lock on a bind mount for a short while
//! after the container exits, so directories are not removed on the spot.
//! They are queued to a single background task which waits a grace interval
//! before each deletion attempt and gives up after a fixed number of tries.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Wait before each deletion attempt.
pub const GRACE_INTERVAL: Duration = Duration::from_secs(10);

/// Deletion attempts per directory, the first included.
pub const MAX_ATTEMPTS: u32 = 3;

/// Deletes a retired directory.
#[async_trait]
pub trait Reclaim: Send + Sync + 'static {
    async fn reclaim(&self, path: &Path) -> io::Result<()>;
}

/// Recursive filesystem deletion.
pub struct RemoveDirAll;

#[async_trait]
impl Reclaim for RemoveDirAll {
    async fn reclaim(&self, path: &Path) -> io::Result<()> {
        tokio::fs::remove_dir_all(path).await
    }
}

/// Final state of a retired directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retirement {
    Reclaimed { attempts: u32 },
    Abandoned,
}

/// Handle to the cleanup queue. Cheap to clone.
#[derive(Clone)]
pub struct Cleaner {
    tx: mpsc::UnboundedSender<PathBuf>,
    pending: Arc<Mutex<HashSet<PathBuf>>>,
    base: PathBuf,
}

impl Cleaner {
    /// Start the cleanup task, creating working directories under the
    /// system temporary directory.
    pub fn spawn() -> Self {
        Self::spawn_with(std::env::temp_dir(), RemoveDirAll)
    }

    /// Start the cleanup task with a custom location and deletion strategy.
    pub fn spawn_with<R: Reclaim>(base: impl Into<PathBuf>, reclaimer: R) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let pending = Arc::new(Mutex::new(HashSet::new()));
        tokio::spawn(run(rx, reclaimer, pending.clone()));
        Self {
            tx,
            pending,
            base: base.into(),
        }
    }

    /// Create a fresh, uniquely named working directory. It is handed to
    /// this queue when the returned guard is dropped.
    pub async fn working_dir(&self) -> io::Result<WorkingDir> {
        tokio::fs::create_dir_all(&self.base).await?;
        let path = self
            .base
            .join(format!("drydock-{}", Uuid::new_v4().simple()));
        tokio::fs::create_dir(&path).await?;
        info!(path = %path.display(), "Created working directory");
        Ok(WorkingDir {
            path,
            cleaner: self.clone(),
        })
    }

    /// Queue a directory for deletion.
    pub fn retire(&self, path: PathBuf) {
        self.pending.lock().insert(path.clone());
        if let Err(mpsc::error::SendError(path)) = self.tx.send(path) {
            warn!(path = %path.display(), "Cleaner stopped, leaving directory behind");
            self.pending.lock().remove(&path);
        }
    }

    /// Directories queued or being deleted.
    pub fn pending(&self) -> Vec<PathBuf> {
        self.pending.lock().iter().cloned().collect()
    }
}

/// A job's working directory, retired to the [`Cleaner`] when dropped.
pub struct WorkingDir {
    path: PathBuf,
    cleaner: Cleaner,
}

impl WorkingDir {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WorkingDir {
    fn drop(&mut self) {
        self.cleaner.retire(std::mem::take(&mut self.path));
    }
}

async fn run<R: Reclaim>(
    mut rx: mpsc::UnboundedReceiver<PathBuf>,
    reclaimer: R,
    pending: Arc<Mutex<HashSet<PathBuf>>>,
) {
    info!("Starting cleaner");
    while let Some(path) = rx.recv().await {
        retire_with_retry(&reclaimer, &path).await;
        pending.lock().remove(&path);
    }
}

/// Delete `path`, waiting [`GRACE_INTERVAL`] before each of at most
/// [`MAX_ATTEMPTS`] attempts. A directory that is already gone counts as
/// reclaimed.
pub async fn retire_with_retry<R: Reclaim + ?Sized>(reclaimer: &R, path: &Path) -> Retirement {
    for attempt in 1..=MAX_ATTEMPTS {
        tokio::time::sleep(GRACE_INTERVAL).await;
        info!(path = %path.display(), attempt, "Cleaning up");

        match reclaimer.reclaim(path).await {
            Ok(()) => return Retirement::Reclaimed { attempts: attempt },
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Retirement::Reclaimed { attempts: attempt };
            }
            Err(e) => {
                warn!(path = %path.display(), attempt, error = %e, "Cleanup failed");
                if attempt < MAX_ATTEMPTS {
                    info!(
                        "Retrying in {} seconds..",
                        GRACE_INTERVAL.as_secs()
                    );
                }
            }
        }
    }

    error!(path = %path.display(), "Giving up, directory left unreclaimed");
    Retirement::Abandoned
}
