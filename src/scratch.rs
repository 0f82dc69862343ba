//! Scratch directory handling
//!
//! Uploaded documents live in one shared directory only while they are being
//! validated. Each submission holds a [`ScratchLease`] whose files are removed
//! with [`ScratchLease::release`] once the submission is over. Dropping a lease
//! that was never released (a cancelled request, a panic) removes them
//! synchronously as a fallback, so every exit path is covered. The
//! [`ScratchSweeper`] is a safety net for files leaked by a crashed process; it
//! only touches `.xml` files older than a threshold, so it never races with a
//! submission that is still in flight.

use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReadDirStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::naming::{FilenameAllocator, has_xml_extension};

/// The shared scratch directory
#[derive(Debug, Clone)]
pub struct ScratchArea {
    root: PathBuf,
}

impl ScratchArea {
    /// Open the scratch directory, creating it if missing
    pub async fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        debug!(root = %root.display(), "Scratch directory ready");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn allocator(&self) -> FilenameAllocator {
        FilenameAllocator::new(&self.root)
    }

    /// Start a new per-submission lease
    pub fn lease(&self) -> ScratchLease {
        ScratchLease::new()
    }

    pub fn sweeper(&self) -> ScratchSweeper {
        ScratchSweeper::new(&self.root)
    }
}

/// Files materialized for one submission, removed when the lease is dropped
#[derive(Debug)]
pub struct ScratchLease {
    id: Uuid,
    paths: Vec<PathBuf>,
}

impl ScratchLease {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            paths: Vec::new(),
        }
    }

    /// Identifier used to correlate log lines of one submission
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Register a file for removal when the lease ends
    pub fn track(&mut self, path: impl Into<PathBuf>) {
        self.paths.push(path.into());
    }

    pub fn tracked(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Remove one tracked file right away
    pub async fn discard(&mut self, path: &Path) {
        log_removal(self.id, path, tokio::fs::remove_file(path).await);
        self.paths.retain(|tracked| tracked != path);
    }

    /// End the lease, removing every tracked file without blocking the runtime
    pub async fn release(mut self) {
        for path in std::mem::take(&mut self.paths) {
            log_removal(self.id, &path, tokio::fs::remove_file(&path).await);
        }
    }
}

impl Default for ScratchLease {
    fn default() -> Self {
        Self::new()
    }
}

// Only reached with files still tracked when `release` was skipped
impl Drop for ScratchLease {
    fn drop(&mut self) {
        for path in self.paths.drain(..) {
            log_removal(self.id, &path, std::fs::remove_file(&path));
        }
    }
}

fn log_removal(lease: Uuid, path: &Path, result: io::Result<()>) {
    match result {
        Ok(()) => debug!(%lease, path = %path.display(), "Removed scratch file"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(%lease, path = %path.display(), error = %e, "Failed to remove scratch file"),
    }
}

/// Counters from one sweep
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    pub examined: usize,
    pub removed: usize,
}

/// Removes stale `.xml` files from the scratch directory
#[derive(Debug, Clone)]
pub struct ScratchSweeper {
    root: PathBuf,
}

impl ScratchSweeper {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Remove every `.xml` file last modified more than `older_than` ago
    ///
    /// Files that vanish while the sweep runs are skipped; a missing
    /// directory is an empty sweep.
    pub async fn sweep(&self, older_than: Duration) -> io::Result<SweepStats> {
        let mut stats = SweepStats::default();

        let read_dir = match tokio::fs::read_dir(&self.root).await {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(stats),
            Err(e) => return Err(e),
        };

        let now = SystemTime::now();
        let mut entries = ReadDirStream::new(read_dir);
        while let Some(entry) = entries.next().await {
            let entry = entry?;
            let path = entry.path();
            let is_xml = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(has_xml_extension);
            if !is_xml {
                continue;
            }

            let metadata = match entry.metadata().await {
                Ok(metadata) if metadata.is_file() => metadata,
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            };
            stats.examined += 1;

            let age = metadata
                .modified()
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .unwrap_or_default();
            if age < older_than {
                continue;
            }

            match tokio::fs::remove_file(&path).await {
                Ok(()) => stats.removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to sweep scratch file"),
            }
        }

        debug!(
            root = %self.root.display(),
            examined = stats.examined,
            removed = stats.removed,
            "Scratch sweep finished"
        );
        Ok(stats)
    }

    /// Run [`Self::sweep`] every `interval` until the task is aborted
    pub fn spawn_periodic(self, interval: Duration, older_than: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately; startup already swept
            ticker.tick().await;

            loop {
                ticker.tick().await;
                match self.sweep(older_than).await {
                    Ok(stats) if stats.removed > 0 => {
                        info!(removed = stats.removed, "Removed stale scratch files")
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "Scratch sweep failed"),
                }
            }
        })
    }
}
