//! Typed locks layered on marker files in a shared lock directory.
//!
//! Three kinds of participant coordinate through one directory:
//!
//! ```text
//! lock_dir/
//!   global_lock                      serializes every typed acquisition
//!   updater_lock                     held by the downloader
//!   instance_lock_<epochMillis>_<n>  one per running application instance
//! ```
//!
//! Every typed acquisition first takes `global_lock`, so the compound
//! checks below run atomically with respect to other processes. Only an
//! UPDATER keeps holding `global_lock` after the call returns, which keeps
//! new instances and downloaders out until the update is done.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::error::{LockError, LockResult};
use super::file_lock::FileLock;

/// Marker used to serialize typed acquisitions.
pub const GLOBAL_LOCK_FILE: &str = "global_lock";

/// Marker held by a downloader and probed by updaters.
pub const UPDATER_LOCK_FILE: &str = "updater_lock";

/// File name prefix of instance markers.
pub const INSTANCE_LOCK_PREFIX: &str = "instance_lock_";

/// The role a process takes in the lock protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockKind {
    /// One running copy of the application. Many may coexist.
    Instance,
    /// A background downloader. Excludes other downloaders and updaters.
    Downloader,
    /// A patching process. Excludes everything else.
    Updater,
}

impl LockKind {
    /// Get a human-readable name for the lock kind.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Instance => "instance",
            Self::Downloader => "downloader",
            Self::Updater => "updater",
        }
    }
}

impl std::fmt::Display for LockKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A typed lock returned by [`LockCoordinator::acquire`].
#[derive(Debug)]
pub struct KindLock {
    kind: LockKind,
    lock: FileLock,
    remove_on_release: bool,
}

impl KindLock {
    /// The kind this lock was acquired as.
    pub fn kind(&self) -> LockKind {
        self.kind
    }

    /// Marker file backing this lock.
    pub fn path(&self) -> &Path {
        self.lock.path()
    }

    /// Whether the lock is still held.
    pub fn is_held(&self) -> bool {
        self.lock.is_held()
    }

    /// Release the lock. Safe to call more than once.
    ///
    /// Instance markers are deleted after release on a best-effort basis.
    pub fn release(&mut self) {
        if !self.lock.is_held() {
            return;
        }
        self.lock.release();
        if self.remove_on_release {
            if let Err(e) = fs::remove_file(self.lock.path()) {
                if e.kind() != io::ErrorKind::NotFound {
                    debug!(path = %self.lock.path().display(), error = %e, "Instance marker not removed");
                }
            }
        }
    }
}

impl Drop for KindLock {
    fn drop(&mut self) {
        self.release();
    }
}

/// Entry point for cross-process locking in one lock directory.
#[derive(Debug, Clone)]
pub struct LockCoordinator {
    lock_dir: PathBuf,
}

impl LockCoordinator {
    /// Create a coordinator for `lock_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::NotADirectory`] if `lock_dir` is not an existing
    /// directory.
    pub fn new(lock_dir: impl Into<PathBuf>) -> LockResult<Self> {
        let lock_dir = lock_dir.into();
        if !lock_dir.is_dir() {
            return Err(LockError::NotADirectory(lock_dir));
        }
        Ok(Self { lock_dir })
    }

    /// The lock directory.
    pub fn lock_dir(&self) -> &Path {
        &self.lock_dir
    }

    /// Acquire a typed lock, giving up after `timeout`.
    ///
    /// Returns `Ok(None)` on contention. See the module docs for the rules
    /// each kind follows.
    pub fn acquire(
        &self,
        kind: LockKind,
        timeout: Duration,
        retry_delay: Duration,
    ) -> LockResult<Option<KindLock>> {
        let deadline = Instant::now() + timeout;

        let Some(global) = self.acquire_global(timeout, retry_delay)? else {
            debug!(%kind, "Global lock busy");
            return Ok(None);
        };

        let acquired = match kind {
            LockKind::Instance => self.acquire_instance(deadline)?,
            LockKind::Downloader => FileLock::acquire(
                &self.updater_marker(),
                remaining(deadline),
                retry_delay,
            )?
            .map(|lock| KindLock {
                kind,
                lock,
                remove_on_release: false,
            }),
            LockKind::Updater => self.acquire_updater(global, deadline, retry_delay)?,
        };

        match &acquired {
            Some(lock) => info!(%kind, path = %lock.path().display(), "Acquired lock"),
            None => debug!(%kind, "Lock not available"),
        }
        Ok(acquired)
    }

    /// Acquire the global serialization lock directly.
    pub fn acquire_global(
        &self,
        timeout: Duration,
        retry_delay: Duration,
    ) -> LockResult<Option<FileLock>> {
        FileLock::acquire(&self.global_marker(), timeout, retry_delay)
    }

    /// Check that no downloader or updater holds `updater_lock`.
    ///
    /// The marker is taken and immediately released. Callers are expected to
    /// already hold the global lock.
    pub fn probe_updater_marker(
        &self,
        timeout: Duration,
        retry_delay: Duration,
    ) -> LockResult<bool> {
        match FileLock::acquire(&self.updater_marker(), timeout, retry_delay)? {
            Some(mut probe) => {
                probe.release();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// List instance markers currently present in the lock directory.
    pub fn instance_markers(&self) -> LockResult<Vec<PathBuf>> {
        let entries = fs::read_dir(&self.lock_dir).map_err(|e| LockError::ReadDirFailed {
            path: self.lock_dir.clone(),
            source: e,
        })?;

        let mut markers: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.file_name()
                    .to_string_lossy()
                    .starts_with(INSTANCE_LOCK_PREFIX)
            })
            .map(|e| e.path())
            .collect();
        markers.sort();
        Ok(markers)
    }

    fn acquire_instance(&self, deadline: Instant) -> LockResult<Option<KindLock>> {
        let stamp = chrono::Utc::now().timestamp_millis();

        for n in 0u64.. {
            let path = self
                .lock_dir
                .join(format!("{}{}_{}", INSTANCE_LOCK_PREFIX, stamp, n));
            if let Some(lock) = FileLock::try_acquire(&path)? {
                return Ok(Some(KindLock {
                    kind: LockKind::Instance,
                    lock,
                    remove_on_release: true,
                }));
            }
            if Instant::now() >= deadline {
                break;
            }
        }
        Ok(None)
    }

    fn acquire_updater(
        &self,
        global: FileLock,
        deadline: Instant,
        retry_delay: Duration,
    ) -> LockResult<Option<KindLock>> {
        if !self.probe_updater_marker(remaining(deadline), retry_delay)? {
            debug!("Downloader or updater active");
            return Ok(None);
        }

        for marker in self.instance_markers()? {
            let Some(mut stale) = FileLock::try_acquire(&marker)? else {
                info!(marker = %marker.display(), "Application instance still running");
                return Ok(None);
            };
            // Nobody can create a new instance marker while we hold the
            // global lock, so releasing before deleting is race free.
            stale.release();
            if let Err(e) = fs::remove_file(&marker) {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!(marker = %marker.display(), error = %e, "Could not delete instance marker");
                    return Ok(None);
                }
            }
            debug!(marker = %marker.display(), "Removed stale instance marker");
        }

        Ok(Some(KindLock {
            kind: LockKind::Updater,
            lock: global,
            remove_on_release: false,
        }))
    }

    fn global_marker(&self) -> PathBuf {
        self.lock_dir.join(GLOBAL_LOCK_FILE)
    }

    fn updater_marker(&self) -> PathBuf {
        self.lock_dir.join(UPDATER_LOCK_FILE)
    }
}

fn remaining(deadline: Instant) -> Duration {
    deadline.saturating_duration_since(Instant::now())
}
