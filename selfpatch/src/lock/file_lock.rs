//! Advisory lock on a single marker file.
//!
//! A [`FileLock`] owns the open handle of its marker file together with the
//! OS advisory lock taken on it (`flock` on Unix, `LockFileEx` on Windows,
//! through `fs2`). The kernel drops the lock when the owning process dies,
//! so a crashed updater never leaves an orphaned lock behind.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use fs2::FileExt;
use tracing::{debug, trace};

use super::error::{LockError, LockResult};

/// Floor on the pause between attempts, so a zero retry delay still yields.
const MIN_RETRY_DELAY: Duration = Duration::from_millis(1);

/// Whether a lock excludes every other holder or only writers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Writer lock. The default for all coordination markers.
    Exclusive,
    /// Reader lock, used to verify lock state from tooling and tests.
    Shared,
}

fn retry_pause(retry_delay: Duration, remaining: Duration) -> Duration {
    retry_delay.max(MIN_RETRY_DELAY).min(remaining)
}

/// A held advisory lock on a marker file.
///
/// The lock is released by [`FileLock::release`] or when the value is
/// dropped. Releasing twice is a no-op.
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
    mode: LockMode,
    file: Option<File>,
}

impl FileLock {
    /// Acquire an exclusive lock on `path`, retrying every `retry_delay`
    /// until `timeout` has elapsed.
    ///
    /// Returns `Ok(None)` when the lock is still held by someone else at the
    /// deadline. A zero `timeout` makes exactly one attempt.
    ///
    /// # Errors
    ///
    /// Fails immediately if the parent directory of `path` is missing or the
    /// marker file cannot be opened.
    pub fn acquire(
        path: &Path,
        timeout: Duration,
        retry_delay: Duration,
    ) -> LockResult<Option<Self>> {
        Self::acquire_with_mode(path, LockMode::Exclusive, timeout, retry_delay)
    }

    /// Acquire a shared lock on `path`. See [`FileLock::acquire`].
    pub fn acquire_shared(
        path: &Path,
        timeout: Duration,
        retry_delay: Duration,
    ) -> LockResult<Option<Self>> {
        Self::acquire_with_mode(path, LockMode::Shared, timeout, retry_delay)
    }

    /// Make a single non-blocking attempt at an exclusive lock.
    pub fn try_acquire(path: &Path) -> LockResult<Option<Self>> {
        Self::acquire_with_mode(path, LockMode::Exclusive, Duration::ZERO, Duration::ZERO)
    }

    /// Acquire a lock in the given mode.
    pub fn acquire_with_mode(
        path: &Path,
        mode: LockMode,
        timeout: Duration,
        retry_delay: Duration,
    ) -> LockResult<Option<Self>> {
        let parent = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or_else(|| LockError::InvalidPath(path.to_path_buf()))?;
        if !parent.is_dir() {
            return Err(LockError::NotADirectory(parent.to_path_buf()));
        }

        let deadline = Instant::now() + timeout;
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let file = open_marker(path)?;
            let locked = match mode {
                LockMode::Exclusive => FileExt::try_lock_exclusive(&file),
                LockMode::Shared => FileExt::try_lock_shared(&file),
            };

            match locked {
                Ok(()) => {
                    debug!(path = %path.display(), ?mode, attempts, "Lock acquired");
                    return Ok(Some(Self {
                        path: path.to_path_buf(),
                        mode,
                        file: Some(file),
                    }));
                }
                Err(e) => {
                    trace!(path = %path.display(), error = %e, "Lock busy");
                }
            }

            drop(file);

            let now = Instant::now();
            if now >= deadline {
                debug!(path = %path.display(), attempts, "Lock not acquired before timeout");
                return Ok(None);
            }
            thread::sleep(retry_pause(retry_delay, deadline - now));
        }
    }

    /// Path of the marker file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Mode the lock was taken in.
    pub fn mode(&self) -> LockMode {
        self.mode
    }

    /// Whether the lock is still held.
    pub fn is_held(&self) -> bool {
        self.file.is_some()
    }

    /// Release the lock. Safe to call more than once.
    pub fn release(&mut self) {
        if let Some(file) = self.file.take() {
            // Unlock first, then close the descriptor.
            let _ = FileExt::unlock(&file);
            drop(file);
            debug!(path = %self.path.display(), "Lock released");
        }
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        self.release();
    }
}

fn open_marker(path: &Path) -> LockResult<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(|e| LockError::OpenFailed {
            path: path.to_path_buf(),
            source: e,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const NO_WAIT: Duration = Duration::ZERO;

    #[test]
    fn test_acquire_creates_marker() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("marker");

        let lock = FileLock::acquire(&path, NO_WAIT, NO_WAIT).unwrap().unwrap();

        assert!(path.exists());
        assert!(lock.is_held());
        assert_eq!(lock.mode(), LockMode::Exclusive);
    }

    #[test]
    fn test_second_exclusive_is_refused() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("marker");

        let _held = FileLock::acquire(&path, NO_WAIT, NO_WAIT).unwrap().unwrap();
        let second = FileLock::try_acquire(&path).unwrap();

        assert!(second.is_none());
    }

    #[test]
    fn test_shared_locks_coexist_but_exclude_writers() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("marker");

        let _a = FileLock::acquire_shared(&path, NO_WAIT, NO_WAIT)
            .unwrap()
            .unwrap();
        let b = FileLock::acquire_shared(&path, NO_WAIT, NO_WAIT).unwrap();
        assert!(b.is_some());

        assert!(FileLock::try_acquire(&path).unwrap().is_none());
    }

    #[test]
    fn test_release_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("marker");

        let mut lock = FileLock::try_acquire(&path).unwrap().unwrap();
        lock.release();
        lock.release();
        assert!(!lock.is_held());

        assert!(FileLock::try_acquire(&path).unwrap().is_some());
    }

    #[test]
    fn test_zero_retry_delay_still_pauses() {
        assert_eq!(retry_pause(Duration::ZERO, Duration::from_secs(1)), MIN_RETRY_DELAY);
        assert_eq!(
            retry_pause(Duration::from_millis(20), Duration::from_millis(5)),
            Duration::from_millis(5)
        );
        assert_eq!(
            retry_pause(Duration::from_millis(20), Duration::from_secs(1)),
            Duration::from_millis(20)
        );
    }

    #[test]
    fn test_timeout_elapses_before_giving_up() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("marker");
        let _held = FileLock::try_acquire(&path).unwrap().unwrap();

        let start = Instant::now();
        let result = FileLock::acquire(
            &path,
            Duration::from_millis(200),
            Duration::from_millis(20),
        )
        .unwrap();

        assert!(result.is_none());
        assert!(start.elapsed() >= Duration::from_millis(200));
    }

    #[test]
    fn test_waits_for_holder_to_release() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("marker");
        let held = FileLock::try_acquire(&path).unwrap().unwrap();

        let releaser = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            drop(held);
        });

        let lock = FileLock::acquire(&path, Duration::from_secs(5), Duration::from_millis(10))
            .unwrap();
        releaser.join().unwrap();

        assert!(lock.is_some());
    }

    #[test]
    fn test_missing_parent_is_a_precondition_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("missing").join("marker");

        let result = FileLock::try_acquire(&path);

        assert!(matches!(result, Err(LockError::NotADirectory(_))));
    }
}
