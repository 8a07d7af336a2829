//! Error types for cross-process locking.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for lock operations.
pub type LockResult<T> = Result<T, LockError>;

/// Errors raised by the lock coordinator.
///
/// Contention is never an error: a lock that cannot be obtained within its
/// timeout is reported as `Ok(None)`. The variants here are precondition
/// violations and unexpected I/O failures.
#[derive(Debug, Error)]
pub enum LockError {
    /// The lock directory does not exist or is not a directory.
    #[error("lock directory is not a directory: {0}")]
    NotADirectory(PathBuf),

    /// The lock path has no parent directory to create the marker in.
    #[error("invalid lock path: {0}")]
    InvalidPath(PathBuf),

    /// The marker file could not be opened or created.
    #[error("failed to open lock file {path}: {source}")]
    OpenFailed { path: PathBuf, source: io::Error },

    /// The lock directory could not be listed.
    #[error("failed to read lock directory {path}: {source}")]
    ReadDirFailed { path: PathBuf, source: io::Error },
}
