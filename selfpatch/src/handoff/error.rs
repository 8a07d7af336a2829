//! Error types for the handoff process.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::lock::LockError;
use crate::patch::PatchError;

/// Result type for handoff operations.
pub type HandoffResult<T> = Result<T, HandoffError>;

/// Errors that stop the handoff before or after the replacement loop.
///
/// Rename failures inside the loop are not errors: they end in a
/// [`super::DeadlineChoice`].
#[derive(Debug, Error)]
pub enum HandoffError {
    /// Another update process holds the lock directory.
    #[error("another update is in progress in {0}")]
    UpdateInProgress(PathBuf),

    /// Lock directory problem.
    #[error(transparent)]
    Lock(#[from] LockError),

    /// The pending-replacement file could not be read or removed.
    #[error(transparent)]
    Pending(#[from] PatchError),

    /// The handoff configuration file could not be read.
    #[error("failed to read handoff config {path}: {reason}")]
    Config { path: PathBuf, reason: String },

    /// The relaunch command could not be started.
    #[error("failed to relaunch {command}: {source}")]
    Relaunch { command: String, source: io::Error },
}
