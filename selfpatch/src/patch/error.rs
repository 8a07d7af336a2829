//! Error types for patch application.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for patch operations.
pub type PatchResult<T> = Result<T, PatchError>;

/// Errors that halt a patch run.
///
/// A version mismatch is not an error: the patch is skipped and reported
/// through [`super::BatchObserver::patch_invalid`].
#[derive(Debug, Error)]
pub enum PatchError {
    /// A required directory is missing or is not a directory.
    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),

    /// The per-patch work directory could not be created.
    #[error("failed to create work directory {path}: {source}")]
    WorkDirFailed { path: PathBuf, source: io::Error },

    /// The downloaded payload for a patch is missing.
    #[error("payload for patch {patch_id} not found at {path}")]
    MissingPayload { patch_id: String, path: PathBuf },

    /// Failed to read a file.
    #[error("failed to read {path}: {source}")]
    ReadFailed { path: PathBuf, source: io::Error },

    /// Failed to write, move or remove a file.
    #[error("failed to write {path}: {source}")]
    WriteFailed { path: PathBuf, source: io::Error },

    /// The payload could not be decoded.
    #[error("invalid patch payload {path}: {reason}")]
    InvalidPayload { path: PathBuf, reason: String },

    /// The action log could not be decoded.
    #[error("invalid action log {path}: {reason}")]
    InvalidActionLog { path: PathBuf, reason: String },

    /// The payload is encrypted and the applier cannot decrypt it.
    #[error("patch {0} is encrypted, which this applier does not support")]
    UnsupportedEncryption(String),

    /// A patch descriptor is malformed.
    #[error("invalid patch descriptor {id}: {reason}")]
    InvalidDescriptor { id: String, reason: String },

    /// The pending-replacement file is malformed.
    #[error("invalid pending-replacement file {path}: {reason}")]
    InvalidPendingFile { path: PathBuf, reason: String },

    /// The run was cancelled while a patch was being applied.
    #[error("patch {0} cancelled")]
    Cancelled(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_payload_display() {
        let err = PatchError::MissingPayload {
            patch_id: "p2".to_string(),
            path: PathBuf::from("/tmp/p2.patch"),
        };
        assert_eq!(err.to_string(), "payload for patch p2 not found at /tmp/p2.patch");
    }
}
