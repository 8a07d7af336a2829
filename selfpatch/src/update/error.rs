//! Error types for the update control flow.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::download::{DownloadError, DownloadStatus};
use crate::lock::LockError;
use crate::patch::PatchError;

/// Result type for update operations.
pub type UpdateResult<T> = Result<T, UpdateError>;

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error(transparent)]
    Patch(#[from] PatchError),

    /// A state or work directory operation failed.
    #[error("I/O error on {path}: {source}")]
    Io { path: PathBuf, source: io::Error },

    /// No installed version is recorded.
    #[error("no installed version recorded at {0}")]
    UnknownVersion(PathBuf),

    /// The recorded installed version cannot be parsed.
    #[error("invalid installed version in {path}: {reason}")]
    InvalidVersion { path: PathBuf, reason: String },

    /// The patch catalog cannot be parsed.
    #[error("invalid catalog {source_name}: {reason}")]
    InvalidCatalog { source_name: String, reason: String },

    /// A payload download ended without a verified file.
    #[error("download of patch {patch_id} failed: {status:?}")]
    DownloadFailed {
        patch_id: String,
        status: DownloadStatus,
    },

    /// The handoff process could not be started.
    #[error("failed to start handoff {program}: {source}")]
    SpawnHandoff { program: PathBuf, source: io::Error },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_download_failed_display() {
        let err = UpdateError::DownloadFailed {
            patch_id: "p1".to_string(),
            status: DownloadStatus::ChecksumFailed,
        };
        assert_eq!(err.to_string(), "download of patch p1 failed: ChecksumFailed");
    }
}
