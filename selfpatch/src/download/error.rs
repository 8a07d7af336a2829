//! Error types for downloads.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for download operations.
pub type DownloadResult<T> = Result<T, DownloadError>;

/// Errors that abort a download.
///
/// A checksum mismatch is not an error: it is retried and, once the retry
/// budget is spent, reported as [`super::DownloadStatus::ChecksumFailed`].
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Failed to read the target file.
    #[error("failed to read {path}: {source}")]
    ReadFailed { path: PathBuf, source: io::Error },

    /// Failed to write the target file.
    #[error("failed to write {path}: {source}")]
    WriteFailed { path: PathBuf, source: io::Error },

    /// Failed to create the target's parent directory.
    #[error("failed to create directory {path}: {source}")]
    CreateDirFailed { path: PathBuf, source: io::Error },

    /// The transfer itself failed.
    #[error("failed to download {url}: {reason}")]
    TransferFailed { url: String, reason: String },

    /// The server answered with an unexpected status.
    #[error("unexpected HTTP status {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    /// Network timeout.
    #[error("request to {url} timed out after {timeout_secs}s")]
    Timeout { url: String, timeout_secs: u64 },

    /// The HTTP client could not be built.
    #[error("HTTP client error: {0}")]
    Client(String),
}
