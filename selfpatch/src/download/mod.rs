//! Resumable HTTP downloads of patch payloads.
//!
//! - `transport`: the [`Transport`] seam and its `reqwest` implementation
//! - `resumable`: range resume, length and SHA-256 verification, restart on
//!   corruption
//! - `checksum`: SHA-256 helpers
//! - `state`: per-download bookkeeping
//!
//! # Example
//!
//! ```ignore
//! use selfpatch::download::{DownloadRequest, HttpTransport, NoopListener, ResumableDownloader};
//!
//! let downloader = ResumableDownloader::new(HttpTransport::new()?);
//! let request = DownloadRequest::new("https://updates.example.com/p1.patch", "/tmp/p1.patch")
//!     .with_checksum("9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08")
//!     .with_length(4)
//!     .with_retries(2, std::time::Duration::from_secs(1));
//! let outcome = downloader.download(&NoopListener, &request)?;
//! ```

mod checksum;
mod error;
mod resumable;
mod state;
mod transport;

pub use checksum::{calculate_checksum, calculate_file_checksum, checksums_match};
pub use error::{DownloadError, DownloadResult};
pub use resumable::{
    DownloadListener, DownloadOutcome, DownloadRequest, DownloadStatus, NoopListener,
    ResumableDownloader,
};
pub use state::DownloadState;
pub use transport::{
    Conditional, FetchRequest, FetchResponse, HttpTransport, ResponseBody, Transport,
    DEFAULT_TIMEOUT_SECS,
};
