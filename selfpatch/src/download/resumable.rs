//! Resumable, checksum-verified downloads.
//!
//! A download appends to whatever the target file already holds, using a
//! range request from the current file length. Once the expected length is
//! on disk the whole file is hashed; a mismatch discards the file and starts
//! over from zero while the retry budget lasts, since the position of the
//! corrupt bytes is unknown.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::checksum::{calculate_file_checksum, checksums_match};
use super::error::{DownloadError, DownloadResult};
use super::state::DownloadState;
use super::transport::{Conditional, FetchRequest, FetchResponse, Transport};

/// Buffer size for reading/writing during downloads (64KB).
const BUFFER_SIZE: usize = 64 * 1024;

/// Terminal status of a download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadStatus {
    /// The file is complete and verified.
    Succeed,
    /// The server reported the object unchanged; nothing was written.
    FileNotModified,
    /// The checksum did not match and the retry budget is spent.
    ChecksumFailed,
    /// The file length did not match and the retry budget is spent.
    LengthMismatch,
}

/// Receives download progress.
///
/// Callbacks run on the downloading thread and should return quickly.
pub trait DownloadListener: Send + Sync {
    /// An attempt starts writing at `offset`.
    fn byte_start(&self, _offset: u64) {}
    /// The total length of the object became known.
    fn byte_total(&self, _total: u64) {}
    /// `n` more bytes were written.
    fn byte_downloaded(&self, _n: u64) {}
    /// The download restarts because of `reason`.
    ///
    /// Listeners accumulating byte counts should reset them here.
    fn download_retry(&self, _reason: DownloadStatus) {}
}

/// Listener that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopListener;

impl DownloadListener for NoopListener {}

/// Parameters of one download.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    /// Source URL.
    pub url: String,
    /// File the download resumes into.
    pub target: PathBuf,
    /// Expected SHA-256 checksum of the complete file.
    pub expected_checksum: Option<String>,
    /// Expected length of the complete file.
    pub expected_length: Option<u64>,
    /// How many times a corrupt file may be discarded and fetched again.
    pub retry_budget: u32,
    /// Pause before each retry.
    pub retry_delay: Duration,
    /// Validators for a not-modified check.
    pub conditional: Option<Conditional>,
}

impl DownloadRequest {
    /// Create a request with no validation and no retries.
    pub fn new(url: impl Into<String>, target: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            target: target.into(),
            expected_checksum: None,
            expected_length: None,
            retry_budget: 0,
            retry_delay: Duration::ZERO,
            conditional: None,
        }
    }

    /// Set the expected checksum.
    pub fn with_checksum(mut self, checksum: impl Into<String>) -> Self {
        self.expected_checksum = Some(checksum.into());
        self
    }

    /// Set the expected length.
    pub fn with_length(mut self, length: u64) -> Self {
        self.expected_length = Some(length);
        self
    }

    /// Set the retry budget and delay.
    pub fn with_retries(mut self, budget: u32, delay: Duration) -> Self {
        self.retry_budget = budget;
        self.retry_delay = delay;
        self
    }

    /// Set conditional validators.
    pub fn with_conditional(mut self, conditional: Conditional) -> Self {
        self.conditional = Some(conditional);
        self
    }
}

/// Result of a download.
#[derive(Debug, Clone)]
pub struct DownloadOutcome {
    /// Terminal status.
    pub status: DownloadStatus,
    /// Final state, including retries and bytes transferred.
    pub state: DownloadState,
}

enum Attempt {
    Done(DownloadStatus),
    /// The file is wrong; discard it and start from zero.
    Corrupt(DownloadStatus),
    /// The transfer ended early; resume from the current length.
    Incomplete,
}

/// Downloader with range resume and checksum-triggered restart.
#[derive(Debug, Clone)]
pub struct ResumableDownloader<T: Transport> {
    transport: T,
}

impl<T: Transport> ResumableDownloader<T> {
    /// Create a downloader over `transport`.
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    /// The underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Download `request.url` into `request.target`.
    ///
    /// # Errors
    ///
    /// Transport failures and local I/O failures are returned as errors and
    /// leave the partial file in place for a later resume. Checksum and
    /// length problems are reported through [`DownloadStatus`].
    pub fn download(
        &self,
        listener: &dyn DownloadListener,
        request: &DownloadRequest,
    ) -> DownloadResult<DownloadOutcome> {
        if let Some(parent) = request.target.parent() {
            fs::create_dir_all(parent).map_err(|e| DownloadError::CreateDirFailed {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let mut state = DownloadState::new(
            request.url.clone(),
            request.expected_length,
            request.expected_checksum.clone(),
        );
        let mut budget = request.retry_budget;

        loop {
            let (reason, discard) = match self.attempt(listener, request, &mut state)? {
                Attempt::Done(status) => {
                    info!(
                        url = %request.url,
                        ?status,
                        bytes = state.bytes_transferred,
                        retries = state.retries,
                        "Download finished"
                    );
                    return Ok(DownloadOutcome { status, state });
                }
                Attempt::Corrupt(reason) => (reason, true),
                Attempt::Incomplete => (DownloadStatus::LengthMismatch, false),
            };

            if budget == 0 {
                warn!(url = %request.url, ?reason, "Download failed, no retries left");
                return Ok(DownloadOutcome {
                    status: reason,
                    state,
                });
            }
            budget -= 1;
            state.record_retry();
            warn!(url = %request.url, ?reason, retries_left = budget, "Retrying download");
            listener.download_retry(reason);

            if discard {
                discard_file(&request.target)?;
            }
            if !request.retry_delay.is_zero() {
                thread::sleep(request.retry_delay);
            }
        }
    }

    /// Fetch a small object fully into memory.
    ///
    /// Returns `None` when the server reports it not modified.
    pub fn fetch_bytes(
        &self,
        url: &str,
        conditional: Option<&Conditional>,
    ) -> DownloadResult<Option<Vec<u8>>> {
        let response = self.transport.fetch(&FetchRequest {
            url,
            offset: 0,
            conditional,
        })?;

        match response {
            FetchResponse::NotModified => Ok(None),
            FetchResponse::Body(mut body) => {
                let mut data = Vec::new();
                body.reader
                    .read_to_end(&mut data)
                    .map_err(|e| DownloadError::TransferFailed {
                        url: url.to_string(),
                        reason: format!("Read error: {}", e),
                    })?;
                Ok(Some(data))
            }
        }
    }

    fn attempt(
        &self,
        listener: &dyn DownloadListener,
        request: &DownloadRequest,
        state: &mut DownloadState,
    ) -> DownloadResult<Attempt> {
        let target = &request.target;
        let mut existing = file_len(target)?;

        if let Some(expected) = request.expected_length {
            if existing > expected {
                debug!(path = %target.display(), existing, expected, "Target longer than expected, restarting");
                discard_file(target)?;
                existing = 0;
            }
            if existing == expected && target.exists() {
                debug!(path = %target.display(), "Target already complete, verifying");
                state.begin_attempt(existing);
                listener.byte_start(existing);
                listener.byte_total(expected);
                return verify(request);
            }
        }

        let conditional = if existing == 0 {
            request.conditional.as_ref()
        } else {
            None
        };
        let response = self.transport.fetch(&FetchRequest {
            url: &request.url,
            offset: existing,
            conditional,
        })?;

        let mut body = match response {
            FetchResponse::NotModified => {
                debug!(url = %request.url, "Not modified");
                return Ok(Attempt::Done(DownloadStatus::FileNotModified));
            }
            FetchResponse::Body(body) => body,
        };

        let offset = if body.start == existing {
            existing
        } else if body.start == 0 {
            debug!(url = %request.url, existing, "Server ignored range request, restarting");
            0
        } else {
            return Err(DownloadError::TransferFailed {
                url: request.url.clone(),
                reason: format!(
                    "server resumed at byte {} instead of {}",
                    body.start, existing
                ),
            });
        };

        state.begin_attempt(offset);
        listener.byte_start(offset);
        if let Some(total) = request.expected_length.or(body.total_length) {
            listener.byte_total(total);
        }

        let file = open_for_write(target, offset)?;
        stream_to_file(&request.url, &mut body.reader, file, target, state, listener)?;

        verify(request)
    }
}

fn verify(request: &DownloadRequest) -> DownloadResult<Attempt> {
    let target = &request.target;
    let len = file_len(target)?;

    if let Some(expected) = request.expected_length {
        if len < expected {
            return Ok(Attempt::Incomplete);
        }
        if len > expected {
            return Ok(Attempt::Corrupt(DownloadStatus::LengthMismatch));
        }
    }

    if let Some(ref expected) = request.expected_checksum {
        let actual = calculate_file_checksum(target)?;
        if !checksums_match(expected, &actual) {
            warn!(path = %target.display(), %expected, %actual, "Checksum mismatch");
            return Ok(Attempt::Corrupt(DownloadStatus::ChecksumFailed));
        }
    }

    Ok(Attempt::Done(DownloadStatus::Succeed))
}

fn stream_to_file(
    url: &str,
    reader: &mut dyn Read,
    file: File,
    dest: &Path,
    state: &mut DownloadState,
    listener: &dyn DownloadListener,
) -> DownloadResult<()> {
    let mut writer = BufWriter::new(file);
    let mut buffer = vec![0u8; BUFFER_SIZE];

    loop {
        let bytes_read = reader
            .read(&mut buffer)
            .map_err(|e| DownloadError::TransferFailed {
                url: url.to_string(),
                reason: format!("Read error: {}", e),
            })?;

        if bytes_read == 0 {
            break;
        }

        writer
            .write_all(&buffer[..bytes_read])
            .map_err(|e| DownloadError::WriteFailed {
                path: dest.to_path_buf(),
                source: e,
            })?;

        state.record_bytes(bytes_read as u64);
        listener.byte_downloaded(bytes_read as u64);
    }

    writer.flush().map_err(|e| DownloadError::WriteFailed {
        path: dest.to_path_buf(),
        source: e,
    })
}

fn open_for_write(dest: &Path, offset: u64) -> DownloadResult<File> {
    let result = if offset > 0 {
        OpenOptions::new().append(true).open(dest)
    } else {
        File::create(dest)
    };
    result.map_err(|e| DownloadError::WriteFailed {
        path: dest.to_path_buf(),
        source: e,
    })
}

fn file_len(path: &Path) -> DownloadResult<u64> {
    match fs::metadata(path) {
        Ok(meta) => Ok(meta.len()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(DownloadError::ReadFailed {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

fn discard_file(path: &Path) -> DownloadResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(DownloadError::WriteFailed {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}
