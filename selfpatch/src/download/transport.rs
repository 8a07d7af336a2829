//! Transport abstraction for resumable downloads.
//!
//! [`Transport`] is the seam between the resume/verify logic and the network.
//! [`HttpTransport`] implements it over a blocking `reqwest` client using
//! `Range` requests for resume and conditional headers for not-modified
//! checks.

use std::io::Read;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{CONTENT_RANGE, IF_MODIFIED_SINCE, IF_NONE_MATCH, RANGE};
use reqwest::StatusCode;

use super::error::{DownloadError, DownloadResult};

/// Default timeout for HTTP requests in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Validators for a conditional fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Conditional {
    /// Entity tag from a previous response.
    pub etag: Option<String>,
    /// `Last-Modified` value from a previous response.
    pub last_modified: Option<String>,
}

impl Conditional {
    /// Whether no validator is set.
    pub fn is_empty(&self) -> bool {
        self.etag.is_none() && self.last_modified.is_none()
    }
}

/// A single fetch of a remote object.
#[derive(Debug, Clone, Copy)]
pub struct FetchRequest<'a> {
    /// Source URL.
    pub url: &'a str,
    /// Byte offset to resume from. Zero fetches the whole object.
    pub offset: u64,
    /// Validators for a conditional fetch.
    pub conditional: Option<&'a Conditional>,
}

/// Body of a successful fetch.
pub struct ResponseBody {
    /// Offset of the first byte of `reader` within the object.
    ///
    /// Zero when the server ignored the range request.
    pub start: u64,
    /// Total length of the object, if the server reported it.
    pub total_length: Option<u64>,
    /// The body stream.
    pub reader: Box<dyn Read + Send>,
}

impl std::fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseBody")
            .field("start", &self.start)
            .field("total_length", &self.total_length)
            .finish_non_exhaustive()
    }
}

/// Outcome of a fetch.
#[derive(Debug)]
pub enum FetchResponse {
    /// The conditional fetch matched; no body was sent.
    NotModified,
    /// Body bytes follow.
    Body(ResponseBody),
}

/// Fetches remote objects for the downloader.
pub trait Transport: Send + Sync {
    /// Issue one fetch.
    fn fetch(&self, request: &FetchRequest<'_>) -> DownloadResult<FetchResponse>;
}

/// HTTP(S) transport over a blocking `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    timeout: Duration,
}

impl HttpTransport {
    /// Create a transport with the default timeout.
    pub fn new() -> DownloadResult<Self> {
        Self::with_timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    /// Create a transport with a custom timeout.
    pub fn with_timeout(timeout: Duration) -> DownloadResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DownloadError::Client(e.to_string()))?;

        Ok(Self { client, timeout })
    }

    /// The configured request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Transport for HttpTransport {
    fn fetch(&self, request: &FetchRequest<'_>) -> DownloadResult<FetchResponse> {
        let url = request.url;
        let mut builder = self.client.get(url);

        if request.offset > 0 {
            builder = builder.header(RANGE, format!("bytes={}-", request.offset));
        }
        if let Some(conditional) = request.conditional {
            if let Some(ref etag) = conditional.etag {
                builder = builder.header(IF_NONE_MATCH, etag.as_str());
            }
            if let Some(ref last_modified) = conditional.last_modified {
                builder = builder.header(IF_MODIFIED_SINCE, last_modified.as_str());
            }
        }

        let response = builder.send().map_err(|e| {
            if e.is_timeout() {
                DownloadError::Timeout {
                    url: url.to_string(),
                    timeout_secs: self.timeout.as_secs(),
                }
            } else {
                DownloadError::TransferFailed {
                    url: url.to_string(),
                    reason: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        if status == StatusCode::NOT_MODIFIED {
            return Ok(FetchResponse::NotModified);
        }

        let (start, total_length) = if status == StatusCode::PARTIAL_CONTENT {
            let range = response
                .headers()
                .get(CONTENT_RANGE)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_content_range);
            match range {
                Some((start, total)) => (start, total),
                None => (
                    request.offset,
                    response.content_length().map(|l| l + request.offset),
                ),
            }
        } else if status.is_success() {
            (0, response.content_length())
        } else {
            return Err(DownloadError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        };

        Ok(FetchResponse::Body(ResponseBody {
            start,
            total_length,
            reader: Box::new(response),
        }))
    }
}

/// Parse a `Content-Range` value such as `bytes 100-999/1000`.
///
/// Returns the first byte offset and the total length (`None` for `*`).
fn parse_content_range(value: &str) -> Option<(u64, Option<u64>)> {
    let rest = value.trim().strip_prefix("bytes")?.trim_start();
    let (range, total) = rest.split_once('/')?;
    let (first, _last) = range.split_once('-')?;
    let start = first.trim().parse::<u64>().ok()?;
    let total = match total.trim() {
        "*" => None,
        t => Some(t.parse::<u64>().ok()?),
    };
    Some((start, total))
}
