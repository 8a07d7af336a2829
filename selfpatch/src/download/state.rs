//! State of a single resumable download.

/// Download state for one remote object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadState {
    /// Source URL.
    pub url: String,
    /// Expected total length, if known.
    pub expected_length: Option<u64>,
    /// Expected SHA-256 checksum (lowercase hex), if known.
    pub expected_checksum: Option<String>,
    /// Offset the current attempt resumed from.
    pub resume_offset: u64,
    /// Number of retries performed so far.
    pub retries: u32,
    /// Bytes received during the current attempt.
    pub bytes_this_attempt: u64,
    /// Bytes received over the network across all attempts.
    pub bytes_transferred: u64,
}

impl DownloadState {
    /// Create a new download state.
    pub fn new(
        url: impl Into<String>,
        expected_length: Option<u64>,
        expected_checksum: Option<String>,
    ) -> Self {
        Self {
            url: url.into(),
            expected_length,
            expected_checksum,
            resume_offset: 0,
            retries: 0,
            bytes_this_attempt: 0,
            bytes_transferred: 0,
        }
    }

    /// Expected length in the legacy encoding, `-1` when unknown.
    pub fn expected_length_or_unknown(&self) -> i64 {
        self.expected_length.map(|l| l as i64).unwrap_or(-1)
    }

    /// Start a new attempt resuming from `offset`.
    pub fn begin_attempt(&mut self, offset: u64) {
        self.resume_offset = offset;
        self.bytes_this_attempt = 0;
    }

    /// Record `n` bytes received.
    pub fn record_bytes(&mut self, n: u64) {
        self.bytes_this_attempt += n;
        self.bytes_transferred += n;
    }

    /// Record a retry.
    pub fn record_retry(&mut self) {
        self.retries += 1;
    }

    /// Bytes present on disk after the current attempt.
    pub fn bytes_on_disk(&self) -> u64 {
        self.resume_offset + self.bytes_this_attempt
    }

    /// Progress of the current attempt as a percentage.
    ///
    /// Returns `None` when the expected length is unknown.
    pub fn progress_percent(&self) -> Option<f64> {
        match self.expected_length {
            Some(0) => Some(100.0),
            Some(total) => Some((self.bytes_on_disk() as f64 / total as f64) * 100.0),
            None => None,
        }
    }
}
