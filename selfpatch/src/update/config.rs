//! Updater configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default wait for a typed lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Default pause between lock attempts.
pub const DEFAULT_LOCK_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Default number of corrupt-download restarts.
pub const DEFAULT_DOWNLOAD_RETRIES: u32 = 2;

/// Default pause before a download restart.
pub const DEFAULT_DOWNLOAD_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Name of the handoff executable looked up next to the current one.
pub const HANDOFF_PROGRAM: &str = "selfpatch-handoff";

/// Directories and limits used by [`super::Updater`].
#[derive(Debug, Clone)]
pub struct UpdaterConfig {
    /// Installation being updated.
    pub install_dir: PathBuf,
    /// Shared lock directory.
    pub lock_dir: PathBuf,
    /// Scratch space for patch runs.
    pub work_dir: PathBuf,
    /// Where payloads are downloaded.
    pub payload_dir: PathBuf,
    pub lock_timeout: Duration,
    pub lock_retry_delay: Duration,
    pub download_retries: u32,
    pub download_retry_delay: Duration,
    /// HTTP timeout; `None` keeps the transport default.
    pub http_timeout: Option<Duration>,
    /// Handoff executable.
    pub handoff_program: PathBuf,
}

impl UpdaterConfig {
    /// Configuration for `install_dir` with directories under the user's
    /// local data directory.
    pub fn new(install_dir: impl Into<PathBuf>) -> Self {
        let base = default_base_dir();
        Self {
            install_dir: install_dir.into(),
            lock_dir: base.join("locks"),
            work_dir: base.join("work"),
            payload_dir: base.join("payloads"),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            lock_retry_delay: DEFAULT_LOCK_RETRY_DELAY,
            download_retries: DEFAULT_DOWNLOAD_RETRIES,
            download_retry_delay: DEFAULT_DOWNLOAD_RETRY_DELAY,
            http_timeout: None,
            handoff_program: default_handoff_program(),
        }
    }

    /// Put the lock, work and payload directories under `base`.
    pub fn with_base_dir(mut self, base: &Path) -> Self {
        self.lock_dir = base.join("locks");
        self.work_dir = base.join("work");
        self.payload_dir = base.join("payloads");
        self
    }

    pub fn with_lock_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.lock_dir = dir.into();
        self
    }

    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = dir.into();
        self
    }

    pub fn with_payload_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.payload_dir = dir.into();
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration, retry_delay: Duration) -> Self {
        self.lock_timeout = timeout;
        self.lock_retry_delay = retry_delay;
        self
    }

    pub fn with_download_retries(mut self, budget: u32, delay: Duration) -> Self {
        self.download_retries = budget;
        self.download_retry_delay = delay;
        self
    }

    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = Some(timeout);
        self
    }

    pub fn with_handoff_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.handoff_program = program.into();
        self
    }
}

/// `<local data dir>/selfpatch`, or `./.selfpatch` when unknown.
pub fn default_base_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("selfpatch"))
        .unwrap_or_else(|| PathBuf::from(".selfpatch"))
}

fn default_handoff_program() -> PathBuf {
    let name = format!("{}{}", HANDOFF_PROGRAM, std::env::consts::EXE_SUFFIX);
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(&name)))
        .unwrap_or_else(|| PathBuf::from(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_dir_layout() {
        let config = UpdaterConfig::new("/opt/app").with_base_dir(Path::new("/var/lib/sp"));

        assert_eq!(config.install_dir, PathBuf::from("/opt/app"));
        assert_eq!(config.lock_dir, PathBuf::from("/var/lib/sp/locks"));
        assert_eq!(config.work_dir, PathBuf::from("/var/lib/sp/work"));
        assert_eq!(config.payload_dir, PathBuf::from("/var/lib/sp/payloads"));
    }

    #[test]
    fn test_defaults() {
        let config = UpdaterConfig::new("/opt/app");
        assert_eq!(config.lock_timeout, DEFAULT_LOCK_TIMEOUT);
        assert_eq!(config.download_retries, DEFAULT_DOWNLOAD_RETRIES);
        assert!(config.http_timeout.is_none());
        assert!(config
            .handoff_program
            .to_string_lossy()
            .contains(HANDOFF_PROGRAM));
    }
}
