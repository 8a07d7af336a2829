//! Update control flow on top of the lock, download and patch modules.
//!
//! [`Updater::download_patches`] fetches payloads under the DOWNLOADER lock.
//! [`Updater::update`] applies them under the UPDATER lock and either
//! returns [`UpdateOutcome::Launch`] or starts the handoff process.

mod catalog;
mod config;
mod error;
mod updater;

pub use catalog::Catalog;
pub use config::{
    default_base_dir, UpdaterConfig, DEFAULT_DOWNLOAD_RETRIES, DEFAULT_DOWNLOAD_RETRY_DELAY,
    DEFAULT_LOCK_RETRY_DELAY, DEFAULT_LOCK_TIMEOUT, HANDOFF_PROGRAM,
};
pub use error::{UpdateError, UpdateResult};
pub use updater::{
    read_installed_version, version_file, write_installed_version, DownloadRun, PatchDownload,
    UpdateOutcome, Updater, PENDING_FILE, STATE_DIR, VERSION_FILE,
};
