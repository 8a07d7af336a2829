//! Download and update control flow.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use semver::Version;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::config::UpdaterConfig;
use super::error::{UpdateError, UpdateResult};
use crate::download::{
    DownloadListener, DownloadRequest, DownloadStatus, HttpTransport, ResumableDownloader,
    Transport,
};
use crate::lock::{LockCoordinator, LockKind};
use crate::patch::{
    write_pending_file, BatchObserver, BatchPatcher, InvalidPatch, ManifestPatchApplier,
    PatchDescriptor,
};
use crate::version::parse_version;

/// State directory inside the installation.
pub const STATE_DIR: &str = ".selfpatch";

/// Installed version file inside [`STATE_DIR`].
pub const VERSION_FILE: &str = "version";

/// Pending-replacement file inside the work directory.
pub const PENDING_FILE: &str = "pending_replacements.txt";

/// Path of the installed version file.
pub fn version_file(install_dir: &Path) -> PathBuf {
    install_dir.join(STATE_DIR).join(VERSION_FILE)
}

/// Read the installed version, `None` if none is recorded.
pub fn read_installed_version(install_dir: &Path) -> UpdateResult<Option<Version>> {
    let path = version_file(install_dir);
    let text = match fs::read_to_string(&path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(UpdateError::Io { path, source: e }),
    };
    parse_version(&text)
        .map(Some)
        .map_err(|e| UpdateError::InvalidVersion {
            path,
            reason: e.to_string(),
        })
}

/// Record `version` as installed.
pub fn write_installed_version(install_dir: &Path, version: &Version) -> UpdateResult<()> {
    let path = version_file(install_dir);
    let io_err = |e| UpdateError::Io {
        path: path.clone(),
        source: e,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    fs::write(&path, format!("{}\n", version)).map_err(io_err)
}

/// Per-patch download result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchDownload {
    pub patch_id: String,
    pub status: DownloadStatus,
}

/// Result of [`Updater::download_patches`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadRun {
    /// Another downloader or updater holds the lock.
    Busy,
    Finished(Vec<PatchDownload>),
}

/// Result of [`Updater::update`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Another process blocks the update: a downloader, an updater or a
    /// running application instance.
    Busy,
    /// Everything was applied in place; launch the application.
    Launch { version: Version },
    /// Replacements remain; the handoff process was started and the caller
    /// must exit so it can finish them.
    HandoffSpawned {
        version: Version,
        pending_file: PathBuf,
    },
    /// The run was cancelled between patches.
    Cancelled { version: Version },
}

/// Drives downloads and patch runs for one installation.
pub struct Updater<T: Transport> {
    config: UpdaterConfig,
    downloader: ResumableDownloader<T>,
    cancel: CancellationToken,
}

impl Updater<HttpTransport> {
    /// Updater over HTTP.
    pub fn http(config: UpdaterConfig) -> UpdateResult<Self> {
        let transport = match config.http_timeout {
            Some(timeout) => HttpTransport::with_timeout(timeout)?,
            None => HttpTransport::new()?,
        };
        Ok(Self::new(config, transport))
    }
}

impl<T: Transport> Updater<T> {
    pub fn new(config: UpdaterConfig, transport: T) -> Self {
        Self {
            config,
            downloader: ResumableDownloader::new(transport),
            cancel: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &UpdaterConfig {
        &self.config
    }

    pub fn downloader(&self) -> &ResumableDownloader<T> {
        &self.downloader
    }

    /// Token that cancels a patch run between patches.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// The installed version.
    pub fn installed_version(&self) -> UpdateResult<Option<Version>> {
        read_installed_version(&self.config.install_dir)
    }

    /// Download every payload while holding the DOWNLOADER lock.
    ///
    /// Existing complete payloads are verified without a transfer; partial
    /// ones are resumed.
    pub fn download_patches(
        &self,
        listener: &dyn DownloadListener,
        patches: &[PatchDescriptor],
    ) -> UpdateResult<DownloadRun> {
        let coordinator = self.coordinator()?;
        let Some(_lock) = coordinator.acquire(
            LockKind::Downloader,
            self.config.lock_timeout,
            self.config.lock_retry_delay,
        )?
        else {
            return Ok(DownloadRun::Busy);
        };

        create_dir(&self.config.payload_dir)?;
        let mut results = Vec::with_capacity(patches.len());
        for patch in patches {
            let target = self.config.payload_dir.join(patch.payload_file_name());
            let mut request = DownloadRequest::new(patch.url.clone(), target).with_retries(
                self.config.download_retries,
                self.config.download_retry_delay,
            );
            if let Some(checksum) = &patch.checksum {
                request = request.with_checksum(checksum.clone());
            }
            if let Some(length) = patch.length {
                request = request.with_length(length);
            }

            info!(patch = %patch.id, url = %patch.url, "Downloading patch");
            let outcome = self.downloader.download(listener, &request)?;
            results.push(PatchDownload {
                patch_id: patch.id.clone(),
                status: outcome.status,
            });
        }
        Ok(DownloadRun::Finished(results))
    }

    /// Apply `patches` while holding the UPDATER lock.
    ///
    /// The installed version is recorded after every finished patch. When
    /// replacements remain, the pending-replacement file is written and the
    /// handoff process is spawned with `relaunch` as the command to start
    /// afterwards.
    pub fn update(
        &self,
        observer: &dyn BatchObserver,
        patches: &[PatchDescriptor],
        relaunch: &[String],
    ) -> UpdateResult<UpdateOutcome> {
        let coordinator = self.coordinator()?;
        let Some(mut lock) = coordinator.acquire(
            LockKind::Updater,
            self.config.lock_timeout,
            self.config.lock_retry_delay,
        )?
        else {
            return Ok(UpdateOutcome::Busy);
        };

        let install_dir = &self.config.install_dir;
        let current = self
            .installed_version()?
            .ok_or_else(|| UpdateError::UnknownVersion(version_file(install_dir)))?;
        create_dir(&self.config.work_dir)?;
        create_dir(&self.config.payload_dir)?;

        let patcher = BatchPatcher::new(ManifestPatchApplier::new(), &self.config.payload_dir)
            .with_cancellation(self.cancel.clone());
        let recorder = VersionRecorder {
            inner: observer,
            install_dir,
        };
        let outcome = patcher.apply_all(
            &recorder,
            install_dir,
            &self.config.work_dir,
            current.clone(),
            patches,
        )?;

        let version = outcome.version.clone().unwrap_or_else(|| current.clone());
        if outcome.cancelled {
            return Ok(UpdateOutcome::Cancelled { version });
        }

        if !outcome.needs_handoff() {
            if version != current {
                write_installed_version(install_dir, &version)?;
            }
            info!(%version, "Update complete");
            return Ok(UpdateOutcome::Launch { version });
        }

        // The handoff finishes the chain, so the target version is recorded now.
        write_installed_version(install_dir, &version)?;
        let pending_file = self.config.work_dir.join(PENDING_FILE);
        write_pending_file(&pending_file, &outcome.handoff_ops())?;

        // The handoff needs the global lock held by the UPDATER lock.
        lock.release();
        self.spawn_handoff(&pending_file, relaunch)?;
        Ok(UpdateOutcome::HandoffSpawned {
            version,
            pending_file,
        })
    }

    fn spawn_handoff(&self, pending_file: &Path, relaunch: &[String]) -> UpdateResult<()> {
        let program = &self.config.handoff_program;
        info!(program = %program.display(), "Starting handoff");
        Command::new(program)
            .arg(&self.config.lock_dir)
            .arg(pending_file)
            .args(relaunch)
            .spawn()
            .map_err(|e| UpdateError::SpawnHandoff {
                program: program.clone(),
                source: e,
            })?;
        Ok(())
    }

    fn coordinator(&self) -> UpdateResult<LockCoordinator> {
        create_dir(&self.config.lock_dir)?;
        Ok(LockCoordinator::new(&self.config.lock_dir)?)
    }
}

fn create_dir(path: &Path) -> UpdateResult<()> {
    fs::create_dir_all(path).map_err(|e| UpdateError::Io {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Persists the installed version as patches finish.
struct VersionRecorder<'a> {
    inner: &'a dyn BatchObserver,
    install_dir: &'a Path,
}

impl BatchObserver for VersionRecorder<'_> {
    fn progress(&self, percent: f64, message: &str) {
        self.inner.progress(percent, message);
    }

    fn patch_invalid(&self, patch: &PatchDescriptor, reason: &InvalidPatch) {
        self.inner.patch_invalid(patch, reason);
    }

    fn patch_finished(&self, patch: &PatchDescriptor) {
        if let Err(e) = write_installed_version(self.install_dir, &patch.target) {
            warn!(patch = %patch.id, error = %e, "Could not record installed version");
        }
        self.inner.patch_finished(patch);
    }
}
