//! Common types and utilities shared across CLI commands.

use std::path::{Path, PathBuf};

use clap::ValueEnum;
use indicatif::{ProgressBar, ProgressStyle};
use selfpatch::download::{DownloadListener, DownloadStatus, Transport};
use selfpatch::lock::LockKind;
use selfpatch::patch::{BatchObserver, InvalidPatch, PatchDescriptor};
use selfpatch::update::{Catalog, Updater, UpdaterConfig};

use crate::error::CliError;

/// Lock kind selection for CLI arguments.
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum LockKindArg {
    /// Shared lock of a running application
    Instance,
    /// Payload download lock
    Downloader,
    /// Exclusive patch-run lock
    Updater,
}

impl From<LockKindArg> for LockKind {
    fn from(kind: LockKindArg) -> Self {
        match kind {
            LockKindArg::Instance => LockKind::Instance,
            LockKindArg::Downloader => LockKind::Downloader,
            LockKindArg::Updater => LockKind::Updater,
        }
    }
}

/// Updater configuration for `install_dir`, with state under `state_dir`
/// when given.
pub fn updater_config(install_dir: PathBuf, state_dir: Option<&Path>) -> UpdaterConfig {
    let config = UpdaterConfig::new(install_dir);
    match state_dir {
        Some(dir) => config.with_base_dir(dir),
        None => config,
    }
}

/// Load the catalog at `location`, a file path or URL.
pub fn load_catalog<T: Transport>(
    updater: &Updater<T>,
    location: &str,
) -> Result<Catalog, CliError> {
    let catalog = Catalog::load(updater.downloader(), location)?;
    if catalog.patches.is_empty() {
        println!("Catalog {} lists no patches", location);
    }
    Ok(catalog)
}

fn bar_style(template: &str) -> Option<ProgressStyle> {
    ProgressStyle::with_template(template)
        .ok()
        .map(|style| style.progress_chars("=> "))
}

/// Download progress rendered as a byte bar.
pub struct DownloadBar {
    bar: ProgressBar,
}

impl DownloadBar {
    pub fn new() -> Self {
        let bar = ProgressBar::new(0);
        if let Some(style) =
            bar_style("{msg:<12} [{bar:30.cyan/blue}] {bytes:>10}/{total_bytes:10} {bytes_per_sec}")
        {
            bar.set_style(style);
        }
        bar.set_message("payload");
        Self { bar }
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl DownloadListener for DownloadBar {
    fn byte_start(&self, offset: u64) {
        self.bar.set_position(offset);
    }

    fn byte_total(&self, total: u64) {
        self.bar.set_length(total);
    }

    fn byte_downloaded(&self, n: u64) {
        self.bar.inc(n);
    }

    fn download_retry(&self, reason: DownloadStatus) {
        self.bar.set_position(0);
        self.bar.println(format!("Retrying download: {:?}", reason));
    }
}

/// Patch-run progress rendered as a percentage bar.
pub struct PatchBar {
    bar: ProgressBar,
}

impl PatchBar {
    pub fn new() -> Self {
        let bar = ProgressBar::new(100);
        if let Some(style) = bar_style("[{bar:30.green/white}] {pos:>3}% {wide_msg}") {
            bar.set_style(style);
        }
        Self { bar }
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl BatchObserver for PatchBar {
    fn progress(&self, percent: f64, message: &str) {
        self.bar.set_position(percent.round() as u64);
        self.bar.set_message(message.to_string());
    }

    fn patch_invalid(&self, patch: &PatchDescriptor, reason: &InvalidPatch) {
        self.bar.println(format!("Skipped patch {}: {}", patch.id, reason));
    }

    fn patch_finished(&self, patch: &PatchDescriptor) {
        self.bar.println(format!("Applied patch {} ({})", patch.id, patch.target));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_dir_overrides_defaults() {
        let config = updater_config(PathBuf::from("/opt/app"), Some(Path::new("/var/lib/sp")));
        assert_eq!(config.lock_dir, PathBuf::from("/var/lib/sp/locks"));
        assert_eq!(config.payload_dir, PathBuf::from("/var/lib/sp/payloads"));
        assert_eq!(config.install_dir, PathBuf::from("/opt/app"));
    }

    #[test]
    fn test_lock_kind_conversion() {
        assert_eq!(LockKind::from(LockKindArg::Updater), LockKind::Updater);
        assert_eq!(LockKind::from(LockKindArg::Instance), LockKind::Instance);
    }
}
