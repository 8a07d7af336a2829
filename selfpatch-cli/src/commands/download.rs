//! Payload download command.

use selfpatch::download::DownloadStatus;
use selfpatch::update::{DownloadRun, Updater, UpdaterConfig};

use super::common::{load_catalog, DownloadBar};
use crate::error::CliError;

/// Download every payload in the catalog at `catalog`.
pub fn run(config: UpdaterConfig, catalog: &str) -> Result<(), CliError> {
    let updater = Updater::http(config)?;
    let catalog = load_catalog(&updater, catalog)?;

    println!(
        "Downloading {} payload(s) to {}",
        catalog.patches.len(),
        updater.config().payload_dir.display()
    );

    let bar = DownloadBar::new();
    let run = updater.download_patches(&bar, &catalog.patches);
    bar.finish();

    let results = match run? {
        DownloadRun::Busy => {
            return Err(CliError::Busy(
                "another downloader or updater holds the lock".to_string(),
            ))
        }
        DownloadRun::Finished(results) => results,
    };

    let mut failed = Vec::new();
    for result in &results {
        match result.status {
            DownloadStatus::Succeed => println!("  {:<16} ok", result.patch_id),
            DownloadStatus::FileNotModified => println!("  {:<16} unchanged", result.patch_id),
            status => {
                println!("  {:<16} {:?}", result.patch_id, status);
                failed.push(result.patch_id.clone());
            }
        }
    }

    if failed.is_empty() {
        Ok(())
    } else {
        Err(CliError::Download(failed.join(", ")))
    }
}
