//! Patch run command.

use std::process::Command;

use selfpatch::update::{UpdateOutcome, Updater, UpdaterConfig};
use tracing::info;

use super::common::{load_catalog, PatchBar};
use crate::error::CliError;

/// Apply the catalog's patches, then relaunch or hand off.
///
/// Ctrl-C cancels the run at the next patch boundary.
pub fn run(config: UpdaterConfig, catalog: &str, relaunch: Vec<String>) -> Result<(), CliError> {
    let updater = Updater::http(config)?;
    let catalog = load_catalog(&updater, catalog)?;

    let cancel = updater.cancellation_token();
    ctrlc::set_handler(move || {
        eprintln!("\nCancelling after the current patch...");
        cancel.cancel();
    })
    .map_err(|e| CliError::Config(format!("Failed to set signal handler: {}", e)))?;

    let bar = PatchBar::new();
    let outcome = updater.update(&bar, &catalog.patches, &relaunch);
    bar.finish();

    match outcome? {
        UpdateOutcome::Busy => Err(CliError::Busy(
            "the application is running or another update holds the lock".to_string(),
        )),
        UpdateOutcome::Cancelled { version } => {
            println!("Update cancelled; installation is at {}", version);
            Ok(())
        }
        UpdateOutcome::HandoffSpawned {
            version,
            pending_file,
        } => {
            println!("Updated to {}; remaining files are replaced after exit", version);
            println!("  Pending replacements: {}", pending_file.display());
            Ok(())
        }
        UpdateOutcome::Launch { version } => {
            println!("Installation is at {}", version);
            launch(&relaunch)
        }
    }
}

fn launch(command: &[String]) -> Result<(), CliError> {
    let Some((program, args)) = command.split_first() else {
        return Ok(());
    };
    info!(program = %program, "Launching application");
    Command::new(program)
        .args(args)
        .spawn()
        .map_err(|e| CliError::Config(format!("Failed to launch {}: {}", program, e)))?;
    Ok(())
}
