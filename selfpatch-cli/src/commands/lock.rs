//! Typed lock command for scripts and diagnostics.

use std::thread;
use std::time::Duration;

use selfpatch::lock::{LockCoordinator, LockKind};
use selfpatch::update::UpdaterConfig;

use super::common::LockKindArg;
use crate::error::CliError;

/// Acquire `kind` in the configured lock directory and hold it for `hold_ms`.
pub fn run(config: &UpdaterConfig, kind: LockKindArg, hold_ms: u64) -> Result<(), CliError> {
    let kind = LockKind::from(kind);
    std::fs::create_dir_all(&config.lock_dir).map_err(|e| {
        CliError::Config(format!(
            "Cannot create lock directory {}: {}",
            config.lock_dir.display(),
            e
        ))
    })?;
    let coordinator = LockCoordinator::new(&config.lock_dir)?;

    let Some(mut lock) =
        coordinator.acquire(kind, config.lock_timeout, config.lock_retry_delay)?
    else {
        return Err(CliError::Busy(format!("{} lock is not available", kind)));
    };

    println!("Acquired {} lock: {}", kind, lock.path().display());
    if hold_ms > 0 {
        thread::sleep(Duration::from_millis(hold_ms));
    }
    lock.release();
    println!("Released {} lock", kind);
    Ok(())
}
