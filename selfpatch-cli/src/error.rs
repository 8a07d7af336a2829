//! CLI error type.

use thiserror::Error;

use selfpatch::handoff::HandoffError;
use selfpatch::lock::LockError;
use selfpatch::patch::PatchError;
use selfpatch::update::UpdateError;

/// Errors reported by CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid arguments or environment.
    #[error("Configuration error: {0}")]
    Config(String),
    /// Another process holds the lock needed for the command.
    #[error("Busy: {0}")]
    Busy(String),
    /// One or more payloads failed verification.
    #[error("Download failed: {0}")]
    Download(String),
    #[error("Update failed: {0}")]
    Update(#[from] UpdateError),
    #[error("Lock error: {0}")]
    Lock(#[from] LockError),
    #[error("Patch error: {0}")]
    Patch(#[from] PatchError),
    #[error("Handoff failed: {0}")]
    Handoff(#[from] HandoffError),
}

impl CliError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            CliError::Busy(_) => 3,
            CliError::Config(_) => 2,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_busy_exit_code() {
        assert_eq!(CliError::Busy("updater".to_string()).exit_code(), 3);
        assert_eq!(CliError::Download("p1".to_string()).exit_code(), 1);
    }

    #[test]
    fn test_display_wraps_library_error() {
        let err = CliError::from(UpdateError::UnknownVersion("/opt/app/.selfpatch/version".into()));
        assert_eq!(
            err.to_string(),
            "Update failed: no installed version recorded at /opt/app/.selfpatch/version"
        );
    }
}
