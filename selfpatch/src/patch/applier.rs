//! Interface to the component that applies a single patch payload.

use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;

use super::descriptor::{DecryptionKey, PatchDescriptor};
use super::error::PatchResult;
use super::ops::ReplacementOp;
use super::pending::PendingReplacementMap;

/// File name of the per-patch action log inside the patch work directory.
pub const ACTION_LOG_FILE: &str = "actions.log";

/// Everything an applier needs for one patch.
#[derive(Debug, Clone, Copy)]
pub struct ApplyRequest<'a> {
    pub patch: &'a PatchDescriptor,
    /// Downloaded payload file.
    pub payload: &'a Path,
    /// Installation being patched.
    pub install_dir: &'a Path,
    /// Work directory dedicated to this patch.
    pub work_dir: &'a Path,
    /// Key for an encrypted payload.
    pub key: Option<&'a DecryptionKey>,
    /// Cancellation for the whole run. Appliers may check it between steps.
    pub cancel: &'a CancellationToken,
}

/// Applies one patch payload to an installation.
///
/// Implementations return the operations they could not complete, typically
/// because the destination is in use. The running pending map is passed in
/// so an applier can finish replacements deferred by earlier patches.
pub trait PatchApplier {
    /// Apply the payload.
    ///
    /// `progress` receives the patch-internal percentage (0 to 100) and a
    /// short message.
    fn apply(
        &self,
        request: &ApplyRequest<'_>,
        pending: &mut PendingReplacementMap,
        progress: &dyn Fn(f64, &str),
    ) -> PatchResult<Vec<ReplacementOp>>;

    /// Discard backups recorded in `action_log` once the patch is final.
    fn clear_backup(&self, action_log: &Path) -> PatchResult<()>;

    /// Undo the actions recorded in `action_log`.
    fn revert(&self, action_log: &Path) -> PatchResult<()>;

    /// Location of the action log for a patch work directory.
    fn action_log(&self, work_dir: &Path) -> PathBuf {
        work_dir.join(ACTION_LOG_FILE)
    }
}
