//! Patch chain application.
//!
//! [`BatchPatcher`] walks an ordered list of [`PatchDescriptor`]s, hands
//! each payload to a [`PatchApplier`] and folds the operations the applier
//! could not complete into a [`PendingReplacementMap`]. When the run ends
//! with pending replacements they are written to a pending-replacement file
//! for the handoff process.
//!
//! # Example
//!
//! ```ignore
//! use selfpatch::patch::{BatchPatcher, ManifestPatchApplier, NoopObserver};
//!
//! let patcher = BatchPatcher::new(ManifestPatchApplier::new(), payload_dir);
//! let outcome = patcher.apply_all(&NoopObserver, &install, &work, current, &patches)?;
//! if outcome.needs_handoff() {
//!     write_pending_file(&pending_file, &outcome.handoff_ops())?;
//! }
//! ```

mod applier;
mod descriptor;
mod error;
mod manifest;
mod ops;
mod orchestrator;
mod pending;

pub use applier::{ApplyRequest, PatchApplier, ACTION_LOG_FILE};
pub use descriptor::{DecryptionKey, PatchDescriptor, SourceRequirement};
pub use error::{PatchError, PatchResult};
pub use manifest::{ManifestOp, ManifestPatchApplier, PatchManifest, FORMAT_VERSION};
pub use ops::{ReplacementKind, ReplacementOp};
pub use orchestrator::{BatchObserver, BatchOutcome, BatchPatcher, InvalidPatch, NoopObserver};
pub use pending::{
    format_pending, parse_pending, read_pending_file, write_pending_file, PendingEntry,
    PendingReplacementMap, PendingTriple,
};
