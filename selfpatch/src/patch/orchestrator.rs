//! Sequential application of a patch chain.

use std::fs;
use std::path::{Path, PathBuf};

use semver::Version;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::applier::{ApplyRequest, PatchApplier};
use super::descriptor::{PatchDescriptor, SourceRequirement};
use super::error::{PatchError, PatchResult};
use super::ops::{ReplacementKind, ReplacementOp};
use super::pending::PendingReplacementMap;

/// Why a patch was not applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidPatch {
    /// The installation is not at a version the patch applies to.
    VersionMismatch {
        current: Version,
        required: SourceRequirement,
    },
    /// The downloaded payload is missing.
    MissingPayload(PathBuf),
}

impl std::fmt::Display for InvalidPatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::VersionMismatch { current, required } => {
                write!(f, "installed version {} does not satisfy {}", current, required)
            }
            Self::MissingPayload(path) => write!(f, "payload missing at {}", path.display()),
        }
    }
}

/// Receives progress and per-patch notifications during a run.
pub trait BatchObserver {
    /// Overall progress, 0 to 100, non-decreasing across the run.
    fn progress(&self, percent: f64, message: &str);

    /// A patch was skipped or could not be applied.
    fn patch_invalid(&self, _patch: &PatchDescriptor, _reason: &InvalidPatch) {}

    /// A patch is fully applied and the installation is now at its target.
    fn patch_finished(&self, _patch: &PatchDescriptor) {}
}

/// Observer that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl BatchObserver for NoopObserver {
    fn progress(&self, _percent: f64, _message: &str) {}
}

/// Result of [`BatchPatcher::apply_all`].
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    /// Replacements still deferred at the end of the run.
    pub pending: PendingReplacementMap,
    /// Unresolved operations of the last applied patch.
    pub final_ops: Vec<ReplacementOp>,
    /// Installation version after the run.
    pub version: Option<Version>,
    /// Whether no deferred operations remain after the last applied patch.
    pub fully_resolved: bool,
    /// Ids of patches reported finished.
    pub finished: Vec<String>,
    /// Ids of patches skipped for a version mismatch.
    pub invalid: Vec<String>,
    /// Whether the run stopped early on cancellation.
    pub cancelled: bool,
}

impl BatchOutcome {
    /// Whether anything must be finished by the handoff process.
    pub fn needs_handoff(&self) -> bool {
        !self.handoff_ops().is_empty()
    }

    /// Operations to hand to the handoff process.
    ///
    /// The final patch's operations, followed by any pending entry the
    /// applier did not re-emit.
    pub fn handoff_ops(&self) -> Vec<ReplacementOp> {
        let mut ops = self.final_ops.clone();
        for (destination, entry) in self.pending.iter() {
            if ops.iter().any(|op| op.destination == destination) {
                continue;
            }
            ops.push(match entry.kind {
                ReplacementKind::Remove => {
                    ReplacementOp::new(entry.kind, destination, None, Some(entry.source.clone()))
                }
                kind => ReplacementOp::new(kind, destination, Some(entry.source.clone()), None),
            });
        }
        ops
    }
}

/// Applies patches one after another with a [`PatchApplier`].
///
/// Payloads are looked up in `payload_dir` under
/// [`PatchDescriptor::payload_file_name`]. Cancellation is checked before
/// each patch and handed to the applier for finer-grained checks.
pub struct BatchPatcher<A: PatchApplier> {
    applier: A,
    payload_dir: PathBuf,
    cancel: CancellationToken,
}

impl<A: PatchApplier> BatchPatcher<A> {
    /// Create a patcher reading payloads from `payload_dir`.
    pub fn new(applier: A, payload_dir: impl Into<PathBuf>) -> Self {
        Self {
            applier,
            payload_dir: payload_dir.into(),
            cancel: CancellationToken::new(),
        }
    }

    /// Use an externally controlled cancellation token.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that cancels the run between patches.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// The applier.
    pub fn applier(&self) -> &A {
        &self.applier
    }

    /// Path of the payload for `patch`.
    pub fn payload_path(&self, patch: &PatchDescriptor) -> PathBuf {
        self.payload_dir.join(patch.payload_file_name())
    }

    /// Apply `patches` in order to the installation at `install_dir`.
    ///
    /// Patches whose source requirement does not match the running version
    /// are reported through [`BatchObserver::patch_invalid`] and skipped.
    ///
    /// # Errors
    ///
    /// Fails if either directory is missing, a payload is missing, a work
    /// directory cannot be created, or the applier fails. A failing patch is
    /// reverted before the error is returned.
    pub fn apply_all(
        &self,
        observer: &dyn BatchObserver,
        install_dir: &Path,
        work_dir: &Path,
        current_version: Version,
        patches: &[PatchDescriptor],
    ) -> PatchResult<BatchOutcome> {
        for dir in [install_dir, work_dir] {
            if !dir.is_dir() {
                return Err(PatchError::NotADirectory(dir.to_path_buf()));
            }
        }

        let mut outcome = BatchOutcome {
            version: Some(current_version.clone()),
            fully_resolved: true,
            ..BatchOutcome::default()
        };
        let mut current = current_version;
        // Applied patches waiting for their deferred operations to resolve.
        let mut unfinished: Vec<(&PatchDescriptor, PathBuf, PathBuf)> = Vec::new();
        let count = patches.len().max(1) as f64;

        for (index, patch) in patches.iter().enumerate() {
            if self.cancel.is_cancelled() {
                info!(patch = %patch.id, "Patch run cancelled");
                outcome.cancelled = true;
                break;
            }

            // Each patch owns an equal share; the last one ends at exactly 100.
            let scale = |percent: f64| (index as f64 * 100.0 + percent.clamp(0.0, 100.0)) / count;

            if !patch.applies_to(&current) {
                let reason = InvalidPatch::VersionMismatch {
                    current: current.clone(),
                    required: patch.source.clone(),
                };
                warn!(patch = %patch.id, %reason, "Skipping patch");
                observer.patch_invalid(patch, &reason);
                outcome.invalid.push(patch.id.clone());
                observer.progress(scale(100.0), &format!("Skipped {}", patch.id));
                continue;
            }

            let payload = self.payload_path(patch);
            if !payload.is_file() {
                observer.patch_invalid(patch, &InvalidPatch::MissingPayload(payload.clone()));
                return Err(PatchError::MissingPayload {
                    patch_id: patch.id.clone(),
                    path: payload,
                });
            }

            let patch_work = work_dir.join(format!("patch_{}", patch.id));
            fs::create_dir_all(&patch_work).map_err(|e| PatchError::WorkDirFailed {
                path: patch_work.clone(),
                source: e,
            })?;

            info!(patch = %patch.id, from = %current, to = %patch.target, "Applying patch");
            let request = ApplyRequest {
                patch,
                payload: &payload,
                install_dir,
                work_dir: &patch_work,
                key: patch.key.as_ref(),
                cancel: &self.cancel,
            };
            let forward = |percent: f64, message: &str| observer.progress(scale(percent), message);

            let ops = match self.applier.apply(&request, &mut outcome.pending, &forward) {
                Ok(ops) => ops,
                Err(e) => {
                    warn!(patch = %patch.id, error = %e, "Patch failed, reverting");
                    if let Err(revert_err) = self.applier.revert(&self.applier.action_log(&patch_work))
                    {
                        warn!(patch = %patch.id, error = %revert_err, "Revert failed");
                    }
                    return Err(e);
                }
            };

            for op in &ops {
                outcome.pending.merge(op);
            }
            if !ops.is_empty() {
                debug!(patch = %patch.id, deferred = ops.len(), "Patch left deferred operations");
            }

            current = patch.target.clone();
            outcome.version = Some(current.clone());
            unfinished.push((patch, payload, patch_work));

            // Carry-over may have resolved what earlier patches deferred, in
            // which case those patches finish here too, oldest first.
            outcome.fully_resolved = ops.is_empty() && outcome.pending.is_empty();
            if outcome.fully_resolved {
                for (done, payload, patch_work) in unfinished.drain(..) {
                    self.finish(observer, &mut outcome, done, &payload, &patch_work)?;
                }
            }

            observer.progress(scale(100.0), &format!("Applied {}", patch.id));
            outcome.final_ops = ops;
        }

        if patches.is_empty() {
            observer.progress(100.0, "Nothing to apply");
        }
        Ok(outcome)
    }

    fn finish(
        &self,
        observer: &dyn BatchObserver,
        outcome: &mut BatchOutcome,
        patch: &PatchDescriptor,
        payload: &Path,
        patch_work: &Path,
    ) -> PatchResult<()> {
        observer.patch_finished(patch);
        outcome.finished.push(patch.id.clone());
        if let Err(e) = fs::remove_file(payload) {
            warn!(path = %payload.display(), error = %e, "Could not delete payload");
        }
        self.applier.clear_backup(&self.applier.action_log(patch_work))
    }
}
