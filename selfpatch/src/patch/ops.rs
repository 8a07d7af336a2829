//! Replacement operations a patch could not complete in place.

use std::path::{Path, PathBuf};

/// What a patch wanted to do to a destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReplacementKind {
    /// Delete the destination.
    Remove,
    /// Overwrite the destination with new content.
    Replace,
    /// Overwrite the destination with a binary-patched version of itself.
    Patch,
    /// Overwrite the destination regardless of its current content.
    Force,
    /// Create a destination that did not exist.
    New,
}

/// A deferred change to one destination file.
///
/// Only produced for destinations the applier could not touch, typically
/// because the running application holds them open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplacementOp {
    pub kind: ReplacementKind,
    /// File to be replaced or removed.
    pub destination: PathBuf,
    /// Staged content to move into place.
    pub staged: Option<PathBuf>,
    /// Where the previous destination content goes.
    pub backup: Option<PathBuf>,
}

impl ReplacementOp {
    /// Create an operation.
    pub fn new(
        kind: ReplacementKind,
        destination: impl Into<PathBuf>,
        staged: Option<PathBuf>,
        backup: Option<PathBuf>,
    ) -> Self {
        Self {
            kind,
            destination: destination.into(),
            staged,
            backup,
        }
    }

    /// The path that should eventually take the destination's place, as
    /// recorded in the pending-replacement map.
    ///
    /// A removal records its backup path: the destination is vacated into
    /// it. A new file is only recorded when both its destination and staged
    /// content are known.
    pub fn pending_source(&self) -> Option<&Path> {
        match self.kind {
            ReplacementKind::Remove => non_empty(self.backup.as_deref()),
            ReplacementKind::Replace | ReplacementKind::Patch | ReplacementKind::Force => {
                non_empty(self.staged.as_deref())
            }
            ReplacementKind::New => {
                if self.destination.as_os_str().is_empty() {
                    None
                } else {
                    non_empty(self.staged.as_deref())
                }
            }
        }
    }
}

fn non_empty(path: Option<&Path>) -> Option<&Path> {
    path.filter(|p| !p.as_os_str().is_empty())
}
