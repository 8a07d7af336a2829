//! Pending replacements accumulated over a patch chain, and their on-disk
//! form handed to the handoff process.
//!
//! # File format
//!
//! UTF-8 text, repeating groups of three lines:
//!
//! ```text
//! <destination>
//! <staged new content, or empty>
//! <backup destination, or empty>
//! ```
//!
//! A group with a missing line, or with an empty destination, ends the list.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};

use super::error::{PatchError, PatchResult};
use super::ops::{ReplacementKind, ReplacementOp};

/// Latest pending content for one destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry {
    /// Path that should eventually occupy the destination. For a removal
    /// this is where the destination is to be moved.
    pub source: PathBuf,
    /// Kind of the operation that recorded the entry.
    pub kind: ReplacementKind,
}

/// Destination → latest staged source, across the whole chain.
///
/// Holds at most one entry per destination. A later operation on the same
/// destination overwrites the earlier entry, and an operation whose
/// destination is the staged source of an earlier entry retargets that
/// entry instead of adding an alias.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingReplacementMap {
    entries: BTreeMap<PathBuf, PendingEntry>,
}

impl PendingReplacementMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a deferred operation.
    ///
    /// Operations without a pending source are ignored.
    pub fn merge(&mut self, op: &ReplacementOp) {
        if let Some(source) = op.pending_source() {
            self.record(&op.destination, source, op.kind);
        }
    }

    /// Record `source` as the pending content for `destination`.
    pub fn record(&mut self, destination: &Path, source: &Path, kind: ReplacementKind) {
        let destination = normalize(destination);
        let entry = PendingEntry {
            source: normalize(source),
            kind,
        };

        let alias = self
            .entries
            .iter()
            .find(|(_, e)| e.source == destination)
            .map(|(k, _)| k.clone());

        self.entries.insert(alias.unwrap_or(destination), entry);
    }

    /// Drop the entry for `destination`, returning it.
    pub fn resolve(&mut self, destination: &Path) -> Option<PendingEntry> {
        self.entries.remove(&normalize(destination))
    }

    /// Pending entry for `destination`.
    pub fn get(&self, destination: &Path) -> Option<&PendingEntry> {
        self.entries.get(&normalize(destination))
    }

    /// Whether `destination` has a pending entry.
    pub fn contains(&self, destination: &Path) -> bool {
        self.get(destination).is_some()
    }

    /// Number of pending destinations.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over entries in destination order.
    pub fn iter(&self) -> impl Iterator<Item = (&Path, &PendingEntry)> {
        self.entries.iter().map(|(k, v)| (k.as_path(), v))
    }
}

/// Lexically normalize a path: drop `.` and fold `..`.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    out
}

/// One group of the pending-replacement file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTriple {
    pub destination: PathBuf,
    pub staged: Option<PathBuf>,
    pub backup: Option<PathBuf>,
}

impl PendingTriple {
    /// A triple with neither staged content nor backup asks for the
    /// destination to exist as a directory.
    pub fn is_directory(&self) -> bool {
        self.staged.is_none() && self.backup.is_none()
    }
}

impl From<&ReplacementOp> for PendingTriple {
    fn from(op: &ReplacementOp) -> Self {
        Self {
            destination: op.destination.clone(),
            staged: op.staged.clone().filter(|p| !p.as_os_str().is_empty()),
            backup: op.backup.clone().filter(|p| !p.as_os_str().is_empty()),
        }
    }
}

/// Render triples in the pending-replacement format.
pub fn format_pending(triples: &[PendingTriple]) -> Result<String, String> {
    let mut out = String::new();
    for triple in triples {
        for path in [
            Some(&triple.destination),
            triple.staged.as_ref(),
            triple.backup.as_ref(),
        ] {
            let line = path
                .map(|p| {
                    p.to_str()
                        .ok_or_else(|| format!("path is not valid UTF-8: {}", p.display()))
                })
                .transpose()?
                .unwrap_or("");
            if line.contains(['\n', '\r']) {
                return Err(format!("path contains a line break: {:?}", line));
            }
            out.push_str(line);
            out.push('\n');
        }
    }
    Ok(out)
}

/// Parse the pending-replacement format.
pub fn parse_pending(text: &str) -> Vec<PendingTriple> {
    let lines: Vec<&str> = text.lines().collect();
    let optional = |s: &str| {
        if s.is_empty() {
            None
        } else {
            Some(PathBuf::from(s))
        }
    };

    lines
        .chunks(3)
        .take_while(|group| group.len() == 3 && !group[0].is_empty())
        .map(|group| PendingTriple {
            destination: PathBuf::from(group[0]),
            staged: optional(group[1]),
            backup: optional(group[2]),
        })
        .collect()
}

/// Write deferred operations to `path`.
///
/// The file is written next to its final location and renamed into place.
pub fn write_pending_file(path: &Path, ops: &[ReplacementOp]) -> PatchResult<()> {
    let triples: Vec<PendingTriple> = ops.iter().map(PendingTriple::from).collect();
    let text = format_pending(&triples).map_err(|reason| PatchError::InvalidPendingFile {
        path: path.to_path_buf(),
        reason,
    })?;

    let tmp = path.with_extension("tmp");
    fs::write(&tmp, text).map_err(|e| PatchError::WriteFailed {
        path: tmp.clone(),
        source: e,
    })?;
    fs::rename(&tmp, path).map_err(|e| PatchError::WriteFailed {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Read the pending-replacement file at `path`.
pub fn read_pending_file(path: &Path) -> PatchResult<Vec<PendingTriple>> {
    let text = fs::read_to_string(path).map_err(|e| PatchError::ReadFailed {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(parse_pending(&text))
}
