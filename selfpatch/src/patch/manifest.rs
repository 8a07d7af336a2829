//! Manifest-based patch payloads and the applier that installs them.
//!
//! A payload is a gzip-compressed JSON [`PatchManifest`]: an ordered list of
//! directory creations, whole-file writes and removals, with paths relative
//! to the installation root using `/` separators.
//!
//! # Work directory layout
//!
//! ```text
//! <work_dir>/
//! ├── staged/      new content waiting to be moved into place
//! ├── backup/      previous content of replaced or removed destinations
//! └── actions.log  one JSON record per completed action, for revert
//! ```

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::applier::{ApplyRequest, PatchApplier};
use super::error::{PatchError, PatchResult};
use super::ops::{ReplacementKind, ReplacementOp};
use super::pending::{PendingEntry, PendingReplacementMap};
use crate::fsutil::{is_in_use, move_unless_in_use};

/// Manifest format version understood by this crate.
pub const FORMAT_VERSION: u32 = 1;

const STAGED_DIR: &str = "staged";
const BACKUP_DIR: &str = "backup";
const CARRIED_DIR: &str = "carried";

/// One step of a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ManifestOp {
    /// Ensure a directory exists.
    CreateDir { path: String },
    /// Create or overwrite a file with `data`.
    Write { path: String, data: Vec<u8> },
    /// Remove a file or an empty directory.
    Remove { path: String },
}

impl ManifestOp {
    /// Relative path the operation targets.
    pub fn path(&self) -> &str {
        match self {
            Self::CreateDir { path } | Self::Write { path, .. } | Self::Remove { path } => path,
        }
    }
}

/// Ordered operations turning one release into the next.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchManifest {
    pub version: u32,
    pub operations: Vec<ManifestOp>,
}

impl Default for PatchManifest {
    fn default() -> Self {
        Self {
            version: FORMAT_VERSION,
            operations: Vec::new(),
        }
    }
}

impl PatchManifest {
    /// Create an empty manifest.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an operation.
    pub fn push(&mut self, op: ManifestOp) -> &mut Self {
        self.operations.push(op);
        self
    }

    /// Compute the manifest that turns `old_dir` into `new_dir`.
    ///
    /// Directories are created parents first, files written where their
    /// content differs, then removed files and directories are deleted
    /// children first.
    pub fn diff(old_dir: &Path, new_dir: &Path) -> PatchResult<Self> {
        let old = snapshot(old_dir)?;
        let new = snapshot(new_dir)?;
        let mut manifest = Self::new();

        for (rel, entry) in &new {
            if *entry == Entry::Dir && old.get(rel) != Some(&Entry::Dir) {
                manifest.push(ManifestOp::CreateDir { path: rel.clone() });
            }
        }

        for (rel, entry) in &new {
            if *entry != Entry::File {
                continue;
            }
            let new_path = new_dir.join(rel);
            let data = fs::read(&new_path).map_err(|e| PatchError::ReadFailed {
                path: new_path.clone(),
                source: e,
            })?;
            let unchanged = match old.get(rel) {
                Some(Entry::File) => {
                    let old_path = old_dir.join(rel);
                    fs::read(&old_path).map_err(|e| PatchError::ReadFailed {
                        path: old_path.clone(),
                        source: e,
                    })? == data
                }
                _ => false,
            };
            if !unchanged {
                manifest.push(ManifestOp::Write {
                    path: rel.clone(),
                    data,
                });
            }
        }

        for (rel, entry) in old.iter().rev() {
            if new.get(rel) != Some(entry) {
                manifest.push(ManifestOp::Remove { path: rel.clone() });
            }
        }

        Ok(manifest)
    }

    /// Write the manifest as a gzip-compressed payload.
    pub fn write_to(&self, path: &Path) -> PatchResult<()> {
        let write_err = |e: io::Error| PatchError::WriteFailed {
            path: path.to_path_buf(),
            source: e,
        };
        let file = File::create(path).map_err(write_err)?;
        let mut encoder = GzEncoder::new(file, Compression::default());
        serde_json::to_writer(&mut encoder, self).map_err(|e| write_err(e.into()))?;
        encoder.finish().map_err(write_err)?;
        Ok(())
    }

    /// Read a gzip-compressed payload.
    pub fn read_from(path: &Path) -> PatchResult<Self> {
        let file = File::open(path).map_err(|e| PatchError::ReadFailed {
            path: path.to_path_buf(),
            source: e,
        })?;
        let manifest: Self = serde_json::from_reader(GzDecoder::new(BufReader::new(file)))
            .map_err(|e| PatchError::InvalidPayload {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        if manifest.version != FORMAT_VERSION {
            return Err(PatchError::InvalidPayload {
                path: path.to_path_buf(),
                reason: format!("unsupported manifest version {}", manifest.version),
            });
        }
        for op in &manifest.operations {
            validate_relative(op.path()).map_err(|reason| PatchError::InvalidPayload {
                path: path.to_path_buf(),
                reason,
            })?;
        }
        Ok(manifest)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Entry {
    Dir,
    File,
}

/// All entries below `root`, keyed by `/`-separated relative path.
fn snapshot(root: &Path) -> PatchResult<BTreeMap<String, Entry>> {
    if !root.is_dir() {
        return Err(PatchError::NotADirectory(root.to_path_buf()));
    }
    let mut entries = BTreeMap::new();
    walk(root, "", &mut entries)?;
    Ok(entries)
}

fn walk(dir: &Path, prefix: &str, out: &mut BTreeMap<String, Entry>) -> PatchResult<()> {
    let read_err = |e: io::Error| PatchError::ReadFailed {
        path: dir.to_path_buf(),
        source: e,
    };
    for entry in fs::read_dir(dir).map_err(read_err)? {
        let entry = entry.map_err(read_err)?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let rel = if prefix.is_empty() {
            name
        } else {
            format!("{}/{}", prefix, name)
        };
        let path = entry.path();
        if path.is_dir() {
            out.insert(rel.clone(), Entry::Dir);
            walk(&path, &rel, out)?;
        } else {
            out.insert(rel, Entry::File);
        }
    }
    Ok(())
}

fn validate_relative(rel: &str) -> Result<(), String> {
    let path = Path::new(rel);
    if rel.is_empty() {
        return Err("empty path".to_string());
    }
    if !path.components().all(|c| matches!(c, Component::Normal(_))) {
        return Err(format!("path escapes the installation: {}", rel));
    }
    Ok(())
}

/// Completed action, as recorded in the action log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum ActionRecord {
    CreatedDir { path: PathBuf },
    Created { path: PathBuf },
    Replaced { path: PathBuf, backup: PathBuf },
    Removed { path: PathBuf, backup: PathBuf },
    RemovedDir { path: PathBuf },
}

struct ActionLog {
    path: PathBuf,
    file: File,
}

impl ActionLog {
    fn open(path: &Path) -> PatchResult<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| PatchError::WriteFailed {
                path: path.to_path_buf(),
                source: e,
            })?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    fn record(&mut self, action: &ActionRecord) -> PatchResult<()> {
        let mut line = serde_json::to_string(action).map_err(|e| PatchError::InvalidActionLog {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;
        line.push('\n');
        self.file
            .write_all(line.as_bytes())
            .map_err(|e| PatchError::WriteFailed {
                path: self.path.clone(),
                source: e,
            })
    }

    fn read(path: &Path) -> PatchResult<Vec<ActionRecord>> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(PatchError::ReadFailed {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };

        let mut records = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|e| PatchError::ReadFailed {
                path: path.to_path_buf(),
                source: e,
            })?;
            if line.trim().is_empty() {
                continue;
            }
            let record = serde_json::from_str(&line).map_err(|e| PatchError::InvalidActionLog {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
            records.push(record);
        }
        Ok(records)
    }
}

/// Applies [`PatchManifest`] payloads.
///
/// Destinations that are in use are staged and reported back as
/// [`ReplacementOp`]s. Replacements deferred by earlier patches are
/// finished first when their destination has been released.
#[derive(Debug, Clone, Default)]
pub struct ManifestPatchApplier;

impl ManifestPatchApplier {
    /// Create an applier.
    pub fn new() -> Self {
        Self
    }

    /// Finish or re-emit replacements deferred by earlier patches.
    fn carry_over(
        &self,
        request: &ApplyRequest<'_>,
        pending: &mut PendingReplacementMap,
        log: &mut ActionLog,
    ) -> PatchResult<Vec<ReplacementOp>> {
        let carried: Vec<(PathBuf, PendingEntry)> = pending
            .iter()
            .map(|(dest, entry)| (dest.to_path_buf(), entry.clone()))
            .collect();

        let mut still_pending = Vec::new();
        for (n, (dest, entry)) in carried.into_iter().enumerate() {
            let backup = request
                .work_dir
                .join(CARRIED_DIR)
                .join(n.to_string());

            if is_in_use(&dest) {
                debug!(destination = %dest.display(), "Carried replacement still blocked");
                still_pending.push(match entry.kind {
                    ReplacementKind::Remove => {
                        ReplacementOp::new(entry.kind, dest, None, Some(entry.source))
                    }
                    kind => ReplacementOp::new(kind, dest, Some(entry.source), Some(backup)),
                });
                continue;
            }

            match entry.kind {
                ReplacementKind::Remove => {
                    if dest.exists() {
                        move_into(&dest, &entry.source)?;
                        log.record(&ActionRecord::Removed {
                            path: dest.clone(),
                            backup: entry.source.clone(),
                        })?;
                    }
                }
                _ if !entry.source.exists() => {
                    warn!(
                        destination = %dest.display(),
                        staged = %entry.source.display(),
                        "Staged content for carried replacement is gone, dropping it"
                    );
                }
                _ => {
                    if dest.exists() {
                        move_into(&dest, &backup)?;
                        log.record(&ActionRecord::Replaced {
                            path: dest.clone(),
                            backup,
                        })?;
                    } else {
                        log.record(&ActionRecord::Created { path: dest.clone() })?;
                    }
                    move_into(&entry.source, &dest)?;
                }
            }
            debug!(destination = %dest.display(), "Finished carried replacement");
            pending.resolve(&dest);
        }
        Ok(still_pending)
    }
}

impl PatchApplier for ManifestPatchApplier {
    fn apply(
        &self,
        request: &ApplyRequest<'_>,
        pending: &mut PendingReplacementMap,
        progress: &dyn Fn(f64, &str),
    ) -> PatchResult<Vec<ReplacementOp>> {
        let patch_id = request.patch.id.as_str();
        if request.key.is_some() {
            return Err(PatchError::UnsupportedEncryption(patch_id.to_string()));
        }

        let manifest = PatchManifest::read_from(request.payload)?;
        let mut log = ActionLog::open(&self.action_log(request.work_dir))?;
        let staged_root = request.work_dir.join(STAGED_DIR);
        let backup_root = request.work_dir.join(BACKUP_DIR);

        progress(0.0, &format!("Applying {}", patch_id));
        let mut unresolved = self.carry_over(request, pending, &mut log)?;

        let total = manifest.operations.len();
        for (i, op) in manifest.operations.iter().enumerate() {
            if request.cancel.is_cancelled() {
                return Err(PatchError::Cancelled(patch_id.to_string()));
            }

            let rel = op.path();
            let dest = request.install_dir.join(rel);
            let backup = backup_root.join(rel);

            match op {
                ManifestOp::CreateDir { .. } => {
                    if !dest.is_dir() {
                        fs::create_dir_all(&dest).map_err(|e| PatchError::WriteFailed {
                            path: dest.clone(),
                            source: e,
                        })?;
                        log.record(&ActionRecord::CreatedDir { path: dest.clone() })?;
                    }
                }
                ManifestOp::Write { data, .. } => {
                    let staged = staged_root.join(rel);
                    write_file(&staged, data)?;

                    if is_in_use(&dest) {
                        info!(destination = %dest.display(), "Destination in use, deferring");
                        unresolved.retain(|existing| existing.destination != dest);
                        unresolved.push(ReplacementOp::new(
                            ReplacementKind::Replace,
                            dest.clone(),
                            Some(staged),
                            Some(backup),
                        ));
                    } else {
                        if dest.exists() {
                            move_into(&dest, &backup)?;
                            log.record(&ActionRecord::Replaced {
                                path: dest.clone(),
                                backup,
                            })?;
                        } else {
                            log.record(&ActionRecord::Created { path: dest.clone() })?;
                        }
                        move_into(&staged, &dest)?;
                        pending.resolve(&dest);
                    }
                }
                ManifestOp::Remove { .. } => {
                    if is_in_use(&dest) {
                        info!(destination = %dest.display(), "Destination in use, deferring removal");
                        unresolved.retain(|existing| existing.destination != dest);
                        unresolved.push(ReplacementOp::new(
                            ReplacementKind::Remove,
                            dest.clone(),
                            None,
                            Some(backup),
                        ));
                    } else if dest.is_dir() {
                        fs::remove_dir(&dest).map_err(|e| PatchError::WriteFailed {
                            path: dest.clone(),
                            source: e,
                        })?;
                        log.record(&ActionRecord::RemovedDir { path: dest.clone() })?;
                    } else if dest.exists() {
                        move_into(&dest, &backup)?;
                        log.record(&ActionRecord::Removed {
                            path: dest.clone(),
                            backup,
                        })?;
                        pending.resolve(&dest);
                    }
                }
            }

            progress(((i + 1) * 100) as f64 / total as f64, rel);
        }

        if total == 0 {
            progress(100.0, patch_id);
        }
        Ok(unresolved)
    }

    fn clear_backup(&self, action_log: &Path) -> PatchResult<()> {
        let Some(work_dir) = action_log.parent() else {
            return Ok(());
        };
        for dir in [BACKUP_DIR, STAGED_DIR, CARRIED_DIR] {
            remove_dir_if_present(&work_dir.join(dir))?;
        }
        match fs::remove_file(action_log) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PatchError::WriteFailed {
                path: action_log.to_path_buf(),
                source: e,
            }),
        }
    }

    fn revert(&self, action_log: &Path) -> PatchResult<()> {
        let records = ActionLog::read(action_log)?;
        info!(log = %action_log.display(), actions = records.len(), "Reverting patch");

        for record in records.iter().rev() {
            match record {
                ActionRecord::CreatedDir { path } => {
                    if let Err(e) = fs::remove_dir(path) {
                        if e.kind() != io::ErrorKind::NotFound {
                            warn!(path = %path.display(), error = %e, "Could not remove directory");
                        }
                    }
                }
                ActionRecord::Created { path } => remove_file_if_present(path)?,
                ActionRecord::Replaced { path, backup } => {
                    remove_file_if_present(path)?;
                    move_into(backup, path)?;
                }
                ActionRecord::Removed { path, backup } => move_into(backup, path)?,
                ActionRecord::RemovedDir { path } => {
                    fs::create_dir_all(path).map_err(|e| PatchError::WriteFailed {
                        path: path.clone(),
                        source: e,
                    })?
                }
            }
        }

        match fs::remove_file(action_log) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PatchError::WriteFailed {
                path: action_log.to_path_buf(),
                source: e,
            }),
        }
    }
}

fn write_file(path: &Path, data: &[u8]) -> PatchResult<()> {
    let write_err = |e: io::Error| PatchError::WriteFailed {
        path: path.to_path_buf(),
        source: e,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(write_err)?;
    }
    fs::write(path, data).map_err(write_err)
}

fn move_into(from: &Path, to: &Path) -> PatchResult<()> {
    move_unless_in_use(from, to).map_err(|e| PatchError::WriteFailed {
        path: to.to_path_buf(),
        source: e,
    })
}

fn remove_file_if_present(path: &Path) -> PatchResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(PatchError::WriteFailed {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

fn remove_dir_if_present(path: &Path) -> PatchResult<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(PatchError::WriteFailed {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::PatchDescriptor;
    use crate::version::parse_version;
    use fs2::FileExt;
    use std::cell::RefCell;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    struct Fixture {
        _temp: TempDir,
        install: PathBuf,
        work: PathBuf,
        payload: PathBuf,
        patch: PatchDescriptor,
        cancel: CancellationToken,
    }

    impl Fixture {
        fn new(manifest: &PatchManifest) -> Self {
            let temp = TempDir::new().unwrap();
            let install = temp.path().join("install");
            let work = temp.path().join("work");
            fs::create_dir_all(&install).unwrap();
            fs::create_dir_all(&work).unwrap();
            let payload = temp.path().join("p1.patch");
            manifest.write_to(&payload).unwrap();
            let patch = PatchDescriptor::exact(
                "p1",
                parse_version("1.0").unwrap(),
                parse_version("2.0").unwrap(),
                "https://example.invalid/p1",
            );
            Self {
                _temp: temp,
                install,
                work,
                payload,
                patch,
                cancel: CancellationToken::new(),
            }
        }

        fn request(&self) -> ApplyRequest<'_> {
            ApplyRequest {
                patch: &self.patch,
                payload: &self.payload,
                install_dir: &self.install,
                work_dir: &self.work,
                key: None,
                cancel: &self.cancel,
            }
        }
    }

    fn sample_manifest() -> PatchManifest {
        let mut manifest = PatchManifest::new();
        manifest
            .push(ManifestOp::CreateDir {
                path: "lib".to_string(),
            })
            .push(ManifestOp::Write {
                path: "lib/core.so".to_string(),
                data: b"core v2".to_vec(),
            })
            .push(ManifestOp::Write {
                path: "app.bin".to_string(),
                data: b"app v2".to_vec(),
            })
            .push(ManifestOp::Remove {
                path: "old.txt".to_string(),
            });
        manifest
    }

    #[test]
    fn test_apply_writes_and_removes() {
        let fixture = Fixture::new(&sample_manifest());
        fs::write(fixture.install.join("app.bin"), b"app v1").unwrap();
        fs::write(fixture.install.join("old.txt"), b"bye").unwrap();

        let applier = ManifestPatchApplier::new();
        let mut pending = PendingReplacementMap::new();
        let ops = applier
            .apply(&fixture.request(), &mut pending, &|_, _| {})
            .unwrap();

        assert!(ops.is_empty());
        assert_eq!(fs::read(fixture.install.join("app.bin")).unwrap(), b"app v2");
        assert_eq!(fs::read(fixture.install.join("lib/core.so")).unwrap(), b"core v2");
        assert!(!fixture.install.join("old.txt").exists());
    }

    #[test]
    fn test_progress_reaches_100() {
        let fixture = Fixture::new(&sample_manifest());
        let seen = RefCell::new(Vec::new());

        ManifestPatchApplier::new()
            .apply(&fixture.request(), &mut PendingReplacementMap::new(), &|p, _| {
                seen.borrow_mut().push(p)
            })
            .unwrap();

        let seen = seen.into_inner();
        assert_eq!(seen.first(), Some(&0.0));
        assert_eq!(seen.last(), Some(&100.0));
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_revert_restores_previous_state() {
        let fixture = Fixture::new(&sample_manifest());
        fs::write(fixture.install.join("app.bin"), b"app v1").unwrap();
        fs::write(fixture.install.join("old.txt"), b"bye").unwrap();

        let applier = ManifestPatchApplier::new();
        applier
            .apply(&fixture.request(), &mut PendingReplacementMap::new(), &|_, _| {})
            .unwrap();
        applier.revert(&applier.action_log(&fixture.work)).unwrap();

        assert_eq!(fs::read(fixture.install.join("app.bin")).unwrap(), b"app v1");
        assert_eq!(fs::read(fixture.install.join("old.txt")).unwrap(), b"bye");
        assert!(!fixture.install.join("lib").exists());
    }

    #[test]
    fn test_clear_backup_removes_work_files() {
        let fixture = Fixture::new(&sample_manifest());
        fs::write(fixture.install.join("app.bin"), b"app v1").unwrap();

        let applier = ManifestPatchApplier::new();
        applier
            .apply(&fixture.request(), &mut PendingReplacementMap::new(), &|_, _| {})
            .unwrap();
        let log = applier.action_log(&fixture.work);
        assert!(log.exists());

        applier.clear_backup(&log).unwrap();

        assert!(!log.exists());
        assert!(!fixture.work.join(BACKUP_DIR).exists());
    }

    #[test]
    fn test_in_use_destination_is_deferred() {
        let fixture = Fixture::new(&sample_manifest());
        let app = fixture.install.join("app.bin");
        fs::write(&app, b"app v1").unwrap();
        let holder = File::open(&app).unwrap();
        FileExt::lock_exclusive(&holder).unwrap();

        let mut pending = PendingReplacementMap::new();
        let ops = ManifestPatchApplier::new()
            .apply(&fixture.request(), &mut pending, &|_, _| {})
            .unwrap();

        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].kind, ReplacementKind::Replace);
        assert_eq!(ops[0].destination, app);
        let staged = ops[0].staged.as_ref().unwrap();
        assert_eq!(fs::read(staged).unwrap(), b"app v2");
        assert_eq!(fs::read(&app).unwrap(), b"app v1");
    }

    #[test]
    fn test_carried_replacement_is_finished_once_released() {
        let fixture = Fixture::new(&PatchManifest::new());
        let app = fixture.install.join("app.bin");
        let staged = fixture.work.join("earlier/app.bin");
        fs::write(&app, b"app v1").unwrap();
        fs::create_dir_all(staged.parent().unwrap()).unwrap();
        fs::write(&staged, b"app v2").unwrap();

        let mut pending = PendingReplacementMap::new();
        pending.record(&app, &staged, ReplacementKind::Replace);

        let ops = ManifestPatchApplier::new()
            .apply(&fixture.request(), &mut pending, &|_, _| {})
            .unwrap();

        assert!(ops.is_empty());
        assert!(pending.is_empty());
        assert_eq!(fs::read(&app).unwrap(), b"app v2");
    }

    #[test]
    fn test_carried_replacement_still_blocked_is_reemitted() {
        let fixture = Fixture::new(&PatchManifest::new());
        let app = fixture.install.join("app.bin");
        let staged = fixture.work.join("earlier/app.bin");
        fs::write(&app, b"app v1").unwrap();
        fs::create_dir_all(staged.parent().unwrap()).unwrap();
        fs::write(&staged, b"app v2").unwrap();
        let holder = File::open(&app).unwrap();
        FileExt::lock_exclusive(&holder).unwrap();

        let mut pending = PendingReplacementMap::new();
        pending.record(&app, &staged, ReplacementKind::Replace);

        let ops = ManifestPatchApplier::new()
            .apply(&fixture.request(), &mut pending, &|_, _| {})
            .unwrap();

        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].staged.as_deref(), Some(staged.as_path()));
        assert_eq!(pending.len(), 1);
    }

    #[test]
    fn test_encrypted_payload_rejected() {
        let fixture = Fixture::new(&sample_manifest());
        let key = crate::patch::DecryptionKey {
            key: "k".to_string(),
            iv: "i".to_string(),
        };
        let mut request = fixture.request();
        request.key = Some(&key);

        let err = ManifestPatchApplier::new()
            .apply(&request, &mut PendingReplacementMap::new(), &|_, _| {})
            .unwrap_err();
        assert!(matches!(err, PatchError::UnsupportedEncryption(_)));
    }

    #[test]
    fn test_cancelled_before_first_operation() {
        let fixture = Fixture::new(&sample_manifest());
        fixture.cancel.cancel();

        let err = ManifestPatchApplier::new()
            .apply(&fixture.request(), &mut PendingReplacementMap::new(), &|_, _| {})
            .unwrap_err();
        assert!(matches!(err, PatchError::Cancelled(_)));
        assert!(!fixture.install.join("lib").exists());
    }

    #[test]
    fn test_payload_escaping_install_rejected() {
        let mut manifest = PatchManifest::new();
        manifest.push(ManifestOp::Write {
            path: "../outside".to_string(),
            data: Vec::new(),
        });
        let fixture = Fixture::new(&manifest);

        let err = PatchManifest::read_from(&fixture.payload).unwrap_err();
        assert!(matches!(err, PatchError::InvalidPayload { .. }));
    }

    #[test]
    fn test_diff_orders_operations() {
        let old = TempDir::new().unwrap();
        let new = TempDir::new().unwrap();
        fs::write(old.path().join("same.txt"), b"same").unwrap();
        fs::write(new.path().join("same.txt"), b"same").unwrap();
        fs::write(old.path().join("changed.txt"), b"v1").unwrap();
        fs::write(new.path().join("changed.txt"), b"v2").unwrap();
        fs::create_dir_all(old.path().join("gone")).unwrap();
        fs::write(old.path().join("gone/file"), b"x").unwrap();
        fs::create_dir_all(new.path().join("plugins")).unwrap();
        fs::write(new.path().join("plugins/a.so"), b"a").unwrap();

        let manifest = PatchManifest::diff(old.path(), new.path()).unwrap();
        let ops: Vec<_> = manifest
            .operations
            .iter()
            .map(|op| match op {
                ManifestOp::CreateDir { path } => format!("mkdir {}", path),
                ManifestOp::Write { path, .. } => format!("write {}", path),
                ManifestOp::Remove { path } => format!("rm {}", path),
            })
            .collect();

        assert_eq!(
            ops,
            vec![
                "mkdir plugins",
                "write changed.txt",
                "write plugins/a.so",
                "rm gone/file",
                "rm gone",
            ]
        );
    }
}
