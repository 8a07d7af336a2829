//! Integration tests for patch chains applied with the manifest applier.
//!
//! Fixture releases are built on disk, patches between them are computed
//! with `PatchManifest::diff`, and the chain is applied to a copy of the
//! oldest release.
//!
//! Run with: `cargo test --test patch_chain`

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use proptest::prelude::*;
use semver::Version;
use tempfile::TempDir;

use selfpatch::fsutil::copy_dir_recursive;
use selfpatch::handoff::{DeadlineChoice, FixedChoice, Handoff, HandoffOutcome, HandoffRequest};
use selfpatch::patch::{
    read_pending_file, write_pending_file, BatchObserver, BatchPatcher, InvalidPatch,
    ManifestOp, ManifestPatchApplier, PatchDescriptor, PatchManifest,
};
use selfpatch::version::parse_version;

// ============================================================================
// Helper Functions
// ============================================================================

fn v(s: &str) -> Version {
    parse_version(s).unwrap()
}

fn write_tree(root: &Path, files: &[(&str, &str)]) {
    fs::create_dir_all(root).unwrap();
    for (rel, content) in files {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }
}

/// Relative path → file content, `None` for directories.
fn tree(root: &Path) -> BTreeMap<String, Option<Vec<u8>>> {
    fn walk(dir: &Path, prefix: &str, out: &mut BTreeMap<String, Option<Vec<u8>>>) {
        for entry in fs::read_dir(dir).unwrap() {
            let entry = entry.unwrap();
            let name = entry.file_name().to_string_lossy().into_owned();
            let rel = if prefix.is_empty() {
                name
            } else {
                format!("{}/{}", prefix, name)
            };
            let path = entry.path();
            if path.is_dir() {
                out.insert(rel.clone(), None);
                walk(&path, &rel, out);
            } else {
                out.insert(rel, Some(fs::read(&path).unwrap()));
            }
        }
    }
    let mut out = BTreeMap::new();
    walk(root, "", &mut out);
    out
}

/// Three releases, their patches, and a 1.4.4 installation.
struct Releases {
    temp: TempDir,
    install: PathBuf,
    work: PathBuf,
    payloads: PathBuf,
    v309: PathBuf,
    patches: Vec<PatchDescriptor>,
}

fn releases() -> Releases {
    let temp = TempDir::new().unwrap();
    let v144 = temp.path().join("releases/1.4.4");
    let v20 = temp.path().join("releases/2.0");
    let v309 = temp.path().join("releases/3.0.9");

    write_tree(
        &v144,
        &[
            ("app.bin", "app 1.4.4"),
            ("lib/core.so", "core 1"),
            ("readme.txt", "readme"),
            ("old/legacy.dat", "legacy"),
        ],
    );
    write_tree(
        &v20,
        &[
            ("app.bin", "app 2.0"),
            ("lib/core.so", "core 1"),
            ("lib/extra.so", "extra"),
            ("readme.txt", "readme 2"),
        ],
    );
    write_tree(
        &v309,
        &[
            ("app.bin", "app 3.0.9"),
            ("lib/core.so", "core 3"),
            ("plugins/a.so", "plugin a"),
            ("readme.txt", "readme 2"),
        ],
    );

    let payloads = temp.path().join("payloads");
    fs::create_dir_all(&payloads).unwrap();
    let patches = vec![
        PatchDescriptor::exact("p1", v("1.4.4"), v("2.0"), "https://example.invalid/p1"),
        PatchDescriptor::subsequent("p2", v("2.0"), v("3.0.9"), "https://example.invalid/p2"),
    ];
    PatchManifest::diff(&v144, &v20)
        .unwrap()
        .write_to(&payloads.join(patches[0].payload_file_name()))
        .unwrap();
    PatchManifest::diff(&v20, &v309)
        .unwrap()
        .write_to(&payloads.join(patches[1].payload_file_name()))
        .unwrap();

    let install = temp.path().join("install");
    copy_dir_recursive(&v144, &install).unwrap();
    let work = temp.path().join("work");
    fs::create_dir_all(&work).unwrap();

    Releases {
        temp,
        install,
        work,
        payloads,
        v309,
        patches,
    }
}

#[derive(Default)]
struct Recorder {
    progress: RefCell<Vec<f64>>,
    invalid: RefCell<Vec<String>>,
    finished: RefCell<Vec<String>>,
}

impl BatchObserver for Recorder {
    fn progress(&self, percent: f64, _message: &str) {
        self.progress.borrow_mut().push(percent);
    }

    fn patch_invalid(&self, patch: &PatchDescriptor, _reason: &InvalidPatch) {
        self.invalid.borrow_mut().push(patch.id.clone());
    }

    fn patch_finished(&self, patch: &PatchDescriptor) {
        self.finished.borrow_mut().push(patch.id.clone());
    }
}

// ============================================================================
// Chain Tests
// ============================================================================

#[test]
fn test_chain_produces_target_release() {
    let r = releases();
    let patcher = BatchPatcher::new(ManifestPatchApplier::new(), &r.payloads);
    let recorder = Recorder::default();

    let outcome = patcher
        .apply_all(&recorder, &r.install, &r.work, v("1.4.4"), &r.patches)
        .unwrap();

    assert_eq!(tree(&r.install), tree(&r.v309));
    assert_eq!(*recorder.finished.borrow(), vec!["p1", "p2"]);
    assert!(outcome.pending.is_empty());
    assert!(outcome.final_ops.is_empty());
    assert!(outcome.fully_resolved);
    assert_eq!(outcome.version, Some(v("3.0.9")));
    assert!(!r.payloads.join("p1.patch").exists());
    assert!(!r.payloads.join("p2.patch").exists());
}

#[test]
fn test_version_mismatch_leaves_payload_and_version() {
    let r = releases();
    let patcher = BatchPatcher::new(ManifestPatchApplier::new(), &r.payloads);
    let recorder = Recorder::default();
    let unrelated = PatchDescriptor::exact("p9", v("9.9"), v("10.0"), "https://example.invalid/p9");
    fs::copy(r.payloads.join("p1.patch"), r.payloads.join("p9.patch")).unwrap();
    let before = tree(&r.install);

    let outcome = patcher
        .apply_all(&recorder, &r.install, &r.work, v("1.4.4"), &[unrelated])
        .unwrap();

    assert_eq!(*recorder.invalid.borrow(), vec!["p9"]);
    assert_eq!(outcome.version, Some(v("1.4.4")));
    assert!(r.payloads.join("p9.patch").exists());
    assert_eq!(tree(&r.install), before);
}

#[test]
fn test_mismatched_patch_does_not_block_chain() {
    let r = releases();
    let patcher = BatchPatcher::new(ManifestPatchApplier::new(), &r.payloads);
    let recorder = Recorder::default();
    let mut patches = r.patches.clone();
    patches.insert(
        1,
        PatchDescriptor::exact("p9", v("1.4.4"), v("9.0"), "https://example.invalid/p9"),
    );

    let outcome = patcher
        .apply_all(&recorder, &r.install, &r.work, v("1.4.4"), &patches)
        .unwrap();

    assert_eq!(*recorder.invalid.borrow(), vec!["p9"]);
    assert_eq!(outcome.version, Some(v("3.0.9")));
    assert_eq!(tree(&r.install), tree(&r.v309));
}

#[test]
fn test_locked_file_is_finished_by_handoff() {
    let r = releases();
    let app = r.install.join("app.bin");
    let holder = File::open(&app).unwrap();
    FileExt::lock_exclusive(&holder).unwrap();

    let patcher = BatchPatcher::new(ManifestPatchApplier::new(), &r.payloads);
    let recorder = Recorder::default();
    let outcome = patcher
        .apply_all(&recorder, &r.install, &r.work, v("1.4.4"), &r.patches)
        .unwrap();

    assert!(!outcome.fully_resolved);
    assert!(recorder.finished.borrow().is_empty());
    assert_eq!(outcome.version, Some(v("3.0.9")));
    assert_eq!(outcome.pending.len(), 1);
    assert!(outcome.pending.contains(&app));
    assert_eq!(outcome.final_ops.len(), 1);
    assert_eq!(fs::read(&app).unwrap(), b"app 1.4.4");

    let pending_file = r.work.join("pending.txt");
    write_pending_file(&pending_file, &outcome.handoff_ops()).unwrap();
    let triples = read_pending_file(&pending_file).unwrap();
    assert_eq!(triples.len(), 1);
    assert_eq!(triples[0].destination, app);

    drop(holder);
    let lock_dir = r.temp.path().join("locks");
    fs::create_dir_all(&lock_dir).unwrap();
    let handoff = Handoff::default()
        .run(
            &HandoffRequest::new(&lock_dir, &pending_file, Vec::new()),
            &FixedChoice(DeadlineChoice::Abort),
        )
        .unwrap();

    assert_eq!(handoff, HandoffOutcome::Completed { relaunched: false });
    assert_eq!(tree(&r.install), tree(&r.v309));
    assert!(!pending_file.exists());
}

// ============================================================================
// Progress Property
// ============================================================================

/// Chain of `sizes.len()` patches from `0.0` upwards, patch `i` writing
/// `sizes[i]` files.
fn synthetic_chain(payloads: &Path, sizes: &[usize]) -> Vec<PatchDescriptor> {
    sizes
        .iter()
        .enumerate()
        .map(|(i, &files)| {
            let mut manifest = PatchManifest::new();
            for f in 0..files {
                manifest.push(ManifestOp::Write {
                    path: format!("dir{}/file{}", i, f),
                    data: vec![i as u8; f + 1],
                });
            }
            let patch = PatchDescriptor::exact(
                format!("s{}", i),
                Version::new(i as u64, 0, 0),
                Version::new(i as u64 + 1, 0, 0),
                "https://example.invalid/s",
            );
            manifest
                .write_to(&payloads.join(patch.payload_file_name()))
                .unwrap();
            patch
        })
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_progress_is_monotonic_and_ends_at_100(
        sizes in prop::collection::vec(0usize..5, 1..7)
    ) {
        let temp = TempDir::new().unwrap();
        let install = temp.path().join("install");
        let work = temp.path().join("work");
        let payloads = temp.path().join("payloads");
        for d in [&install, &work, &payloads] {
            fs::create_dir_all(d).unwrap();
        }
        let patches = synthetic_chain(&payloads, &sizes);
        let patcher = BatchPatcher::new(ManifestPatchApplier::new(), &payloads);
        let recorder = Recorder::default();

        patcher
            .apply_all(&recorder, &install, &work, Version::new(0, 0, 0), &patches)
            .unwrap();

        let progress = recorder.progress.borrow();
        prop_assert!(!progress.is_empty());
        prop_assert!(progress.windows(2).all(|w| w[0] <= w[1]), "{:?}", progress);
        prop_assert!(progress.iter().all(|p| (0.0..=100.0).contains(p)));
        prop_assert_eq!(progress.last().copied(), Some(100.0));
    }
}
