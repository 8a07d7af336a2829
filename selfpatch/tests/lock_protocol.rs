//! Integration tests for the cross-process lock protocol.
//!
//! Locks are advisory locks on open file descriptions, so separate opens in
//! one process contend the same way separate processes do.
//!
//! Run with: `cargo test --test lock_protocol`

use std::thread;
use std::time::{Duration, Instant};

use tempfile::TempDir;

use selfpatch::lock::{LockCoordinator, LockKind, INSTANCE_LOCK_PREFIX, UPDATER_LOCK_FILE};

// ============================================================================
// Helper Functions
// ============================================================================

const TIMEOUT: Duration = Duration::from_millis(300);
const RETRY: Duration = Duration::from_millis(10);

fn coordinator(temp: &TempDir) -> LockCoordinator {
    LockCoordinator::new(temp.path()).unwrap()
}

// ============================================================================
// UPDATER vs INSTANCE
// ============================================================================

#[test]
fn test_updater_blocked_while_instance_held() {
    let temp = TempDir::new().unwrap();
    let locks = coordinator(&temp);

    let mut instance = locks.acquire(LockKind::Instance, TIMEOUT, RETRY).unwrap().unwrap();

    assert!(locks.acquire(LockKind::Updater, TIMEOUT, RETRY).unwrap().is_none());
    assert!(instance.path().exists(), "held marker must survive the attempt");

    instance.release();

    let updater = locks.acquire(LockKind::Updater, TIMEOUT, RETRY).unwrap();
    assert!(updater.is_some());
}

#[test]
fn test_updater_removes_stale_instance_markers() {
    let temp = TempDir::new().unwrap();
    let locks = coordinator(&temp);
    let stale = temp.path().join(format!("{}1700000000000_0", INSTANCE_LOCK_PREFIX));
    std::fs::write(&stale, b"").unwrap();

    let updater = locks.acquire(LockKind::Updater, TIMEOUT, RETRY).unwrap();

    assert!(updater.is_some());
    assert!(!stale.exists());
}

#[test]
fn test_instances_coexist() {
    let temp = TempDir::new().unwrap();
    let locks = coordinator(&temp);

    let a = locks.acquire(LockKind::Instance, TIMEOUT, RETRY).unwrap().unwrap();
    let b = locks.acquire(LockKind::Instance, TIMEOUT, RETRY).unwrap().unwrap();

    assert_ne!(a.path(), b.path());
    assert_eq!(locks.instance_markers().unwrap().len(), 2);
}

// ============================================================================
// Ordering
// ============================================================================

#[test]
fn test_held_updater_blocks_downloader_and_instance() {
    let temp = TempDir::new().unwrap();
    let locks = coordinator(&temp);

    let updater = locks.acquire(LockKind::Updater, TIMEOUT, RETRY).unwrap().unwrap();

    assert!(locks.acquire(LockKind::Downloader, TIMEOUT, RETRY).unwrap().is_none());
    assert!(locks.acquire(LockKind::Instance, TIMEOUT, RETRY).unwrap().is_none());

    drop(updater);
    assert!(locks.acquire(LockKind::Instance, TIMEOUT, RETRY).unwrap().is_some());
}

#[test]
fn test_downloader_blocks_updater() {
    let temp = TempDir::new().unwrap();
    let locks = coordinator(&temp);

    let _downloader = locks.acquire(LockKind::Downloader, TIMEOUT, RETRY).unwrap().unwrap();

    assert!(temp.path().join(UPDATER_LOCK_FILE).exists());
    assert!(locks.acquire(LockKind::Updater, TIMEOUT, RETRY).unwrap().is_none());
    assert!(locks.acquire(LockKind::Downloader, TIMEOUT, RETRY).unwrap().is_none());
}

#[test]
fn test_instance_waits_for_updater_release() {
    let temp = TempDir::new().unwrap();
    let locks = coordinator(&temp);
    let updater = locks.acquire(LockKind::Updater, TIMEOUT, RETRY).unwrap().unwrap();

    let waiter = {
        let locks = locks.clone();
        thread::spawn(move || {
            let started = Instant::now();
            let lock = locks
                .acquire(LockKind::Instance, Duration::from_secs(5), RETRY)
                .unwrap();
            (lock.is_some(), started.elapsed())
        })
    };

    thread::sleep(Duration::from_millis(200));
    drop(updater);

    let (acquired, waited) = waiter.join().unwrap();
    assert!(acquired);
    assert!(waited >= Duration::from_millis(150), "waited {:?}", waited);
}

#[test]
fn test_non_directory_rejected() {
    let temp = TempDir::new().unwrap();
    let file = temp.path().join("not_a_dir");
    std::fs::write(&file, b"").unwrap();

    assert!(LockCoordinator::new(&file).is_err());
}
