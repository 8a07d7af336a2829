//! Cross-process locking through advisory locks on marker files.
//!
//! - [`FileLock`] is the primitive: one marker file, exclusive or shared,
//!   acquired with a timeout and retry delay.
//! - [`LockCoordinator`] layers the INSTANCE / DOWNLOADER / UPDATER protocol
//!   on a shared lock directory.
//!
//! Contention is reported as `Ok(None)`; only precondition violations are
//! errors.

mod coordinator;
mod error;
mod file_lock;

pub use coordinator::{
    KindLock, LockCoordinator, LockKind, GLOBAL_LOCK_FILE, INSTANCE_LOCK_PREFIX,
    UPDATER_LOCK_FILE,
};
pub use error::{LockError, LockResult};
pub use file_lock::{FileLock, LockMode};
