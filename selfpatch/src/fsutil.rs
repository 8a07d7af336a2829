//! Filesystem helpers shared by the patch applier and the handoff process.
//!
//! A file counts as *in use* when some other open file description holds an
//! advisory lock on it. Applications that want their files to be replaced
//! through the handoff protocol keep such a lock while running.

use std::fs::{self, File};
use std::io;
use std::path::Path;

use fs2::FileExt;

/// Whether `path` is a regular file currently locked by someone else.
///
/// Missing files and directories are never in use.
pub fn is_in_use(path: &Path) -> bool {
    if !path.is_file() {
        return false;
    }
    match File::open(path) {
        Ok(file) => match FileExt::try_lock_exclusive(&file) {
            Ok(()) => {
                let _ = FileExt::unlock(&file);
                false
            }
            Err(_) => true,
        },
        Err(_) => true,
    }
}

/// Move `from` to `to` unless `from` is in use.
///
/// Falls back to copy-and-remove when a plain rename fails, which covers
/// moves across filesystems.
///
/// # Errors
///
/// Returns [`io::ErrorKind::WouldBlock`] while `from` is in use.
pub fn move_unless_in_use(from: &Path, to: &Path) -> io::Result<()> {
    if is_in_use(from) {
        return Err(io::Error::new(
            io::ErrorKind::WouldBlock,
            format!("{} is in use", from.display()),
        ));
    }

    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)?;
    }

    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(rename_err) => {
            if !from.is_file() {
                return Err(rename_err);
            }
            fs::copy(from, to)?;
            fs::remove_file(from)
        }
    }
}

/// Recursively copy a directory.
pub fn copy_dir_recursive(source: &Path, dest: &Path) -> io::Result<()> {
    fs::create_dir_all(dest)?;

    for entry in fs::read_dir(source)? {
        let entry = entry?;
        let source_path = entry.path();
        let dest_path = dest.join(entry.file_name());

        if source_path.is_dir() {
            copy_dir_recursive(&source_path, &dest_path)?;
        } else {
            fs::copy(&source_path, &dest_path)?;
        }
    }

    Ok(())
}
