//! Payload authoring command.

use std::path::Path;

use selfpatch::patch::{ManifestOp, PatchManifest};

use crate::error::CliError;

/// Diff two release trees into a payload at `output`.
pub fn run(old: &Path, new: &Path, output: &Path) -> Result<(), CliError> {
    for dir in [old, new] {
        if !dir.is_dir() {
            return Err(CliError::Config(format!(
                "{} is not a directory",
                dir.display()
            )));
        }
    }

    let manifest = PatchManifest::diff(old, new)?;
    manifest.write_to(output)?;

    let (mut dirs, mut writes, mut removes) = (0, 0, 0);
    for op in &manifest.operations {
        match op {
            ManifestOp::CreateDir { .. } => dirs += 1,
            ManifestOp::Write { .. } => writes += 1,
            ManifestOp::Remove { .. } => removes += 1,
        }
    }
    println!("Wrote {}", output.display());
    println!("  Directories: {}", dirs);
    println!("  Writes:      {}", writes);
    println!("  Removals:    {}", removes);
    Ok(())
}
