//! Installed version command.

use std::path::Path;

use selfpatch::update::{read_installed_version, version_file, write_installed_version};
use selfpatch::version::parse_version;

use crate::error::CliError;

/// Print the installed version, or record `set`.
pub fn run(install_dir: &Path, set: Option<&str>) -> Result<(), CliError> {
    if let Some(input) = set {
        let version = parse_version(input)
            .map_err(|e| CliError::Config(format!("Invalid version '{}': {}", input, e)))?;
        write_installed_version(install_dir, &version)?;
        println!("Recorded version {}", version);
        return Ok(());
    }

    match read_installed_version(install_dir)? {
        Some(version) => println!("{}", version),
        None => println!("No version recorded at {}", version_file(install_dir).display()),
    }
    Ok(())
}
