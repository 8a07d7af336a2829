//! SHA-256 checksums of downloaded files.

use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;

use sha2::{Digest, Sha256};

use super::error::{DownloadError, DownloadResult};

/// Read buffer for hashing files (64KB).
const BUFFER_SIZE: usize = 64 * 1024;

/// SHA-256 of a whole file as lowercase hex.
pub fn calculate_file_checksum(path: &Path) -> DownloadResult<String> {
    let read_failed = |e| DownloadError::ReadFailed {
        path: path.to_path_buf(),
        source: e,
    };
    let file = File::open(path).map_err(read_failed)?;
    let mut reader = BufReader::with_capacity(BUFFER_SIZE, file);
    let mut hasher = Sha256::new();
    io::copy(&mut reader, &mut hasher).map_err(read_failed)?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// Calculate the SHA-256 checksum of an in-memory buffer.
pub fn calculate_checksum(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// Compare two hex digests, ignoring case.
pub fn checksums_match(expected: &str, actual: &str) -> bool {
    expected.trim().eq_ignore_ascii_case(actual.trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    const HELLO_WORLD: &str = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

    #[test]
    fn test_calculate_file_checksum() {
        let temp = TempDir::new().unwrap();
        let file_path = temp.path().join("test.txt");

        let mut file = File::create(&file_path).unwrap();
        file.write_all(b"hello world").unwrap();

        assert_eq!(calculate_file_checksum(&file_path).unwrap(), HELLO_WORLD);
    }

    #[test]
    fn test_calculate_empty_file() {
        let temp = TempDir::new().unwrap();
        let file_path = temp.path().join("empty.txt");
        File::create(&file_path).unwrap();

        assert_eq!(
            calculate_file_checksum(&file_path).unwrap(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_calculate_nonexistent_file() {
        let result = calculate_file_checksum(Path::new("/nonexistent/file.txt"));
        assert!(matches!(result, Err(DownloadError::ReadFailed { .. })));
    }

    #[test]
    fn test_buffer_checksum_matches_file_checksum() {
        let temp = TempDir::new().unwrap();
        let file_path = temp.path().join("large.bin");
        let data = vec![0xABu8; 100_000];
        std::fs::write(&file_path, &data).unwrap();

        assert_eq!(
            calculate_file_checksum(&file_path).unwrap(),
            calculate_checksum(&data)
        );
    }

    #[test]
    fn test_checksums_match_ignores_case() {
        assert!(checksums_match(&HELLO_WORLD.to_uppercase(), HELLO_WORLD));
        assert!(!checksums_match("abc", HELLO_WORLD));
    }
}
