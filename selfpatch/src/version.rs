//! Lenient version parsing on top of `semver`.
//!
//! Release catalogs often write versions with fewer than three components
//! (`2.0`, `3`). Those are padded with zeros before being handed to
//! `semver`, so `2.0` and `2.0.0` compare equal.

use semver::Version;

/// Parse a version string, padding missing minor/patch components.
///
/// A leading `v` is accepted.
pub fn parse_version(input: &str) -> Result<Version, semver::Error> {
    let trimmed = input.trim();
    let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);

    let split_at = trimmed.find(['-', '+']).unwrap_or(trimmed.len());
    let (core, suffix) = trimmed.split_at(split_at);

    let components = core.split('.').count();
    let mut normalized = core.to_string();
    for _ in components..3 {
        normalized.push_str(".0");
    }
    normalized.push_str(suffix);

    Version::parse(&normalized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_version() {
        assert_eq!(parse_version("1.4.4").unwrap(), Version::new(1, 4, 4));
    }

    #[test]
    fn test_short_versions_are_padded() {
        assert_eq!(parse_version("2.0").unwrap(), Version::new(2, 0, 0));
        assert_eq!(parse_version("3").unwrap(), Version::new(3, 0, 0));
        assert_eq!(parse_version("v3.0").unwrap(), Version::new(3, 0, 0));
    }

    #[test]
    fn test_prerelease_suffix_kept() {
        let version = parse_version("2.1-beta.1").unwrap();
        assert_eq!(version.to_string(), "2.1.0-beta.1");
    }

    #[test]
    fn test_ordering() {
        assert!(parse_version("2.0").unwrap() < parse_version("3.0.9").unwrap());
        assert!(parse_version("1.4.10").unwrap() > parse_version("1.4.4").unwrap());
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(parse_version("not-a-version").is_err());
        assert!(parse_version("").is_err());
    }
}
