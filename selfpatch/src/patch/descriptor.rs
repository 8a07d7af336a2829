//! Patch descriptors as published in an update catalog.

use std::path::{Component, Path};

use semver::Version;
use serde::{Deserialize, Serialize};

use super::error::PatchError;
use crate::version::parse_version;

/// The installed version a patch can be applied on top of.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceRequirement {
    /// Only this exact version.
    Exact(Version),
    /// This version or any later one.
    AtLeast(Version),
}

impl SourceRequirement {
    /// Whether an installation at `current` satisfies the requirement.
    pub fn matches(&self, current: &Version) -> bool {
        match self {
            Self::Exact(v) => current == v,
            Self::AtLeast(v) => current >= v,
        }
    }
}

impl std::fmt::Display for SourceRequirement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exact(v) => write!(f, "={}", v),
            Self::AtLeast(v) => write!(f, ">={}", v),
        }
    }
}

/// Symmetric key material for an encrypted payload.
///
/// The values are opaque to this crate and passed through to the applier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecryptionKey {
    pub key: String,
    pub iv: String,
}

/// One version-to-version patch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawPatchDescriptor", into = "RawPatchDescriptor")]
pub struct PatchDescriptor {
    /// Unique id, also used to name the payload file.
    pub id: String,
    /// Installed version the patch applies to.
    pub source: SourceRequirement,
    /// Version the installation has after the patch.
    pub target: Version,
    /// Download URL of the payload.
    pub url: String,
    /// Expected SHA-256 of the payload.
    pub checksum: Option<String>,
    /// Expected payload length in bytes.
    pub length: Option<u64>,
    /// Key for encrypted payloads.
    pub key: Option<DecryptionKey>,
}

impl PatchDescriptor {
    /// Create a descriptor for a patch from exactly `from` to `target`.
    pub fn exact(
        id: impl Into<String>,
        from: Version,
        target: Version,
        url: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            source: SourceRequirement::Exact(from),
            target,
            url: url.into(),
            checksum: None,
            length: None,
            key: None,
        }
    }

    /// Create a descriptor for a patch from `minimum` or later to `target`.
    pub fn subsequent(
        id: impl Into<String>,
        minimum: Version,
        target: Version,
        url: impl Into<String>,
    ) -> Self {
        Self {
            source: SourceRequirement::AtLeast(minimum),
            ..Self::exact(id, Version::new(0, 0, 0), target, url)
        }
    }

    /// Set the payload checksum and length.
    pub fn with_payload(mut self, checksum: impl Into<String>, length: u64) -> Self {
        self.checksum = Some(checksum.into());
        self.length = Some(length);
        self
    }

    /// Set the decryption key.
    pub fn with_key(mut self, key: DecryptionKey) -> Self {
        self.key = Some(key);
        self
    }

    /// Whether the patch applies to an installation at `current`.
    pub fn applies_to(&self, current: &Version) -> bool {
        self.source.matches(current)
    }

    /// File name of the downloaded payload.
    pub fn payload_file_name(&self) -> String {
        format!("{}.patch", self.id)
    }
}

/// Wire form of [`PatchDescriptor`].
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawPatchDescriptor {
    id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    from_subsequent: Option<String>,
    to: String,
    url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    checksum: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    length: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    key: Option<DecryptionKey>,
}

impl TryFrom<RawPatchDescriptor> for PatchDescriptor {
    type Error = PatchError;

    fn try_from(raw: RawPatchDescriptor) -> Result<Self, Self::Error> {
        let invalid = |reason: String| PatchError::InvalidDescriptor {
            id: raw.id.clone(),
            reason,
        };
        validate_id(&raw.id).map_err(&invalid)?;
        let parse = |s: &str| parse_version(s).map_err(|e| invalid(format!("{}: {}", s, e)));

        let source = match (&raw.from, &raw.from_subsequent) {
            (Some(v), None) => SourceRequirement::Exact(parse(v)?),
            (None, Some(v)) => SourceRequirement::AtLeast(parse(v)?),
            _ => {
                return Err(invalid(
                    "exactly one of `from` and `from_subsequent` must be set".to_string(),
                ))
            }
        };
        let target = parse(&raw.to)?;

        Ok(Self {
            id: raw.id,
            source,
            target,
            url: raw.url,
            checksum: raw.checksum,
            length: raw.length,
            key: raw.key,
        })
    }
}

/// Ids name the payload file and the per-patch work directory, so they
/// must be a single plain file name.
fn validate_id(id: &str) -> Result<(), String> {
    if id.is_empty() {
        return Err("empty id".to_string());
    }
    if id.contains(['/', '\\', '\0']) {
        return Err("id contains a path separator".to_string());
    }
    let mut components = Path::new(id).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err("id is not a plain file name".to_string()),
    }
}

impl From<PatchDescriptor> for RawPatchDescriptor {
    fn from(patch: PatchDescriptor) -> Self {
        let (from, from_subsequent) = match patch.source {
            SourceRequirement::Exact(v) => (Some(v.to_string()), None),
            SourceRequirement::AtLeast(v) => (None, Some(v.to_string())),
        };
        Self {
            id: patch.id,
            from,
            from_subsequent,
            to: patch.target.to_string(),
            url: patch.url,
            checksum: patch.checksum,
            length: patch.length,
            key: patch.key,
        }
    }
}
