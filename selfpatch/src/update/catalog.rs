//! Patch catalogs: JSON documents listing the available patches.
//!
//! ```json
//! {
//!   "patches": [
//!     { "id": "p1", "from": "1.4.4", "to": "2.0", "url": "https://.../p1.patch",
//!       "checksum": "…", "length": 1024 },
//!     { "id": "p2", "from_subsequent": "2.0", "to": "3.0.9", "url": "https://.../p2.patch" }
//!   ]
//! }
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::error::{UpdateError, UpdateResult};
use crate::download::{ResumableDownloader, Transport};
use crate::patch::PatchDescriptor;

/// Ordered list of patches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    pub patches: Vec<PatchDescriptor>,
}

impl Catalog {
    /// Parse a catalog document.
    pub fn from_json(source_name: &str, data: &[u8]) -> UpdateResult<Self> {
        serde_json::from_slice(data).map_err(|e| UpdateError::InvalidCatalog {
            source_name: source_name.to_string(),
            reason: e.to_string(),
        })
    }

    /// Read a catalog from a local file.
    pub fn from_file(path: &Path) -> UpdateResult<Self> {
        let data = fs::read(path).map_err(|e| UpdateError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_json(&path.display().to_string(), &data)
    }

    /// Fetch a catalog over the downloader's transport.
    pub fn fetch<T: Transport>(downloader: &ResumableDownloader<T>, url: &str) -> UpdateResult<Self> {
        match downloader.fetch_bytes(url, None)? {
            Some(data) => Self::from_json(url, &data),
            None => Err(UpdateError::InvalidCatalog {
                source_name: url.to_string(),
                reason: "server returned no content".to_string(),
            }),
        }
    }

    /// Read from `location`, a URL or a file path.
    pub fn load<T: Transport>(
        downloader: &ResumableDownloader<T>,
        location: &str,
    ) -> UpdateResult<Self> {
        if location.starts_with("http://") || location.starts_with("https://") {
            Self::fetch(downloader, location)
        } else {
            Self::from_file(Path::new(location))
        }
    }
}
