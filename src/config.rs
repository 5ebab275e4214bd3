use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;

use crate::error::SettingsError;

const DEFAULT_CACHE_ROOT: &str = ".cache/prefabricator";
const DEFAULT_LEDGER: &str = ".cache/prefabricator.ledger";
const DEFAULT_SIDECAR_EXT: &str = "meta";

/// Settings shared by every node instance.
///
/// All fields are optional when loading from a file, missing ones fall back
/// to the defaults.
///
/// ```json
/// { "cache_root": "build/cache", "sidecar_ext": "meta" }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Root directory under which every node gets its own output directory.
    pub cache_root: Utf8PathBuf,
    /// File the build ledger is persisted to.
    pub ledger: Utf8PathBuf,
    /// Extension of metadata sidecar files, without the leading dot.
    pub sidecar_ext: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cache_root: DEFAULT_CACHE_ROOT.into(),
            ledger: DEFAULT_LEDGER.into(),
            sidecar_ext: DEFAULT_SIDECAR_EXT.into(),
        }
    }
}

impl Settings {
    pub fn from_json(data: &str) -> Result<Self, SettingsError> {
        Ok(serde_json::from_str(data)?)
    }

    pub fn from_json_file(path: impl AsRef<Utf8Path>) -> Result<Self, SettingsError> {
        let data = fs::read_to_string(path.as_ref())?;
        Self::from_json(&data)
    }

    pub fn with_cache_root(mut self, cache_root: impl Into<Utf8PathBuf>) -> Self {
        self.cache_root = cache_root.into();
        self
    }
}
