//! Tracked assets and the read-only descriptors handed to strategies.

use std::fmt;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identity of an asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetId(Uuid);

impl AssetId {
    /// A fresh, random identity.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for AssetId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A single tracked file-system artifact.
///
/// Assets are never mutated in place by the node. A generated artifact is a
/// new `Asset` with a fresh identity, and re-creating an asset replaces the
/// old value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    /// Stable identity, assigned by the import stage or at generation.
    pub id: AssetId,
    /// File name including the extension.
    pub file_name: String,
    /// Logical type of the asset, e.g. `texture` or `prefab`.
    pub asset_type: String,
    /// Path of the raw source this asset was loaded from, if any.
    pub source_path: Option<Utf8PathBuf>,
    /// Resolved path of the imported asset. `None` means the asset has not
    /// been materialized yet and cannot take part in a build.
    pub import_from: Option<Utf8PathBuf>,
    /// The asset was created by the current run.
    pub is_new: bool,
    /// The asset was served from the cache of a previous run.
    pub is_cached: bool,
}

impl Asset {
    /// A raw source picked up by a loader, not yet imported.
    pub fn unresolved(source_path: impl Into<Utf8PathBuf>) -> Self {
        let source_path = source_path.into();

        Self {
            id: AssetId::new(),
            file_name: source_path.file_name().unwrap_or_default().to_string(),
            asset_type: type_from_extension(&source_path),
            source_path: Some(source_path),
            import_from: None,
            is_new: false,
            is_cached: false,
        }
    }

    /// An asset produced by the import stage.
    pub fn imported(
        id: AssetId,
        source_path: impl Into<Utf8PathBuf>,
        import_from: impl Into<Utf8PathBuf>,
        asset_type: impl Into<String>,
    ) -> Self {
        let import_from = import_from.into();

        Self {
            id,
            file_name: import_from.file_name().unwrap_or_default().to_string(),
            asset_type: asset_type.into(),
            source_path: Some(source_path.into()),
            import_from: Some(import_from),
            is_new: false,
            is_cached: false,
        }
    }

    /// An artifact emitted by this node.
    pub fn generated(path: impl Into<Utf8PathBuf>, is_new: bool, is_cached: bool) -> Self {
        Self::generated_with_id(AssetId::new(), path, is_new, is_cached)
    }

    /// An artifact emitted by this node whose identity is already known, for
    /// example from its metadata sidecar.
    pub fn generated_with_id(
        id: AssetId,
        path: impl Into<Utf8PathBuf>,
        is_new: bool,
        is_cached: bool,
    ) -> Self {
        let path = path.into();

        Self {
            id,
            file_name: path.file_name().unwrap_or_default().to_string(),
            asset_type: type_from_extension(&path),
            source_path: None,
            import_from: Some(path),
            is_new,
            is_cached,
        }
    }

    /// Whether the asset has a non-empty resolved path.
    pub fn is_resolved(&self) -> bool {
        self.import_from
            .as_ref()
            .is_some_and(|path| !path.as_str().is_empty())
    }

    /// The path used to identify this asset in diagnostics.
    pub fn display_path(&self) -> &str {
        match (&self.source_path, &self.import_from) {
            (Some(source), _) if !source.as_str().is_empty() => source.as_str(),
            (_, Some(import)) if !import.as_str().is_empty() => import.as_str(),
            _ => &self.file_name,
        }
    }

    /// Snapshot of the asset for a strategy, `None` when unresolved.
    pub fn info(&self) -> Option<AssetInfo> {
        if !self.is_resolved() {
            return None;
        }

        Some(AssetInfo {
            id: self.id,
            name: self.file_name.clone(),
            asset_type: self.asset_type.clone(),
            path: self.import_from.clone()?,
        })
    }
}

fn type_from_extension(path: &Utf8Path) -> String {
    path.extension().unwrap_or_default().to_ascii_lowercase()
}

/// Read-only build intent for a single input asset.
///
/// Strategies receive these instead of [`Asset`] so that they cannot touch
/// the node's bookkeeping flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetInfo {
    id: AssetId,
    name: String,
    asset_type: String,
    path: Utf8PathBuf,
}

impl AssetInfo {
    pub fn id(&self) -> AssetId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn asset_type(&self) -> &str {
        &self.asset_type
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }
}
