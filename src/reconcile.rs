//! Pruning of cache entries that the current run did not touch.
//!
//! Reconciliation is destructive, it must only run after every group of
//! the run succeeded. A run that fails part way leaves the cache directory
//! as a superset of what it should contain, which the next successful run
//! cleans up.

use camino::{Utf8Path, Utf8PathBuf};

use crate::asset::AssetId;
use crate::core::CacheSet;
use crate::error::CacheError;
use crate::io::{Sidecar, delete_file_then_dir_if_empty, is_sidecar, is_within};

/// Removes the distribution tag of an artifact before it gets deleted, so
/// that nothing keeps treating it as part of a bundle.
pub trait BundleTags: Send + Sync {
    fn clear(&self, path: &Utf8Path) -> Result<(), CacheError>;
}

/// Bundle tags stored in the metadata sidecar of each artifact.
#[derive(Debug, Clone)]
pub struct SidecarTags {
    ext: String,
}

impl SidecarTags {
    pub fn new(ext: impl Into<String>) -> Self {
        Self { ext: ext.into() }
    }

    /// Assigns `path` to `bundle`. A missing sidecar is created.
    pub fn tag(&self, path: &Utf8Path, bundle: impl Into<String>) -> Result<(), CacheError> {
        let mut sidecar = Sidecar::read(path, &self.ext)?
            .unwrap_or_else(|| Sidecar::new(AssetId::new()));
        sidecar.bundle = Some(bundle.into());
        sidecar.write(path, &self.ext)
    }

    /// The bundle `path` is assigned to, if any.
    pub fn bundle(&self, path: &Utf8Path) -> Result<Option<String>, CacheError> {
        Ok(Sidecar::read(path, &self.ext)?.and_then(|sidecar| sidecar.bundle))
    }
}

impl BundleTags for SidecarTags {
    fn clear(&self, path: &Utf8Path) -> Result<(), CacheError> {
        match Sidecar::read(path, &self.ext) {
            Ok(Some(mut sidecar)) if sidecar.bundle.is_some() => {
                sidecar.bundle = None;
                sidecar.write(path, &self.ext)
            }
            Ok(_) => Ok(()),
            // nothing readable, so nothing is tagged
            Err(e @ CacheError::Sidecar { .. }) => {
                tracing::warn!(%path, "{e}");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

/// Entries of the previous cache that were not touched by this run.
///
/// Sidecars never count on their own, they follow their primary file.
pub fn stale_entries(
    previous: &CacheSet,
    touched: &CacheSet,
    sidecar_ext: &str,
) -> Vec<Utf8PathBuf> {
    previous
        .difference(touched)
        .filter(|path| !is_sidecar(path, sidecar_ext))
        .cloned()
        .collect()
}

/// Deletes every stale entry below `output_dir` and returns what was pruned.
///
/// For each entry the bundle tag is cleared first, then the file is deleted,
/// then its sidecar, and finally its directory if that became empty.
pub fn reconcile(
    output_dir: &Utf8Path,
    previous: &CacheSet,
    touched: &CacheSet,
    tags: &dyn BundleTags,
    sidecar_ext: &str,
) -> Result<Vec<Utf8PathBuf>, CacheError> {
    let mut pruned = Vec::new();

    for path in stale_entries(previous, touched, sidecar_ext) {
        if !is_within(output_dir, &path) {
            tracing::warn!(
                %path,
                dir = %output_dir,
                "not pruning a path outside of the cache directory"
            );
            continue;
        }

        if !path.is_file() {
            tracing::debug!(%path, "stale cache entry is already gone");
            continue;
        }

        tags.clear(&path)?;
        delete_file_then_dir_if_empty(&path, sidecar_ext, output_dir)?;

        tracing::info!(%path, "pruned unused cached prefab");
        pruned.push(path);
    }

    Ok(pruned)
}
