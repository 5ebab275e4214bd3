use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;

use crate::core::NodeData;

/// A fatal error scoped to one node.
///
/// Every failure of [`Prefabricator`](crate::Prefabricator) surfaces as this
/// type, so that the hosting pipeline can attribute it to the node that
/// raised it. Nothing is committed to the cache when it is returned.
#[derive(Debug, Error)]
#[error("{node_name} ({node_id}): {kind}")]
pub struct NodeError {
    pub node_id: String,
    pub node_name: String,
    pub kind: ErrorKind,
}

impl NodeError {
    pub fn new(node: &NodeData, kind: impl Into<ErrorKind>) -> Self {
        Self {
            node_id: node.id.clone(),
            node_name: node.name.clone(),
            kind: kind.into(),
        }
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }
}

#[derive(Debug, Error)]
pub enum ErrorKind {
    /// At least one input asset has no resolved path.
    #[error(
        "{} are not imported yet. These assets need to be imported before prefabricated.",
        .paths.join(", ")
    )]
    UnresolvedInput { paths: Vec<String> },

    /// The strategy declined to plan a group.
    #[error("Group '{group}' was rejected:\n{reason}")]
    PlanRejected { group: String, reason: String },

    /// The strategy raised while regenerating a group.
    #[error("Group '{group}' failed to build:\n{cause}")]
    BuildFailed { group: String, cause: anyhow::Error },

    /// The strategy does not provide the requested operation.
    #[error("Strategy did not implement `{operation}`")]
    NotImplemented { operation: &'static str },

    #[error("Error while maintaining the cache directory:\n{0}")]
    Cache(#[from] CacheError),

    #[error("Error while updating the build ledger:\n{0}")]
    Ledger(#[from] LedgerError),
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("{path}: {source}")]
    Io { path: Utf8PathBuf, source: io::Error },

    #[error("Couldn't compile glob pattern.\n{0}")]
    GlobPattern(#[from] glob::PatternError),

    #[error("Couldn't run glob.\n{0}")]
    Glob(#[from] glob::GlobError),

    #[error("Couldn't convert path to UTF-8.\n{0}")]
    PathFormat(#[from] camino::FromPathBufError),

    #[error("Malformed metadata sidecar {path}: {source}")]
    Sidecar {
        path: Utf8PathBuf,
        source: serde_json::Error,
    },
}

impl CacheError {
    /// Wraps an I/O error together with the path it happened on.
    pub(crate) fn io(path: &Utf8Path) -> impl FnOnce(io::Error) -> Self {
        move |source| CacheError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Couldn't access the ledger file.\n{0}")]
    FileSystem(#[from] io::Error),

    #[error("Couldn't decode the ledger.\n{0}")]
    Decode(#[from] ciborium::de::Error<io::Error>),

    #[error("Couldn't encode the ledger.\n{0}")]
    Encode(#[from] ciborium::ser::Error<io::Error>),
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Couldn't read settings file.\n{0}")]
    FileSystem(#[from] io::Error),

    #[error("Couldn't parse settings.\n{0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScriptNameError {
    #[error("Strategy name is empty")]
    Empty,

    #[error("No strategy registered under '{0}'")]
    Unknown(String),
}
