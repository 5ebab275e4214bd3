use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::asset::Asset;

/// Input and output assets partitioned by group key.
///
/// Every group is built together and yields one coherent artifact set.
pub type Groups = BTreeMap<String, Vec<Asset>>;

/// A set of cached artifact paths, as handed over between runs.
pub type CacheSet = BTreeSet<Utf8PathBuf>;

/// A 32-byte BLAKE3 hash used as a content fingerprint.
///
/// Build records store the fingerprint of every input that went into a
/// generated artifact, and a later run compares it against the current file
/// to decide whether the artifact can be reused.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Hash32([u8; 32]);

impl<T> From<T> for Hash32
where
    T: Into<[u8; 32]>,
{
    fn from(value: T) -> Self {
        Hash32(value.into())
    }
}

impl Hash32 {
    pub fn hash(buffer: impl AsRef<[u8]>) -> Self {
        blake3::Hasher::new()
            .update(buffer.as_ref())
            .finalize()
            .into()
    }

    pub fn hash_file(path: impl AsRef<std::path::Path>) -> std::io::Result<Self> {
        Ok(blake3::Hasher::new().update_mmap(path)?.finalize().into())
    }

    pub fn to_hex(self) -> String {
        const HEX: &[u8; 16] = b"0123456789abcdef";
        let mut acc = String::with_capacity(64);

        for &byte in self.0.iter() {
            acc.push(HEX[(byte >> 4) as usize] as char);
            acc.push(HEX[(byte & 0xF) as usize] as char);
        }

        acc
    }
}

impl fmt::Debug for Hash32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash32({})", self.to_hex())
    }
}

/// The platform the artifacts are generated for.
///
/// The node never interprets the value, it only scopes the output directory
/// so that every platform keeps a separate cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Target(String);

impl Target {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of the node instance in the hosting pipeline.
///
/// Errors carry both fields so that the host can attribute a failure to this
/// specific node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeData {
    /// Stable identifier, used to name the node's cache directory.
    pub id: String,
    /// Human readable name, used in log lines and error messages.
    pub name: String,
}

impl NodeData {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// The outgoing edge the output is handed to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionData {
    pub id: String,
    pub label: String,
}

impl ConnectionData {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
        }
    }
}
