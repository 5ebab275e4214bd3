//! Build records, used to tell whether a cached artifact is still fresh.
//!
//! The node itself only asks one question: "was this input part of the
//! artifact at that path, and is it unchanged since?". [`BuildRecords`] is
//! the seam for answering it, [`BuildLedger`] is the default answer backed
//! by BLAKE3 fingerprints persisted as CBOR.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, ErrorKind, Write};

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::asset::{Asset, AssetId};
use crate::core::Hash32;
use crate::error::LedgerError;

/// Bookkeeping of which inputs went into which generated artifact.
pub trait BuildRecords {
    /// There is a record for `output` which includes `input`, and `input` has
    /// not changed since the record was made.
    ///
    /// Must not mutate anything, it may be called any number of times.
    fn is_unchanged(&self, input: &Asset, output: &Utf8Path) -> bool;

    /// Records that `output` was just generated from `inputs`.
    fn record(&mut self, output: &Utf8Path, inputs: &[Asset]) -> Result<(), LedgerError>;

    /// Drops the record of an output that no longer exists.
    fn forget(&mut self, output: &Utf8Path);
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct InputRecord {
    id: AssetId,
    fingerprint: Hash32,
}

/// Build records keyed by output path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildLedger {
    records: BTreeMap<Utf8PathBuf, Vec<InputRecord>>,
}

impl BuildLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a ledger from disk.
    ///
    /// A missing or undecodable file yields an empty ledger, which makes the
    /// next run regenerate everything.
    pub fn open(path: impl AsRef<Utf8Path>) -> Result<Self, LedgerError> {
        let path = path.as_ref();
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::new()),
            Err(e) => return Err(e.into()),
        };

        match ciborium::from_reader(BufReader::new(file)) {
            Ok(ledger) => Ok(ledger),
            Err(ciborium::de::Error::Io(e)) if e.kind() != ErrorKind::UnexpectedEof => Err(e.into()),
            Err(e) => {
                tracing::warn!(%path, "discarding unreadable build ledger: {e}");
                Ok(Self::new())
            }
        }
    }

    pub fn save(&self, path: impl AsRef<Utf8Path>) -> Result<(), LedgerError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let mut writer = BufWriter::new(File::create(path)?);
        ciborium::into_writer(self, &mut writer)?;
        writer.flush()?;
        Ok(())
    }

    pub fn contains(&self, output: &Utf8Path) -> bool {
        self.records.contains_key(output)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn fingerprint(asset: &Asset) -> Option<Hash32> {
    let path = asset.import_from.as_ref()?;
    Hash32::hash_file(path).ok()
}

impl BuildRecords for BuildLedger {
    fn is_unchanged(&self, input: &Asset, output: &Utf8Path) -> bool {
        let Some(records) = self.records.get(output) else {
            return false;
        };

        let Some(record) = records.iter().find(|record| record.id == input.id) else {
            return false;
        };

        fingerprint(input).is_some_and(|current| current == record.fingerprint)
    }

    fn record(&mut self, output: &Utf8Path, inputs: &[Asset]) -> Result<(), LedgerError> {
        let records = inputs
            .iter()
            .map(|input| {
                let path = input.import_from.as_ref().ok_or_else(|| {
                    std::io::Error::other(format!("{} is unresolved", input.display_path()))
                })?;

                Ok(InputRecord {
                    id: input.id,
                    fingerprint: Hash32::hash_file(path)?,
                })
            })
            .collect::<Result<Vec<_>, std::io::Error>>()?;

        self.records.insert(output.to_path_buf(), records);
        Ok(())
    }

    fn forget(&mut self, output: &Utf8Path) {
        self.records.remove(output);
    }
}
