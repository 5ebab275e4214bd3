use camino::Utf8Path;

use crate::asset::Asset;
use crate::core::CacheSet;
use crate::ledger::BuildRecords;

/// Whether the artifact at `candidate` can be reused instead of regenerated.
///
/// The artifact has to be part of the previous run's cache, and every input
/// of the group has to be recorded as unchanged for it. An empty input list
/// only needs the cache entry.
pub fn is_valid<R>(inputs: &[Asset], cached: &CacheSet, candidate: &Utf8Path, records: &R) -> bool
where
    R: BuildRecords + ?Sized,
{
    if !cached.contains(candidate) {
        return false;
    }

    inputs
        .iter()
        .all(|input| records.is_unchanged(input, candidate))
}
