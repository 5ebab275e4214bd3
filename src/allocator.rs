//! Capability objects handed to a strategy to claim output paths.
//!
//! A strategy never builds output paths itself. It asks an allocator, which
//! turns a desired artifact name into a path inside the node's output
//! directory and records what happened to it. After the strategy returns,
//! the orchestrator reads the outcome from [`Allocation`], including how many
//! times the allocator was invoked at all.

use std::fs;

use camino::{Utf8Path, Utf8PathBuf};

use crate::artifact::Artifact;
use crate::asset::{Asset, AssetId};
use crate::core::{CacheSet, NodeData};
use crate::error::{CacheError, ErrorKind, NodeError};
use crate::io::{Sidecar, resolve_output};
use crate::ledger::BuildRecords;
use crate::validity::is_valid;

/// What a strategy did with its allocator during one group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Allocation {
    /// Number of times the allocator was invoked.
    pub invocations: usize,
    /// Paths (re)generated during this call, in allocation order.
    pub generated: Vec<(Utf8PathBuf, AssetId)>,
    /// Paths served from the previous run's cache, in allocation order.
    pub reused: Vec<(Utf8PathBuf, AssetId)>,
}

impl Allocation {
    /// Every path claimed by this allocation.
    pub fn touched(&self) -> impl Iterator<Item = &Utf8Path> {
        self.generated
            .iter()
            .chain(self.reused.iter())
            .map(|(path, _)| path.as_path())
    }

    /// Output assets, generated ones first.
    pub fn assets(&self) -> Vec<Asset> {
        let generated = self
            .generated
            .iter()
            .map(|(path, id)| Asset::generated_with_id(*id, path, true, false));

        let reused = self
            .reused
            .iter()
            .map(|(path, id)| Asset::generated_with_id(*id, path, false, true));

        generated.chain(reused).collect()
    }
}

/// Deferred allocator used while validating.
///
/// It only declares intended outputs, nothing is created on disk.
pub struct PlanAllocator<'a> {
    node: &'a NodeData,
    group: &'a str,
    output_dir: &'a Utf8Path,
    allocation: Allocation,
}

impl<'a> PlanAllocator<'a> {
    pub(crate) fn new(node: &'a NodeData, group: &'a str, output_dir: &'a Utf8Path) -> Self {
        Self {
            node,
            group,
            output_dir,
            allocation: Allocation::default(),
        }
    }

    /// Declares an artifact called `name` and returns its future path.
    pub fn allocate(&mut self, name: &str) -> Result<Utf8PathBuf, NodeError> {
        self.allocation.invocations += 1;

        let path = resolve_output(self.output_dir, name).ok_or_else(|| {
            NodeError::new(
                self.node,
                ErrorKind::PlanRejected {
                    group: self.group.to_string(),
                    reason: format!("'{name}' is not a valid artifact name"),
                },
            )
        })?;

        if !self.allocation.generated.iter().any(|(p, _)| *p == path) {
            self.allocation.generated.push((path.clone(), AssetId::new()));
        }

        Ok(path)
    }

    pub fn output_dir(&self) -> &Utf8Path {
        self.output_dir
    }

    pub(crate) fn finish(self) -> Allocation {
        self.allocation
    }
}

/// Cache-aware allocator used while executing.
///
/// Each invocation either regenerates the artifact, or marks the copy cached
/// by the previous run as reused. Both outcomes count as touched, which keeps
/// the path alive during reconciliation.
pub struct BuildAllocator<'a, R: ?Sized> {
    node: &'a NodeData,
    group: &'a str,
    output_dir: &'a Utf8Path,
    inputs: &'a [Asset],
    cached: &'a CacheSet,
    records: &'a R,
    sidecar_ext: &'a str,
    allocation: Allocation,
}

impl<'a, R> BuildAllocator<'a, R>
where
    R: BuildRecords + ?Sized,
{
    pub(crate) fn new(
        node: &'a NodeData,
        group: &'a str,
        output_dir: &'a Utf8Path,
        inputs: &'a [Asset],
        cached: &'a CacheSet,
        records: &'a R,
        sidecar_ext: &'a str,
    ) -> Self {
        Self {
            node,
            group,
            output_dir,
            inputs,
            cached,
            records,
            sidecar_ext,
            allocation: Allocation::default(),
        }
    }

    /// Claims the artifact called `name`, writing `artifact` to it unless the
    /// previous run left a valid copy behind. `force` always regenerates.
    pub fn allocate<A>(
        &mut self,
        artifact: &A,
        name: &str,
        force: bool,
    ) -> Result<Utf8PathBuf, NodeError>
    where
        A: Artifact + ?Sized,
    {
        self.allocation.invocations += 1;

        let path = resolve_output(self.output_dir, name).ok_or_else(|| {
            self.failed(anyhow::anyhow!("'{name}' is not a valid artifact name"))
        })?;

        let generated = self.allocation.generated.iter().position(|(p, _)| *p == path);
        let reused = self.allocation.reused.iter().position(|(p, _)| *p == path);

        if !force && (generated.is_some() || reused.is_some()) {
            return Ok(path);
        }

        if force || !is_valid(self.inputs, self.cached, &path, self.records) {
            let id = self.generate(artifact, &path)?;

            if let Some(index) = reused {
                self.allocation.reused.remove(index);
            }

            match generated {
                Some(index) => self.allocation.generated[index].1 = id,
                None => self.allocation.generated.push((path.clone(), id)),
            }

            tracing::info!(
                node = %self.node.name,
                group = self.group,
                %path,
                "created new prefab"
            );
        } else {
            let id = match Sidecar::read(&path, self.sidecar_ext) {
                Ok(Some(sidecar)) => sidecar.id,
                Ok(None) => self.restore_sidecar(&path)?,
                Err(e @ CacheError::Sidecar { .. }) => {
                    tracing::warn!(%path, "{e}, assigning a fresh identity");
                    self.restore_sidecar(&path)?
                }
                Err(e) => return Err(self.failed(e.into())),
            };

            self.allocation.reused.push((path.clone(), id));

            tracing::debug!(
                node = %self.node.name,
                group = self.group,
                %path,
                "used cached prefab"
            );
        }

        Ok(path)
    }

    pub fn output_dir(&self) -> &Utf8Path {
        self.output_dir
    }

    pub(crate) fn finish(self) -> Allocation {
        self.allocation
    }

    fn generate<A>(&self, artifact: &A, path: &Utf8Path) -> Result<AssetId, NodeError>
    where
        A: Artifact + ?Sized,
    {
        let data = artifact.render().map_err(|e| self.failed(e))?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(CacheError::io(parent))
                .map_err(|e| self.failed(e.into()))?;
        }

        fs::write(path, data)
            .map_err(CacheError::io(path))
            .map_err(|e| self.failed(e.into()))?;

        let id = AssetId::new();
        Sidecar::new(id)
            .write(path, self.sidecar_ext)
            .map_err(|e| self.failed(e.into()))?;

        Ok(id)
    }

    /// Writes a new sidecar for a reused artifact whose own was lost.
    fn restore_sidecar(&self, path: &Utf8Path) -> Result<AssetId, NodeError> {
        let id = AssetId::new();
        Sidecar::new(id)
            .write(path, self.sidecar_ext)
            .map_err(|e| self.failed(e.into()))?;
        Ok(id)
    }

    fn failed(&self, cause: anyhow::Error) -> NodeError {
        NodeError::new(
            self.node,
            ErrorKind::BuildFailed {
                group: self.group.to_string(),
                cause,
            },
        )
    }
}
