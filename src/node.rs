//! The two-phase driver of a prefabricator node.
//!
//! [`Prefabricator::validate`] is a dry run which only asks the strategy what
//! it intends to produce. [`Prefabricator::execute`] builds every group,
//! then prunes the output directory down to what the run touched. Nothing is
//! pruned and no build record is committed unless every group succeeded.

use std::collections::BTreeMap;
use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};
use indicatif::ProgressStyle;
use tracing::Level;
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::allocator::{Allocation, BuildAllocator, PlanAllocator};
use crate::asset::{Asset, AssetInfo};
use crate::config::Settings;
use crate::core::{CacheSet, ConnectionData, Groups, NodeData, Target};
use crate::error::{ErrorKind, NodeError};
use crate::io::{CacheRoot, OutputDirs, as_overhead, list_files, normalize_path};
use crate::ledger::{BuildLedger, BuildRecords};
use crate::reconcile::{BundleTags, SidecarTags, reconcile};
use crate::strategy::{GroupContext, Strategy};

const PROGRESS_TEMPLATE: &str = "{spinner:.green} [{elapsed}] [{bar:40.cyan/blue}] {pos}/{len} {msg}";

/// Result of either phase, handed to the downstream consumer.
#[derive(Debug, Clone, Default)]
pub struct NodeOutput {
    /// Output assets of every group followed by its inputs.
    pub groups: Groups,
    /// Cached paths that were reused instead of regenerated.
    pub used_cache: CacheSet,
    pub report: RunReport,
}

/// What happened to the output directory during a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Paths written during this run, or planned during validation.
    pub generated: Vec<Utf8PathBuf>,
    pub reused: Vec<Utf8PathBuf>,
    pub pruned: Vec<Utf8PathBuf>,
    /// Files found in the output directory that no allocator handed out.
    pub untracked: Vec<Utf8PathBuf>,
    /// Non-fatal problems, also emitted as log warnings.
    pub warnings: Vec<String>,
}

impl RunReport {
    fn warn(&mut self, message: String) {
        tracing::warn!("{message}");
        self.warnings.push(message);
    }
}

/// A node which turns groups of input assets into generated prefabs.
pub struct Prefabricator<S: Strategy, R: BuildRecords = BuildLedger> {
    strategy: S,
    records: R,
    settings: Settings,
    output_dirs: Option<Box<dyn OutputDirs>>,
    bundle_tags: Option<Box<dyn BundleTags>>,
}

impl<S: Strategy, R: BuildRecords> Prefabricator<S, R> {
    pub fn new(strategy: S, records: R) -> Self {
        Self {
            strategy,
            records,
            settings: Settings::default(),
            output_dirs: None,
            bundle_tags: None,
        }
    }

    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    /// Replaces the default `<cache_root>/<node id>/<target>` layout.
    pub fn with_output_dirs(mut self, output_dirs: impl OutputDirs + 'static) -> Self {
        self.output_dirs = Some(Box::new(output_dirs));
        self
    }

    /// Replaces the default sidecar based bundle tags.
    pub fn with_bundle_tags(mut self, bundle_tags: impl BundleTags + 'static) -> Self {
        self.bundle_tags = Some(Box::new(bundle_tags));
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn records(&self) -> &R {
        &self.records
    }

    pub fn into_records(self) -> R {
        self.records
    }

    /// Dry run: plans every group and reports the outputs it would produce.
    ///
    /// Nothing is written to disk, `used_cache` is always empty.
    pub fn validate(
        &self,
        target: &Target,
        node: &NodeData,
        groups: &Groups,
    ) -> Result<NodeOutput, NodeError> {
        check_resolved(node, groups)?;

        let dir = normalize_path(&self.output_dirs_or_default(|dirs| dirs.locate(target, node)));
        let mut output = NodeOutput::default();

        for (key, assets) in groups {
            let inputs = infos(assets);
            let ctx = GroupContext {
                target,
                node,
                group: key,
                inputs: &inputs,
                output_dir: &dir,
            };

            let mut allocate = PlanAllocator::new(node, key, &dir);
            self.strategy.plan(&ctx, &mut allocate)?;
            let allocation = allocate.finish();

            if allocation.invocations == 0 {
                output.report.warn(not_allocated(node, key));
            }

            output
                .report
                .generated
                .extend(allocation.touched().map(Utf8Path::to_path_buf));
            output
                .groups
                .insert(key.clone(), group_output(&allocation, assets));
        }

        Ok(output)
    }

    /// Validates the node and hands the planned outputs downstream.
    pub fn setup<F>(
        &self,
        target: &Target,
        node: &NodeData,
        connection: &ConnectionData,
        groups: &Groups,
        output: F,
    ) -> Result<NodeOutput, NodeError>
    where
        F: FnOnce(&NodeData, &ConnectionData, &Groups, &CacheSet),
    {
        let result = self.validate(target, node, groups)?;
        output(node, connection, &result.groups, &result.used_cache);
        Ok(result)
    }

    /// Builds every group, then reconciles the output directory against
    /// `already_cached`, the paths cached by the previous run.
    pub fn execute(
        &mut self,
        target: &Target,
        node: &NodeData,
        groups: &Groups,
        already_cached: &CacheSet,
    ) -> Result<NodeOutput, NodeError> {
        let start = Instant::now();

        check_resolved(node, groups)?;

        let dir = self
            .output_dirs_or_default(|dirs| dirs.ensure(target, node))
            .map(|dir| normalize_path(&dir))
            .map_err(|e| NodeError::new(node, e))?;

        let root = tracing::span!(
            Level::INFO,
            "prefabricate",
            node = %node.name,
            target = %target
        );
        root.pb_set_length(groups.len() as u64);
        if let Ok(style) = ProgressStyle::with_template(PROGRESS_TEMPLATE) {
            root.pb_set_style(&style.progress_chars("=>-"));
        }
        root.pb_set_message(&format!("Prefabricating {}", node.name));
        let _enter = root.enter();

        let mut output = NodeOutput::default();
        let mut touched = CacheSet::new();
        let mut owners = BTreeMap::<Utf8PathBuf, &str>::new();
        let mut staged = Vec::new();

        for (key, assets) in groups {
            let span = tracing::span!(Level::INFO, "group", key = %key);
            let _enter = span.enter();

            let allocation = self.build_group(target, node, key, assets, &dir, already_cached)?;

            if allocation.invocations == 0 {
                output.report.warn(not_allocated(node, key));
            }

            for path in allocation.touched() {
                if let Some(other) = owners.insert(path.to_path_buf(), key)
                    && other != key.as_str()
                {
                    output.report.warn(format!(
                        "{path} was allocated by both group '{other}' and group '{key}'"
                    ));
                }
                touched.insert(path.to_path_buf());
            }

            for (path, _) in &allocation.generated {
                staged.push((path.clone(), assets));
                output.report.generated.push(path.clone());
            }

            for (path, _) in &allocation.reused {
                output.used_cache.insert(path.clone());
                output.report.reused.push(path.clone());
            }

            output
                .groups
                .insert(key.clone(), group_output(&allocation, assets));

            root.pb_inc(1);
        }

        let ext = &self.settings.sidecar_ext;

        for path in list_files(&dir, ext).map_err(|e| NodeError::new(node, e))? {
            if !touched.contains(&path) && !already_cached.contains(&path) {
                output
                    .report
                    .warn(format!("{path} was not created through the allocator"));
                output.report.untracked.push(path);
            }
        }

        let pruned = match &self.bundle_tags {
            Some(tags) => reconcile(&dir, already_cached, &touched, tags.as_ref(), ext),
            None => reconcile(&dir, already_cached, &touched, &SidecarTags::new(ext), ext),
        }
        .map_err(|e| NodeError::new(node, e))?;

        for (path, inputs) in staged {
            self.records
                .record(&path, inputs)
                .map_err(|e| NodeError::new(node, e))?;
        }

        for path in &pruned {
            self.records.forget(path);
        }

        tracing::info!(
            node = %node.name,
            generated = output.report.generated.len(),
            reused = output.report.reused.len(),
            pruned = pruned.len(),
            "prefabricated {} groups {}",
            groups.len(),
            as_overhead(start)
        );

        output.report.pruned = pruned;
        Ok(output)
    }

    /// Executes the node and hands the built outputs downstream.
    pub fn run<F>(
        &mut self,
        target: &Target,
        node: &NodeData,
        connection: &ConnectionData,
        groups: &Groups,
        already_cached: &CacheSet,
        output: F,
    ) -> Result<NodeOutput, NodeError>
    where
        F: FnOnce(&NodeData, &ConnectionData, &Groups, &CacheSet),
    {
        let result = self.execute(target, node, groups, already_cached)?;
        output(node, connection, &result.groups, &result.used_cache);
        Ok(result)
    }

    fn build_group(
        &self,
        target: &Target,
        node: &NodeData,
        key: &str,
        assets: &[Asset],
        dir: &Utf8Path,
        already_cached: &CacheSet,
    ) -> Result<Allocation, NodeError> {
        let inputs = infos(assets);
        let ctx = GroupContext {
            target,
            node,
            group: key,
            inputs: &inputs,
            output_dir: dir,
        };

        let records: &dyn BuildRecords = &self.records;
        let mut allocate: BuildAllocator<'_, dyn BuildRecords + '_> = BuildAllocator::new(
            node,
            key,
            dir,
            assets,
            already_cached,
            records,
            &self.settings.sidecar_ext,
        );

        if let Err(e) = self.strategy.build(&ctx, &mut allocate) {
            let error = match e.downcast::<NodeError>() {
                Ok(error) => error,
                Err(cause) => NodeError::new(
                    node,
                    ErrorKind::BuildFailed {
                        group: key.to_string(),
                        cause,
                    },
                ),
            };

            tracing::error!(group = key, "{error}");
            return Err(error);
        }

        Ok(allocate.finish())
    }

    fn output_dirs_or_default<T>(&self, f: impl FnOnce(&dyn OutputDirs) -> T) -> T {
        match &self.output_dirs {
            Some(dirs) => f(dirs.as_ref()),
            None => f(&CacheRoot::new(&self.settings.cache_root)),
        }
    }
}

/// Fails with every unresolved input of every group, before anything runs.
fn check_resolved(node: &NodeData, groups: &Groups) -> Result<(), NodeError> {
    let paths: Vec<String> = groups
        .values()
        .flatten()
        .filter(|asset| !asset.is_resolved())
        .map(|asset| asset.display_path().to_string())
        .collect();

    if paths.is_empty() {
        return Ok(());
    }

    Err(NodeError::new(node, ErrorKind::UnresolvedInput { paths }))
}

fn infos(assets: &[Asset]) -> Vec<AssetInfo> {
    assets.iter().filter_map(Asset::info).collect()
}

fn group_output(allocation: &Allocation, inputs: &[Asset]) -> Vec<Asset> {
    let mut assets = allocation.assets();
    assets.extend_from_slice(inputs);
    assets
}

fn not_allocated(node: &NodeData, key: &str) -> String {
    format!(
        "{}: group '{key}' never allocated an output, the result may be malformed",
        node.name
    )
}
