//! The pluggable part of a prefabricator node.

use std::collections::BTreeMap;

use camino::Utf8Path;

use crate::allocator::{BuildAllocator, PlanAllocator};
use crate::asset::AssetInfo;
use crate::core::{NodeData, Target};
use crate::error::{ErrorKind, NodeError, ScriptNameError};
use crate::ledger::BuildRecords;

/// Everything a strategy gets to see about the group it works on.
#[derive(Debug, Clone, Copy)]
pub struct GroupContext<'a> {
    pub target: &'a Target,
    pub node: &'a NodeData,
    pub group: &'a str,
    pub inputs: &'a [AssetInfo],
    pub output_dir: &'a Utf8Path,
}

impl GroupContext<'_> {
    /// Error for declining to plan this group.
    pub fn reject(&self, reason: impl Into<String>) -> NodeError {
        NodeError::new(
            self.node,
            ErrorKind::PlanRejected {
                group: self.group.to_string(),
                reason: reason.into(),
            },
        )
    }
}

/// Plan and build logic of a concrete node type.
///
/// Both hooks fail loudly by default. A strategy that silently does nothing
/// would leave downstream nodes believing the cache is valid.
pub trait Strategy {
    /// Declares the outputs of a group through `allocate`, without creating
    /// anything.
    fn plan(&self, ctx: &GroupContext<'_>, _allocate: &mut PlanAllocator<'_>) -> Result<(), NodeError> {
        Err(NodeError::new(ctx.node, ErrorKind::NotImplemented { operation: "plan" }))
    }

    /// Generates the outputs of a group through `allocate`.
    fn build(
        &self,
        ctx: &GroupContext<'_>,
        _allocate: &mut BuildAllocator<'_, dyn BuildRecords + '_>,
    ) -> anyhow::Result<()> {
        Err(NodeError::new(ctx.node, ErrorKind::NotImplemented { operation: "build" }).into())
    }
}

impl<S: Strategy + ?Sized> Strategy for Box<S> {
    fn plan(&self, ctx: &GroupContext<'_>, allocate: &mut PlanAllocator<'_>) -> Result<(), NodeError> {
        (**self).plan(ctx, allocate)
    }

    fn build(
        &self,
        ctx: &GroupContext<'_>,
        allocate: &mut BuildAllocator<'_, dyn BuildRecords + '_>,
    ) -> anyhow::Result<()> {
        (**self).build(ctx, allocate)
    }
}

/// A strategy that implements neither hook.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unimplemented;

impl Strategy for Unimplemented {}

type Factory = Box<dyn Fn() -> Box<dyn Strategy> + Send + Sync>;

/// Strategies addressable by name, e.g. from a saved node graph.
#[derive(Default)]
pub struct StrategyRegistry {
    factories: BTreeMap<String, Factory>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<S, F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        S: Strategy + 'static,
        F: Fn() -> S + Send + Sync + 'static,
    {
        self.factories.insert(
            name.into(),
            Box::new(move || Box::new(factory()) as Box<dyn Strategy>),
        );
        self
    }

    /// Checks that `name` refers to a registered strategy.
    pub fn validate_script_name(&self, name: &str) -> Result<(), ScriptNameError> {
        if name.trim().is_empty() {
            return Err(ScriptNameError::Empty);
        }

        if !self.factories.contains_key(name) {
            return Err(ScriptNameError::Unknown(name.to_string()));
        }

        Ok(())
    }

    pub fn create(&self, name: &str) -> Result<Box<dyn Strategy>, ScriptNameError> {
        self.validate_script_name(name)?;

        self.factories
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| ScriptNameError::Unknown(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.factories.keys()).finish()
    }
}
