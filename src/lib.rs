#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod allocator;
mod artifact;
mod asset;
mod config;
mod core;
mod error;
mod io;
mod ledger;
#[cfg(feature = "logging")]
mod logging;
mod node;
mod reconcile;
mod strategy;
mod validity;

pub use crate::allocator::{Allocation, BuildAllocator, PlanAllocator};
pub use crate::artifact::{Artifact, Component, Prefab};
pub use crate::asset::{Asset, AssetId, AssetInfo};
pub use crate::config::Settings;
pub use crate::core::{CacheSet, ConnectionData, Groups, Hash32, NodeData, Target};
pub use crate::error::*;
pub use crate::io::{CacheRoot, OutputDirs, Sidecar};
pub use crate::ledger::{BuildLedger, BuildRecords};
#[cfg(feature = "logging")]
pub use crate::logging::init_logging;
pub use crate::node::{NodeOutput, Prefabricator, RunReport};
pub use crate::reconcile::{BundleTags, SidecarTags, reconcile, stale_entries};
pub use crate::strategy::{GroupContext, Strategy, StrategyRegistry, Unimplemented};
pub use crate::validity::is_valid;
