//! Things a strategy can ask the build allocator to materialize.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::asset::{AssetId, AssetInfo};

/// An object that can be written out as a generated artifact.
///
/// Rendering only happens on a cache miss or a forced regeneration, a cache
/// hit never calls [`Artifact::render`].
pub trait Artifact {
    fn render(&self) -> anyhow::Result<Vec<u8>>;
}

impl Artifact for [u8] {
    fn render(&self) -> anyhow::Result<Vec<u8>> {
        Ok(self.to_vec())
    }
}

impl Artifact for Vec<u8> {
    fn render(&self) -> anyhow::Result<Vec<u8>> {
        Ok(self.clone())
    }
}

impl Artifact for str {
    fn render(&self) -> anyhow::Result<Vec<u8>> {
        Ok(self.as_bytes().to_vec())
    }
}

impl Artifact for String {
    fn render(&self) -> anyhow::Result<Vec<u8>> {
        Ok(self.as_bytes().to_vec())
    }
}

impl<T: Artifact + ?Sized> Artifact for &T {
    fn render(&self) -> anyhow::Result<Vec<u8>> {
        (**self).render()
    }
}

/// A single behaviour attached to a [`Prefab`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Component {
    pub kind: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, serde_json::Value>,
}

impl Component {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            properties: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

/// A composite object assembled from source assets.
///
/// Prefabs nest: every child is a prefab of its own, which is how a group of
/// inputs ends up as one object with one child per input.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Prefab {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub components: Vec<Component>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Prefab>,
    /// Inputs this prefab references.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<AssetId>,
}

impl Prefab {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// A prefab with one child per input, each child referencing its asset
    /// through a `source` component.
    pub fn from_inputs(name: impl Into<String>, inputs: &[AssetInfo]) -> Self {
        let children = inputs
            .iter()
            .map(|input| Prefab {
                name: input.name().to_string(),
                components: vec![
                    Component::new("source")
                        .with("path", input.path().as_str())
                        .with("type", input.asset_type()),
                ],
                children: Vec::new(),
                sources: vec![input.id()],
            })
            .collect();

        Self {
            name: name.into(),
            components: Vec::new(),
            children,
            sources: inputs.iter().map(AssetInfo::id).collect(),
        }
    }

    pub fn with_component(mut self, component: Component) -> Self {
        self.components.push(component);
        self
    }

    pub fn with_child(mut self, child: Prefab) -> Self {
        self.children.push(child);
        self
    }
}

impl Artifact for Prefab {
    fn render(&self) -> anyhow::Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }
}
