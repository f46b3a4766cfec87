//! JSON fixtures for seeding a store.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use poolgrid_state::{Machine, Node, ScalableResource, StateStore};

/// Objects to load into the store, in dependency order.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Fixture {
    pub scalable_resources: Vec<ScalableResource>,
    pub machines: Vec<Machine>,
    pub nodes: Vec<Node>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub scalable_resources: usize,
    pub machines: usize,
    pub nodes: usize,
}

impl Fixture {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Upsert everything into `store`.
    pub fn load_into(&self, store: &StateStore) -> anyhow::Result<ImportSummary> {
        for resource in &self.scalable_resources {
            store.put_scalable_resource(resource)?;
        }
        for machine in &self.machines {
            store.put_machine(machine)?;
        }
        for node in &self.nodes {
            store.put_node(node)?;
        }

        let summary = ImportSummary {
            scalable_resources: self.scalable_resources.len(),
            machines: self.machines.len(),
            nodes: self.nodes.len(),
        };
        info!(
            scalable_resources = summary.scalable_resources,
            machines = summary.machines,
            nodes = summary.nodes,
            "fixture imported"
        );
        Ok(summary)
    }
}
