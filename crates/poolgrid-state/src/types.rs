//! Domain types for the PoolGrid backing store.
//!
//! These mirror the machine-management API objects that the pool protocol
//! reads and writes: scalable resources (machine sets and machine
//! deployments), the machines they own, and the nodes those machines
//! become. All types are JSON-serialized into redb tables.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::quantity::{
    RESOURCE_CPU, RESOURCE_EPHEMERAL_STORAGE, RESOURCE_MEMORY, ResourceList,
};

/// Object version used for optimistic concurrency. Bumped on every write.
pub type ResourceVersion = u64;

// ── Scalable resources ─────────────────────────────────────────────

/// The two kinds of replica-controlled resource a pool can be backed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ScalableKind {
    /// A plain set of machines.
    MachineSet,
    /// A templated set that rolls out machine sets underneath it.
    MachineDeployment,
}

impl ScalableKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScalableKind::MachineSet => "MachineSet",
            ScalableKind::MachineDeployment => "MachineDeployment",
        }
    }
}

impl fmt::Display for ScalableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Points from an owned object to its controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerReference {
    pub kind: String,
    pub name: String,
}

impl OwnerReference {
    pub fn new(kind: ScalableKind, name: impl Into<String>) -> Self {
        Self {
            kind: kind.as_str().to_string(),
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Taint {
    pub key: String,
    #[serde(default)]
    pub value: String,
    pub effect: String,
}

/// The part of a scalable resource's machine template that propagates
/// to the nodes it produces.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MachineTemplate {
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub taints: Vec<Taint>,
}

/// A machine set or machine deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalableResource {
    pub kind: ScalableKind,
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
    /// Desired replica count. `None` until the first scale write.
    #[serde(default)]
    pub spec_replicas: Option<i32>,
    /// Replica count last observed by the resource's controller.
    #[serde(default)]
    pub status_replicas: i32,
    #[serde(default)]
    pub template: MachineTemplate,
    #[serde(default)]
    pub owner_references: Vec<OwnerReference>,
    #[serde(default)]
    pub resource_version: ResourceVersion,
}

impl ScalableResource {
    /// Build the composite key for the scalable resources table.
    pub fn table_key(&self) -> String {
        scalable_key(self.kind, &self.namespace, &self.name)
    }

    /// Replica count as seen through the scale sub-resource.
    ///
    /// Falls back to the status count while the spec field is unset.
    pub fn replicas(&self) -> i32 {
        self.spec_replicas.unwrap_or(self.status_replicas)
    }

    /// The owner reference of the given kind, if any.
    pub fn owner(&self, kind: ScalableKind) -> Option<&OwnerReference> {
        self.owner_references
            .iter()
            .find(|r| r.kind == kind.as_str())
    }
}

/// Composite key `{kind}/{namespace}/{name}`.
pub fn scalable_key(kind: ScalableKind, namespace: &str, name: &str) -> String {
    format!("{kind}/{namespace}/{name}")
}

/// Replica count and the version it was read at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scale {
    pub replicas: i32,
    pub resource_version: ResourceVersion,
}

// ── Machines ───────────────────────────────────────────────────────

/// One machine owned by a machine set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Machine {
    pub namespace: String,
    pub name: String,
    /// Instance identifier assigned once the machine is provisioned.
    #[serde(default)]
    pub provider_id: Option<String>,
    /// Set when provisioning failed permanently.
    #[serde(default)]
    pub failure_message: Option<String>,
    #[serde(default)]
    pub owner_references: Vec<OwnerReference>,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
    /// Unix timestamp (seconds) at which deletion began.
    #[serde(default)]
    pub deletion_timestamp: Option<u64>,
    #[serde(default)]
    pub resource_version: ResourceVersion,
}

impl Machine {
    /// Build the composite key for the machines table.
    pub fn table_key(&self) -> String {
        machine_key(&self.namespace, &self.name)
    }

    pub fn owner(&self, kind: ScalableKind) -> Option<&OwnerReference> {
        self.owner_references
            .iter()
            .find(|r| r.kind == kind.as_str())
    }

    pub fn is_deleting(&self) -> bool {
        self.deletion_timestamp.is_some()
    }
}

/// Composite key `{namespace}/{name}`.
pub fn machine_key(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}

// ── Nodes ──────────────────────────────────────────────────────────

/// A node registered by a provisioned machine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    #[serde(default)]
    pub provider_id: Option<String>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
    #[serde(default)]
    pub taints: Vec<Taint>,
    #[serde(default)]
    pub capacity: ResourceList,
    #[serde(default)]
    pub allocatable: ResourceList,
}

/// A node together with the resources its pods have requested.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub node: Node,
    #[serde(default)]
    pub requested: ResourceList,
}

impl NodeInfo {
    pub fn new(node: Node) -> Self {
        Self {
            node,
            requested: ResourceList::new(),
        }
    }

    /// Requested resources, always including cpu, memory and
    /// ephemeral storage (zero when nothing asked for them).
    pub fn requested_resources(&self) -> ResourceList {
        let mut requested = self.requested.clone();
        for name in [RESOURCE_CPU, RESOURCE_MEMORY, RESOURCE_EPHEMERAL_STORAGE] {
            requested.entry(name.to_string()).or_default();
        }
        requested
    }
}

// ── Change feed ────────────────────────────────────────────────────

/// A committed change, published after the write transaction commits.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    ScalableResourceUpserted(ScalableResource),
    ScalableResourceDeleted { key: String },
    MachineUpserted(Machine),
    MachineDeleted { namespace: String, name: String },
    NodeUpserted(Node),
    NodeDeleted { name: String },
}
