//! MachineController — discovery and member resolution.
//!
//! The controller is the shared context every [`NodeGroup`] handle
//! carries: the store, the member registry and the annotation keys.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use poolgrid_state::{Machine, Node, ScalableKind, ScalableResource, StateStore};

use crate::annotations::AnnotationKeys;
use crate::error::{NodeGroupError, NodeGroupResult};
use crate::nodegroup::NodeGroup;
use crate::provider_id::{NormalizedProviderId, normalized_provider_string};
use crate::registry::{MachineRef, MemberRegistry};

#[derive(Clone)]
pub struct MachineController {
    store: StateStore,
    registry: Arc<MemberRegistry>,
    keys: Arc<AnnotationKeys>,
}

impl MachineController {
    pub fn new(store: StateStore, registry: Arc<MemberRegistry>, keys: AnnotationKeys) -> Self {
        Self {
            store,
            registry,
            keys: Arc::new(keys),
        }
    }

    /// Build a controller over a freshly synced registry. The registry
    /// does not follow later changes; use [`MachineController::start`]
    /// for that.
    pub fn synced(store: StateStore, keys: AnnotationKeys) -> NodeGroupResult<Self> {
        let registry = Arc::new(MemberRegistry::new());
        registry.resync(&store)?;
        Ok(Self::new(store, registry, keys))
    }

    /// Build a controller whose registry follows the store's change feed
    /// until `shutdown` fires.
    pub fn start(
        store: StateStore,
        keys: AnnotationKeys,
        shutdown: watch::Receiver<bool>,
    ) -> NodeGroupResult<(Self, JoinHandle<()>)> {
        let registry = Arc::new(MemberRegistry::new());
        // Subscribe before listing so nothing committed in between is lost.
        let events = store.subscribe();
        registry.resync(&store)?;

        let task = {
            let registry = Arc::clone(&registry);
            let store = store.clone();
            tokio::spawn(async move { registry.run(store, events, shutdown).await })
        };
        Ok((Self::new(store, registry, keys), task))
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn registry(&self) -> &MemberRegistry {
        &self.registry
    }

    pub fn keys(&self) -> &AnnotationKeys {
        &self.keys
    }

    /// All node groups the autoscaler may act on.
    ///
    /// Machine sets rolled out by a machine deployment are represented by
    /// the deployment, and groups with no room to scale are left out.
    pub fn node_groups(&self) -> NodeGroupResult<Vec<NodeGroup>> {
        let mut groups = Vec::new();
        for resource in self.store.list_scalable_resources()? {
            if resource.kind == ScalableKind::MachineSet
                && resource.owner(ScalableKind::MachineDeployment).is_some()
            {
                continue;
            }
            let group = NodeGroup::new(self.clone(), resource)?;
            if group.max_size() > group.min_size() {
                groups.push(group);
            } else {
                debug!(node_group = %group.id(), "skipping node group without room to scale");
            }
        }
        Ok(groups)
    }

    /// Look up a node group by its `Kind/namespace/name` id.
    pub fn node_group(&self, id: &str) -> NodeGroupResult<Option<NodeGroup>> {
        let mut parts = id.splitn(3, '/');
        let (Some(kind), Some(namespace), Some(name)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(NodeGroupError::InvalidArgument(format!(
                "malformed node group id {id:?}, expected Kind/namespace/name"
            )));
        };
        let kind = match kind {
            "MachineSet" => ScalableKind::MachineSet,
            "MachineDeployment" => ScalableKind::MachineDeployment,
            other => {
                return Err(NodeGroupError::InvalidArgument(format!(
                    "unknown scalable resource kind {other:?}"
                )));
            }
        };
        match self.store.get_scalable_resource(kind, namespace, name)? {
            Some(resource) => Ok(Some(NodeGroup::new(self.clone(), resource)?)),
            None => Ok(None),
        }
    }

    /// Resolve a provider id to the machine behind it.
    ///
    /// Falls back to the machine annotation on the node registered under
    /// the same provider id, for machines whose own provider id has not
    /// been written yet.
    pub fn find_machine_by_provider_id(
        &self,
        id: &NormalizedProviderId,
    ) -> NodeGroupResult<Option<Machine>> {
        if let Some(machine) = self.registry.machine_for(id) {
            if let Some(m) = self.store.get_machine(&machine.namespace, &machine.name)? {
                return Ok(Some(m));
            }
        }

        let Some(node_name) = self.registry.node_for(id) else {
            return Ok(None);
        };
        let Some(node) = self.store.get_node(&node_name)? else {
            return Ok(None);
        };
        self.machine_from_node_annotation(&node)
    }

    /// Resolve the machine backing a node.
    pub fn find_machine_for_node(&self, node: &Node) -> NodeGroupResult<Option<Machine>> {
        match node.provider_id.as_deref().filter(|p| !p.is_empty()) {
            Some(provider_id) => {
                self.find_machine_by_provider_id(&normalized_provider_string(provider_id))
            }
            None => self.machine_from_node_annotation(node),
        }
    }

    fn machine_from_node_annotation(&self, node: &Node) -> NodeGroupResult<Option<Machine>> {
        let Some(raw) = node.annotations.get(&self.keys.machine) else {
            return Ok(None);
        };
        let Some(machine) = MachineRef::parse(raw) else {
            warn!(node = %node.name, annotation = %raw, "malformed machine annotation");
            return Ok(None);
        };
        Ok(self.store.get_machine(&machine.namespace, &machine.name)?)
    }

    /// The scalable resource a machine belongs to: its machine set, or
    /// the deployment that owns that set.
    pub fn owner_of(&self, machine: &Machine) -> NodeGroupResult<Option<ScalableResource>> {
        let Some(owner) = machine.owner(ScalableKind::MachineSet) else {
            return Ok(None);
        };
        let set = self.store.get_scalable_resource(
            ScalableKind::MachineSet,
            &machine.namespace,
            &owner.name,
        )?;
        let Some(set) = set else {
            return Ok(None);
        };
        if let Some(deployment) = set.owner(ScalableKind::MachineDeployment) {
            return Ok(self.store.get_scalable_resource(
                ScalableKind::MachineDeployment,
                &set.namespace,
                &deployment.name,
            )?);
        }
        Ok(Some(set))
    }

    /// The node group a node belongs to, if it belongs to one the
    /// autoscaler may act on.
    pub fn node_group_for_node(&self, node: &Node) -> NodeGroupResult<Option<NodeGroup>> {
        let Some(machine) = self.find_machine_for_node(node)? else {
            return Ok(None);
        };
        let Some(resource) = self.owner_of(&machine)? else {
            return Ok(None);
        };
        let group = NodeGroup::new(self.clone(), resource)?;
        if group.max_size() > group.min_size() {
            Ok(Some(group))
        } else {
            Ok(None)
        }
    }
}
