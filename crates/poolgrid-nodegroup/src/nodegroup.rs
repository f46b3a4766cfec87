//! NodeGroup — the autoscaler's handle on one scalable resource.
//!
//! A handle captures the resource's identity and size bounds when it is
//! built. Everything else (replica count, members) is read from the
//! store on each call, so a handle never acts on a stale count.

use serde::Serialize;
use tracing::{debug, warn};

use poolgrid_state::{Machine, Scale, ScalableKind, ScalableResource, StateError};

use crate::controller::MachineController;
use crate::error::{NodeGroupError, NodeGroupResult};
use crate::provider_id::ProviderId;

/// Lifecycle state of a member as reported to the autoscaler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    Running,
    Creating,
    Deleting,
    Failed,
}

/// One member of a node group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Instance {
    pub id: String,
    pub state: InstanceState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl Instance {
    fn of(machine: &Machine) -> Self {
        let id = ProviderId::for_machine(machine);
        let state = if machine.is_deleting() {
            InstanceState::Deleting
        } else if machine.failure_message.is_some() {
            InstanceState::Failed
        } else if id.is_failed() {
            InstanceState::Creating
        } else {
            InstanceState::Running
        };
        Self {
            id: id.to_string(),
            state,
            error_message: machine.failure_message.clone(),
        }
    }
}

#[derive(Clone)]
pub struct NodeGroup {
    pub(crate) controller: MachineController,
    pub(crate) resource: ScalableResource,
    min_size: i32,
    max_size: i32,
}

impl std::fmt::Debug for NodeGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.debug())
    }
}

impl NodeGroup {
    /// Build a handle, validating the size bound annotations.
    pub fn new(controller: MachineController, resource: ScalableResource) -> NodeGroupResult<Self> {
        let (min_size, max_size) = controller.keys().size_bounds(&resource.annotations)?;
        Ok(Self {
            controller,
            resource,
            min_size,
            max_size,
        })
    }

    /// `Kind/namespace/name`.
    pub fn id(&self) -> String {
        self.resource.table_key()
    }

    pub fn kind(&self) -> ScalableKind {
        self.resource.kind
    }

    pub fn namespace(&self) -> &str {
        &self.resource.namespace
    }

    pub fn name(&self) -> &str {
        &self.resource.name
    }

    pub fn resource(&self) -> &ScalableResource {
        &self.resource
    }

    pub fn min_size(&self) -> i32 {
        self.min_size
    }

    pub fn max_size(&self) -> i32 {
        self.max_size
    }

    /// One-line description, using the replica count the handle was
    /// built with.
    pub fn debug(&self) -> String {
        format!(
            "{} (min: {}, max: {}, replicas: {})",
            self.id(),
            self.min_size,
            self.max_size,
            self.resource.replicas()
        )
    }

    /// Current desired replica count, read fresh.
    pub fn target_size(&self) -> NodeGroupResult<i32> {
        Ok(self.read_scale()?.replicas)
    }

    /// Every member machine, including ones still provisioning, failed
    /// or being deleted. Sorted by id.
    pub fn nodes(&self) -> NodeGroupResult<Vec<Instance>> {
        let machines = self.members()?;
        let mut instances: Vec<(ProviderId, Instance)> = machines
            .iter()
            .map(|m| (ProviderId::for_machine(m), Instance::of(m)))
            .collect();
        instances.sort_by(|a, b| a.0.cmp(&b.0));
        debug!(node_group = %self.id(), members = instances.len(), "listed node group members");
        Ok(instances.into_iter().map(|(_, i)| i).collect())
    }

    /// Handles only exist for resources that exist.
    pub fn exist(&self) -> bool {
        true
    }

    pub fn create(&self) -> NodeGroupResult<NodeGroup> {
        Err(NodeGroupError::AlreadyExists)
    }

    pub fn delete(&self) -> NodeGroupResult<()> {
        Err(NodeGroupError::NotImplemented)
    }

    pub fn autoprovisioned(&self) -> bool {
        false
    }

    pub(crate) fn members(&self) -> NodeGroupResult<Vec<Machine>> {
        Ok(self.controller.store().list_members(
            self.resource.kind,
            &self.resource.namespace,
            &self.resource.name,
        )?)
    }

    pub(crate) fn read_scale(&self) -> NodeGroupResult<Scale> {
        Ok(self.controller.store().get_scale(
            self.resource.kind,
            &self.resource.namespace,
            &self.resource.name,
        )?)
    }

    /// Conditional write: succeeds only if the resource is still at the
    /// version `expected` was read at.
    pub(crate) fn write_scale(&self, replicas: i32, expected: &Scale) -> NodeGroupResult<Scale> {
        let result = self.controller.store().update_scale(
            self.resource.kind,
            &self.resource.namespace,
            &self.resource.name,
            replicas,
            expected.resource_version,
        );
        if let Err(StateError::Conflict { expected: read_at, actual, .. }) = &result {
            warn!(
                node_group = %self.id(),
                replicas,
                read_at = *read_at,
                actual = *actual,
                "scale write rejected, node group changed since it was read"
            );
        }
        Ok(result?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use poolgrid_state::StateStore;

    use crate::annotations::AnnotationKeys;

    fn group(store: &StateStore) -> NodeGroup {
        let keys = AnnotationKeys::default();
        let resource = ScalableResource {
            kind: ScalableKind::MachineSet,
            namespace: "ns".into(),
            name: "pool".into(),
            annotations: [
                (keys.min_size.clone(), "0".to_string()),
                (keys.max_size.clone(), "5".to_string()),
            ]
            .into(),
            spec_replicas: Some(1),
            status_replicas: 1,
            template: Default::default(),
            owner_references: vec![],
            resource_version: 0,
        };
        let resource = store.put_scalable_resource(&resource).unwrap();
        let controller = MachineController::synced(store.clone(), keys).unwrap();
        NodeGroup::new(controller, resource).unwrap()
    }

    #[test]
    fn stale_scale_write_conflicts() {
        let store = StateStore::open_in_memory().unwrap();
        let group = group(&store);

        let stale = group.read_scale().unwrap();
        group.write_scale(2, &stale).unwrap();

        let err = group.write_scale(3, &stale).unwrap_err();
        assert!(matches!(err, NodeGroupError::Conflict(_)), "{err:?}");
        assert_eq!(group.target_size().unwrap(), 2);
    }

    #[test]
    fn instance_states() {
        let mut machine = Machine {
            namespace: "ns".into(),
            name: "m".into(),
            provider_id: Some("test:////m".into()),
            failure_message: None,
            owner_references: vec![],
            annotations: Default::default(),
            deletion_timestamp: None,
            resource_version: 0,
        };
        assert_eq!(Instance::of(&machine).state, InstanceState::Running);

        machine.provider_id = None;
        assert_eq!(Instance::of(&machine).state, InstanceState::Creating);

        machine.failure_message = Some("boom".into());
        assert_eq!(Instance::of(&machine).state, InstanceState::Failed);

        machine.deletion_timestamp = Some(1);
        assert_eq!(Instance::of(&machine).state, InstanceState::Deleting);
    }
}
