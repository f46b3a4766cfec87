//! Targeted member removal.
//!
//! Removing specific nodes takes two steps that the store cannot make
//! atomic together: mark each machine with the delete annotation, then
//! lower the replica count by the number newly marked. The machine set
//! controller prefers annotated machines when it scales down, so the
//! right members go. If the count write fails the marks are removed
//! again so no machine is left flagged without a matching decrement.

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use poolgrid_state::{Machine, Node, Scale};

use crate::error::{NodeGroupError, NodeGroupResult};
use crate::nodegroup::NodeGroup;

impl NodeGroup {
    /// Remove the given nodes from the group and lower its target size
    /// to match.
    ///
    /// Every node must belong to this group or nothing happens. Nodes
    /// whose machines are already marked or being deleted are skipped,
    /// so a repeated call is a no-op.
    pub fn delete_nodes(&self, nodes: &[Node]) -> NodeGroupResult<()> {
        let id = self.id();

        let mut machines: BTreeMap<String, Machine> = BTreeMap::new();
        for node in nodes {
            let machine = self.owned_machine(node, &id)?;
            machines.insert(machine.table_key(), machine);
        }

        let annotation = &self.controller.keys().delete_machine;
        let (skipped, to_mark): (Vec<Machine>, Vec<Machine>) = machines
            .into_values()
            .partition(|m| m.is_deleting() || m.annotations.contains_key(annotation));
        for machine in &skipped {
            debug!(node_group = %id, machine = %machine.table_key(), "machine already marked or deleting, skipping");
        }
        if to_mark.is_empty() {
            return Ok(());
        }

        let scale = self.read_scale()?;
        self.mark_and_decrement(&id, &to_mark, &scale)
    }

    /// Check the bounds against `scale`, mark `to_mark`, then write the
    /// decremented count at the version `scale` was read at.
    fn mark_and_decrement(&self, id: &str, to_mark: &[Machine], scale: &Scale) -> NodeGroupResult<()> {
        if scale.replicas <= self.min_size() {
            return Err(NodeGroupError::InvalidArgument(
                "min size reached, nodes will not be deleted".into(),
            ));
        }
        let count = to_mark.len() as i32;
        let desired = scale.replicas - count;
        if desired < self.min_size() {
            return Err(NodeGroupError::InvalidArgument(format!(
                "unable to delete {count} machines in {id:?}, machine replicas are {}, minSize is {}",
                scale.replicas,
                self.min_size()
            )));
        }
        if desired <= 0 {
            return Err(NodeGroupError::InvalidArgument(format!(
                "unable to delete {count} machines in {id:?}, machine replicas are <= 0"
            )));
        }

        let annotation = &self.controller.keys().delete_machine;
        let mut marked: Vec<&Machine> = Vec::new();
        for machine in to_mark {
            match self.controller.store().annotate_for_deletion(
                &machine.namespace,
                &machine.name,
                annotation,
            ) {
                Ok(true) => marked.push(machine),
                Ok(false) => {}
                Err(e) => {
                    warn!(node_group = %id, machine = %machine.table_key(), error = %e, "marking failed, removing delete marks");
                    self.unmark(&marked);
                    return Err(e.into());
                }
            }
        }

        if let Err(e) = self.write_scale(desired, scale) {
            warn!(node_group = %id, error = %e, "scale write failed, removing delete marks");
            self.unmark(&marked);
            return Err(e);
        }

        info!(
            node_group = %id,
            deleted = count,
            from = scale.replicas,
            to = desired,
            "deleted nodes"
        );
        Ok(())
    }

    /// The machine behind `node`, provided it belongs to this group.
    fn owned_machine(&self, node: &Node, id: &str) -> NodeGroupResult<Machine> {
        let node_ref = node
            .provider_id
            .clone()
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| node.name.clone());

        let machine = self
            .controller
            .find_machine_for_node(node)?
            .ok_or_else(|| NodeGroupError::NotFound(format!("unknown machine for node {node_ref:?}")))?;

        let owner = self.controller.owner_of(&machine)?;
        if owner.map(|r| r.table_key()).as_deref() != Some(id) {
            return Err(NodeGroupError::NotOwned {
                node: node_ref,
                node_group: id.to_string(),
            });
        }
        Ok(machine)
    }

    fn unmark(&self, machines: &[&Machine]) {
        let annotation = &self.controller.keys().delete_machine;
        for machine in machines {
            if let Err(e) = self.controller.store().remove_machine_annotation(
                &machine.namespace,
                &machine.name,
                annotation,
            ) {
                warn!(machine = %machine.table_key(), error = %e, "failed to remove delete mark");
            }
        }
    }
}
