//! Target size changes.
//!
//! Each operation is one read of the scale sub-resource followed by one
//! conditional write at the version that was read. A concurrent writer
//! turns the write into [`NodeGroupError::Conflict`] with nothing
//! changed; retrying is up to the caller.

use tracing::info;

use crate::error::{NodeGroupError, NodeGroupResult};
use crate::nodegroup::NodeGroup;

impl NodeGroup {
    /// Raise the target size by `delta`, up to the maximum size.
    pub fn increase_size(&self, delta: i32) -> NodeGroupResult<()> {
        if delta <= 0 {
            return Err(NodeGroupError::InvalidArgument(
                "size increase must be positive".into(),
            ));
        }

        let scale = self.read_scale()?;
        let desired = scale.replicas.saturating_add(delta);
        if desired > self.max_size() {
            return Err(NodeGroupError::InvalidArgument(format!(
                "size increase too large - desired:{desired} max:{}",
                self.max_size()
            )));
        }

        self.write_scale(desired, &scale)?;
        info!(node_group = %self.id(), from = scale.replicas, to = desired, "increased target size");
        Ok(())
    }

    /// Lower the target size by `-delta` without touching any member.
    ///
    /// Only slack between the target and the existing members can be
    /// given back. Every member counts, including failed ones and ones
    /// already being deleted.
    pub fn decrease_target_size(&self, delta: i32) -> NodeGroupResult<()> {
        if delta >= 0 {
            return Err(NodeGroupError::InvalidArgument(
                "size decrease must be negative".into(),
            ));
        }

        let scale = self.read_scale()?;
        let existing = self.members()?.len() as i32;
        let desired = scale.replicas.saturating_add(delta);
        if desired < existing {
            return Err(NodeGroupError::InvalidArgument(format!(
                "attempt to delete existing nodes targetSize:{} delta:{delta} existingNodes: {existing}",
                scale.replicas
            )));
        }

        self.write_scale(desired, &scale)?;
        info!(node_group = %self.id(), from = scale.replicas, to = desired, "decreased target size");
        Ok(())
    }
}
