//! Scale-from-zero node templates.
//!
//! When a group has no live nodes the autoscaler still needs to know
//! what a new node would look like. Capacity comes from annotations on
//! the scalable resource; labels are layered from platform defaults,
//! well-known labels of a live member node (if there is one), and the
//! machine template, later layers winning.

use std::collections::HashMap;

use tracing::debug;

use poolgrid_state::labels::*;
use poolgrid_state::{
    Node, NodeInfo, Quantity, RESOURCE_CPU, RESOURCE_MEMORY, RESOURCE_NVIDIA_GPU, RESOURCE_PODS,
    ResourceList,
};

use crate::annotations::AnnotationKeys;
use crate::error::{NodeGroupError, NodeGroupResult};
use crate::nodegroup::NodeGroup;
use crate::provider_id::ProviderId;

/// Pods per node when the resource does not say otherwise.
pub const DEFAULT_MAX_PODS: i64 = 250;

const DEFAULT_OS: &str = "linux";
const DEFAULT_ARCH: &str = "amd64";

/// Labels copied from a live member node into the template.
const COPIED_NODE_LABELS: &[&str] = &[
    LABEL_OS_STABLE,
    LABEL_ARCH_STABLE,
    LABEL_INSTANCE_TYPE_STABLE,
    LABEL_INSTANCE_TYPE_BETA,
    LABEL_ZONE_STABLE,
    LABEL_REGION_STABLE,
];

impl NodeGroup {
    /// Describe a hypothetical new member of this group.
    ///
    /// Fails with [`NodeGroupError::NotImplemented`] when the resource
    /// carries no cpu or memory capacity annotations.
    pub fn template_node_info(&self) -> NodeGroupResult<NodeInfo> {
        let capacity = capacity_from_annotations(self.controller.keys(), &self.resource.annotations)?
            .ok_or(NodeGroupError::NotImplemented)?;

        let name = format!("{}-template-{:08x}", self.resource.name, rand::random::<u32>());
        let live = self.live_node()?;
        let labels = template_labels(&name, live.as_ref(), &self.resource.template.labels);

        debug!(node_group = %self.id(), template = %name, "synthesized node template");
        Ok(NodeInfo::new(Node {
            name,
            provider_id: None,
            labels,
            annotations: HashMap::new(),
            taints: self.resource.template.taints.clone(),
            allocatable: capacity.clone(),
            capacity,
        }))
    }

    /// A node describing this group: a registered member node when
    /// there is one, otherwise the scale-from-zero template.
    pub fn sample_node_info(&self) -> NodeGroupResult<NodeInfo> {
        match self.live_node()? {
            Some(node) => Ok(NodeInfo::new(node)),
            None => self.template_node_info(),
        }
    }

    /// First member node that is registered, in member id order.
    fn live_node(&self) -> NodeGroupResult<Option<Node>> {
        let mut ids: Vec<ProviderId> = self
            .members()?
            .iter()
            .map(ProviderId::for_machine)
            .filter(|id| !id.is_failed())
            .collect();
        ids.sort();

        let registry = self.controller.registry();
        for id in ids {
            let Some(name) = registry.node_for(&id.normalized()) else {
                continue;
            };
            if let Some(node) = self.controller.store().get_node(&name)? {
                return Ok(Some(node));
            }
        }
        Ok(None)
    }
}

/// Capacity from the scale-from-zero annotations, or `None` when cpu or
/// memory is missing.
pub fn capacity_from_annotations(
    keys: &AnnotationKeys,
    annotations: &HashMap<String, String>,
) -> NodeGroupResult<Option<ResourceList>> {
    let (Some(cpu), Some(memory)) = (annotations.get(&keys.cpu), annotations.get(&keys.memory_mb))
    else {
        return Ok(None);
    };

    let cpu: Quantity = cpu.parse().map_err(|e| {
        NodeGroupError::InvalidArgument(format!("invalid {} annotation: {e}", keys.cpu))
    })?;
    let memory_mb = parse_count(&keys.memory_mb, memory)?;
    if cpu.is_zero() || memory_mb == 0 {
        return Ok(None);
    }
    let gpu = match annotations.get(&keys.gpu) {
        Some(v) => parse_count(&keys.gpu, v)?,
        None => 0,
    };
    let max_pods = match annotations.get(&keys.max_pods) {
        Some(v) => parse_count(&keys.max_pods, v)?,
        None => DEFAULT_MAX_PODS,
    };

    let memory = memory_mb.checked_mul(1024 * 1024).ok_or_else(|| {
        NodeGroupError::InvalidArgument(format!("invalid {} annotation: {memory:?}", keys.memory_mb))
    })?;

    let mut capacity = ResourceList::new();
    capacity.insert(RESOURCE_CPU.into(), cpu);
    capacity.insert(RESOURCE_MEMORY.into(), Quantity::from_value(memory));
    capacity.insert(RESOURCE_NVIDIA_GPU.into(), Quantity::from_value(gpu));
    capacity.insert(RESOURCE_PODS.into(), Quantity::from_value(max_pods));
    Ok(Some(capacity))
}

fn parse_count(key: &str, raw: &str) -> NodeGroupResult<i64> {
    match raw.trim().parse::<i64>() {
        Ok(v) if v >= 0 => Ok(v),
        _ => Err(NodeGroupError::InvalidArgument(format!(
            "invalid {key} annotation: {raw:?}"
        ))),
    }
}

/// Merge template labels: defaults, then well-known labels from `live`,
/// then the machine template's own labels.
pub fn template_labels(
    node_name: &str,
    live: Option<&Node>,
    template: &HashMap<String, String>,
) -> HashMap<String, String> {
    let mut labels: HashMap<String, String> = [
        (LABEL_OS_STABLE, DEFAULT_OS),
        (LABEL_OS_BETA, DEFAULT_OS),
        (LABEL_ARCH_STABLE, DEFAULT_ARCH),
        (LABEL_ARCH_BETA, DEFAULT_ARCH),
        (LABEL_HOSTNAME, node_name),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();

    if let Some(node) = live {
        for key in COPIED_NODE_LABELS {
            if let Some(value) = node.labels.get(*key) {
                labels.insert(key.to_string(), value.clone());
            }
        }
    }

    labels.extend(template.iter().map(|(k, v)| (k.clone(), v.clone())));
    labels
}
