//! Node similarity.
//!
//! Two nodes are similar when a pod that fits on one would fit on the
//! other and be scheduled the same way: near-identical capacity,
//! allocatable and free resources, and identical labels apart from the
//! ones that differ between any two nodes of the same group.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::trace;

use poolgrid_state::labels::*;
use poolgrid_state::{NodeInfo, Quantity, ResourceList};

/// Labels that never make two nodes dissimilar.
pub const IGNORED_LABELS: &[&str] = &[
    LABEL_HOSTNAME,
    LABEL_ZONE_BETA,
    LABEL_REGION_BETA,
    LABEL_ZONE_STABLE,
    LABEL_REGION_STABLE,
    LABEL_FLUENTD_DS_READY,
];

/// Tolerances for the similarity checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComparatorConfig {
    /// Largest absolute difference allowed in any capacity entry.
    pub capacity_tolerance: Quantity,
    /// Largest allowed difference in allocatable, as a fraction of the
    /// larger value.
    pub max_allocatable_difference_ratio: f64,
    /// Largest allowed difference in free resources, as a fraction of
    /// the larger value.
    pub max_free_difference_ratio: f64,
}

impl Default for ComparatorConfig {
    fn default() -> Self {
        Self {
            capacity_tolerance: Quantity::from_value(128 * 1024),
            max_allocatable_difference_ratio: 0.05,
            max_free_difference_ratio: 0.05,
        }
    }
}

/// Decide whether `a` and `b` are interchangeable. Symmetric; neither
/// input is modified.
pub fn is_node_info_similar(a: &NodeInfo, b: &NodeInfo, config: &ComparatorConfig) -> bool {
    let capacity = collect(a.node.capacity.iter(), b.node.capacity.iter());
    if !compare_with_tolerance(&capacity, config.capacity_tolerance) {
        trace!(a = %a.node.name, b = %b.node.name, "capacity differs");
        return false;
    }

    let allocatable = collect(a.node.allocatable.iter(), b.node.allocatable.iter());
    if !compare_resource_maps_with_tolerance(&allocatable, config.max_allocatable_difference_ratio) {
        trace!(a = %a.node.name, b = %b.node.name, "allocatable differs");
        return false;
    }

    let (free_a, free_b) = (free_resources(a), free_resources(b));
    let free = collect(free_a.iter(), free_b.iter());
    if !compare_resource_maps_with_tolerance(&free, config.max_free_difference_ratio) {
        trace!(a = %a.node.name, b = %b.node.name, "free resources differ");
        return false;
    }

    if !labels_match(a, b) {
        trace!(a = %a.node.name, b = %b.node.name, "labels differ");
        return false;
    }
    true
}

/// Allocatable minus requested, over the requested resources.
fn free_resources(info: &NodeInfo) -> ResourceList {
    info.requested_resources()
        .into_iter()
        .map(|(name, requested)| {
            let allocatable = info
                .node
                .allocatable
                .get(&name)
                .copied()
                .unwrap_or(Quantity::ZERO);
            (name, allocatable.saturating_sub(&requested))
        })
        .collect()
}

fn collect<'a>(
    a: impl Iterator<Item = (&'a String, &'a Quantity)>,
    b: impl Iterator<Item = (&'a String, &'a Quantity)>,
) -> BTreeMap<&'a str, Vec<Quantity>> {
    let mut out: BTreeMap<&str, Vec<Quantity>> = BTreeMap::new();
    for (name, q) in a.chain(b) {
        out.entry(name.as_str()).or_default().push(*q);
    }
    out
}

/// Every resource present on both sides, differing by at most
/// `tolerance`.
pub fn compare_with_tolerance(resources: &BTreeMap<&str, Vec<Quantity>>, tolerance: Quantity) -> bool {
    resources.values().all(|qs| match qs.as_slice() {
        [x, y] => x.abs_diff(y) <= tolerance,
        _ => false,
    })
}

/// Every resource present on both sides, the smaller within
/// `max_difference_ratio` of the larger.
pub fn compare_resource_maps_with_tolerance(
    resources: &BTreeMap<&str, Vec<Quantity>>,
    max_difference_ratio: f64,
) -> bool {
    resources.values().all(|qs| match qs.as_slice() {
        [x, y] => {
            let (larger, smaller) = if x >= y { (x, y) } else { (y, x) };
            let larger = larger.milli_value() as f64;
            let smaller = smaller.milli_value() as f64;
            larger - smaller <= larger * max_difference_ratio
        }
        _ => false,
    })
}

fn labels_match(a: &NodeInfo, b: &NodeInfo) -> bool {
    let relevant = |info: &NodeInfo| -> BTreeMap<String, String> {
        info.node
            .labels
            .iter()
            .filter(|(k, _)| !IGNORED_LABELS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    };
    relevant(a) == relevant(b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use poolgrid_state::{Node, RESOURCE_CPU, RESOURCE_MEMORY, RESOURCE_NVIDIA_GPU};

    fn q(s: &str) -> Quantity {
        s.parse().unwrap()
    }

    fn node_info(name: &str, cpu: &str, memory: &str) -> NodeInfo {
        let resources = ResourceList::from([
            (RESOURCE_CPU.to_string(), q(cpu)),
            (RESOURCE_MEMORY.to_string(), q(memory)),
        ]);
        NodeInfo::new(Node {
            name: name.into(),
            labels: HashMap::from([
                (LABEL_HOSTNAME.to_string(), name.to_string()),
                ("pool".to_string(), "a".to_string()),
            ]),
            capacity: resources.clone(),
            allocatable: resources,
            ..Default::default()
        })
    }

    fn similar(a: &NodeInfo, b: &NodeInfo) -> bool {
        let config = ComparatorConfig::default();
        let forward = is_node_info_similar(a, b, &config);
        assert_eq!(forward, is_node_info_similar(b, a, &config), "not symmetric");
        forward
    }

    #[test]
    fn identical_nodes_are_similar() {
        let a = node_info("n1", "2", "8Gi");
        let b = node_info("n2", "2", "8Gi");
        assert!(similar(&a, &b));
    }

    #[test]
    fn capacity_within_absolute_tolerance() {
        let a = node_info("n1", "2", "8Gi");

        let mut b = node_info("n2", "2", "8Gi");
        let small = q("8Gi").saturating_sub(&q("64Ki"));
        b.node.capacity.insert(RESOURCE_MEMORY.into(), small);
        assert!(similar(&a, &b));

        let mut c = node_info("n3", "2", "8Gi");
        let large = q("8Gi").saturating_sub(&q("1Mi"));
        c.node.capacity.insert(RESOURCE_MEMORY.into(), large);
        assert!(!similar(&a, &c));
    }

    #[test]
    fn capacity_resource_on_one_side_only() {
        let a = node_info("n1", "2", "8Gi");
        let mut b = node_info("n2", "2", "8Gi");
        b.node.capacity.insert(RESOURCE_NVIDIA_GPU.into(), q("1"));
        assert!(!similar(&a, &b));
    }

    #[test]
    fn allocatable_ratio() {
        let a = node_info("n1", "100", "8Gi");

        let mut b = node_info("n2", "100", "8Gi");
        b.node.allocatable.insert(RESOURCE_CPU.into(), q("96"));
        assert!(similar(&a, &b));

        b.node.allocatable.insert(RESOURCE_CPU.into(), q("94"));
        assert!(!similar(&a, &b));
    }

    #[test]
    fn free_ratio_uses_requests() {
        let a = node_info("n1", "10", "8Gi");
        let mut b = node_info("n2", "10", "8Gi");
        b.requested.insert(RESOURCE_CPU.into(), q("400m"));
        assert!(similar(&a, &b));

        b.requested.insert(RESOURCE_CPU.into(), q("2"));
        assert!(!similar(&a, &b));
        // The inputs are left as they were.
        assert!(a.requested.is_empty());
        assert_eq!(b.node.allocatable[RESOURCE_CPU], q("10"));
    }

    #[test]
    fn label_differences() {
        let a = node_info("n1", "2", "8Gi");

        let mut b = node_info("n2", "2", "8Gi");
        b.node.labels.insert(LABEL_ZONE_STABLE.into(), "zone-b".into());
        b.node.labels.insert(LABEL_FLUENTD_DS_READY.into(), "true".into());
        assert!(similar(&a, &b), "only ignored labels differ");

        b.node.labels.insert("anotherLabel".into(), "value".into());
        assert!(!similar(&a, &b));

        let mut c = node_info("n3", "2", "8Gi");
        c.node.labels.insert("pool".into(), "b".into());
        assert!(!similar(&a, &c));
    }

    #[test]
    fn config_from_toml() {
        let config: ComparatorConfig = toml::from_str(
            r#"
            capacity_tolerance = "256Ki"
            max_free_difference_ratio = 0.1
            "#,
        )
        .unwrap();
        assert_eq!(config.capacity_tolerance, q("256Ki"));
        assert_eq!(config.max_allocatable_difference_ratio, 0.05);
        assert_eq!(config.max_free_difference_ratio, 0.1);
    }
}
