//! Grouping node groups by similarity.
//!
//! Callers describe each node group by one representative [`NodeInfo`]
//! (a live node when the group has one, otherwise its scale-from-zero
//! template) and these functions work on those descriptions.

use poolgrid_state::NodeInfo;

use crate::comparator::{ComparatorConfig, is_node_info_similar};

/// A node group id and its representative node.
#[derive(Debug, Clone)]
pub struct GroupSample {
    pub id: String,
    pub info: NodeInfo,
}

impl GroupSample {
    pub fn new(id: impl Into<String>, info: NodeInfo) -> Self {
        Self {
            id: id.into(),
            info,
        }
    }
}

/// Ids of the candidates similar to `target`, excluding `target` itself,
/// in candidate order.
pub fn find_similar_node_groups(
    target: &GroupSample,
    candidates: &[GroupSample],
    config: &ComparatorConfig,
) -> Vec<String> {
    candidates
        .iter()
        .filter(|c| c.id != target.id)
        .filter(|c| is_node_info_similar(&target.info, &c.info, config))
        .map(|c| c.id.clone())
        .collect()
}

/// Partition samples into classes of mutually interchangeable groups.
///
/// Each class is keyed by its first member; a sample joins the first
/// class whose key it is similar to.
pub fn similarity_classes(samples: &[GroupSample], config: &ComparatorConfig) -> Vec<Vec<String>> {
    let mut classes: Vec<(&NodeInfo, Vec<String>)> = Vec::new();
    for sample in samples {
        match classes
            .iter_mut()
            .find(|(key, _)| is_node_info_similar(key, &sample.info, config))
        {
            Some((_, members)) => members.push(sample.id.clone()),
            None => classes.push((&sample.info, vec![sample.id.clone()])),
        }
    }
    classes.into_iter().map(|(_, members)| members).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use poolgrid_state::{Node, Quantity, RESOURCE_CPU, RESOURCE_MEMORY, ResourceList};

    fn sample(id: &str, cpu: i64, pool_label: &str) -> GroupSample {
        let resources = ResourceList::from([
            (RESOURCE_CPU.to_string(), Quantity::from_value(cpu)),
            (RESOURCE_MEMORY.to_string(), Quantity::from_value(8 << 30)),
        ]);
        GroupSample::new(
            id,
            NodeInfo::new(Node {
                name: format!("{id}-node"),
                labels: HashMap::from([("tier".to_string(), pool_label.to_string())]),
                capacity: resources.clone(),
                allocatable: resources,
                ..Default::default()
            }),
        )
    }

    #[test]
    fn finds_similar_excluding_self() {
        let target = sample("a", 4, "web");
        let candidates = vec![
            target.clone(),
            sample("b", 4, "web"),
            sample("c", 8, "web"),
            sample("d", 4, "db"),
            sample("e", 4, "web"),
        ];
        let similar = find_similar_node_groups(&target, &candidates, &ComparatorConfig::default());
        assert_eq!(similar, vec!["b", "e"]);
    }

    #[test]
    fn partitions_into_classes() {
        let samples = vec![
            sample("a", 4, "web"),
            sample("b", 8, "web"),
            sample("c", 4, "web"),
            sample("d", 4, "db"),
            sample("e", 8, "web"),
        ];
        let classes = similarity_classes(&samples, &ComparatorConfig::default());
        assert_eq!(
            classes,
            vec![
                vec!["a".to_string(), "c".to_string()],
                vec!["b".to_string(), "e".to_string()],
                vec!["d".to_string()],
            ]
        );
    }

    #[test]
    fn empty_input() {
        assert!(similarity_classes(&[], &ComparatorConfig::default()).is_empty());
    }
}
