//! Annotation keys read and written by the node group protocol.
//!
//! Every key lives under a configurable API group so the same code can
//! drive clusters that serve the machine API under a different name.

use std::collections::HashMap;

use crate::error::{NodeGroupError, NodeGroupResult};

/// API group used when none is configured.
pub const DEFAULT_API_GROUP: &str = "machine.openshift.io";

/// Fully-qualified annotation keys for one API group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotationKeys {
    /// Minimum size on a scalable resource.
    pub min_size: String,
    /// Maximum size on a scalable resource.
    pub max_size: String,
    /// Marks a machine for removal by the machine controller.
    pub delete_machine: String,
    /// On a node: `namespace/name` of the machine that created it.
    pub machine: String,
    /// Scale-from-zero capacity hints on a scalable resource.
    pub cpu: String,
    pub memory_mb: String,
    pub gpu: String,
    pub max_pods: String,
}

impl AnnotationKeys {
    pub fn for_group(group: &str) -> Self {
        Self {
            min_size: format!("{group}/cluster-api-autoscaler-node-group-min-size"),
            max_size: format!("{group}/cluster-api-autoscaler-node-group-max-size"),
            delete_machine: format!("{group}/cluster-api-delete-machine"),
            machine: format!("{group}/machine"),
            cpu: format!("{group}/vCPU"),
            memory_mb: format!("{group}/memoryMb"),
            gpu: format!("{group}/GPU"),
            max_pods: format!("{group}/maxPods"),
        }
    }

    /// Parse the `(min, max)` size bounds from a resource's annotations.
    ///
    /// Absent bounds read as zero. Negative or non-integer values, and a
    /// minimum above the maximum, are rejected.
    pub fn size_bounds(&self, annotations: &HashMap<String, String>) -> NodeGroupResult<(i32, i32)> {
        let min = parse_bound(annotations, &self.min_size, "minSize")?;
        let max = parse_bound(annotations, &self.max_size, "maxSize")?;
        if max < min {
            return Err(NodeGroupError::InvalidArgument(format!(
                "errors because maxSize ({max}) is less than minSize ({min})"
            )));
        }
        Ok((min, max))
    }
}

impl Default for AnnotationKeys {
    fn default() -> Self {
        Self::for_group(DEFAULT_API_GROUP)
    }
}

fn parse_bound(annotations: &HashMap<String, String>, key: &str, what: &str) -> NodeGroupResult<i32> {
    let Some(raw) = annotations.get(key) else {
        return Ok(0);
    };
    match raw.trim().parse::<i32>() {
        Ok(v) if v >= 0 => Ok(v),
        _ => Err(NodeGroupError::InvalidArgument(format!(
            "errors because {what} is invalid: {raw:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn annotations(min: Option<&str>, max: Option<&str>) -> HashMap<String, String> {
        let keys = AnnotationKeys::default();
        let mut a = HashMap::new();
        if let Some(v) = min {
            a.insert(keys.min_size.clone(), v.to_string());
        }
        if let Some(v) = max {
            a.insert(keys.max_size.clone(), v.to_string());
        }
        a
    }

    #[test]
    fn keys_are_scoped_to_group() {
        let keys = AnnotationKeys::for_group("cluster.x-k8s.io");
        assert_eq!(
            keys.min_size,
            "cluster.x-k8s.io/cluster-api-autoscaler-node-group-min-size"
        );
        assert_eq!(keys.delete_machine, "cluster.x-k8s.io/cluster-api-delete-machine");
        assert_eq!(keys.memory_mb, "cluster.x-k8s.io/memoryMb");
    }

    #[test]
    fn absent_bounds_are_zero() {
        let keys = AnnotationKeys::default();
        assert_eq!(keys.size_bounds(&HashMap::new()).unwrap(), (0, 0));
        assert_eq!(keys.size_bounds(&annotations(None, Some("3"))).unwrap(), (0, 3));
    }

    #[test]
    fn rejects_bad_bounds() {
        let keys = AnnotationKeys::default();
        for (min, max) in [
            (Some("-1"), Some("0")),
            (Some("0"), Some("-1")),
            (Some("two"), Some("3")),
            (Some("1.5"), Some("3")),
            (Some("2"), Some("1")),
        ] {
            let err = keys.size_bounds(&annotations(min, max)).unwrap_err();
            assert!(
                matches!(err, NodeGroupError::InvalidArgument(_)),
                "{min:?}/{max:?} gave {err:?}"
            );
        }
    }
}
