//! Well-known node label keys.

pub const LABEL_HOSTNAME: &str = "kubernetes.io/hostname";

pub const LABEL_OS_STABLE: &str = "kubernetes.io/os";
pub const LABEL_OS_BETA: &str = "beta.kubernetes.io/os";
pub const LABEL_ARCH_STABLE: &str = "kubernetes.io/arch";
pub const LABEL_ARCH_BETA: &str = "beta.kubernetes.io/arch";

pub const LABEL_INSTANCE_TYPE_STABLE: &str = "node.kubernetes.io/instance-type";
pub const LABEL_INSTANCE_TYPE_BETA: &str = "beta.kubernetes.io/instance-type";

pub const LABEL_ZONE_STABLE: &str = "topology.kubernetes.io/zone";
pub const LABEL_REGION_STABLE: &str = "topology.kubernetes.io/region";
pub const LABEL_ZONE_BETA: &str = "failure-domain.beta.kubernetes.io/zone";
pub const LABEL_REGION_BETA: &str = "failure-domain.beta.kubernetes.io/region";

/// Set on nodes during the 1.8 → 1.9 fluentd daemonset migration.
pub const LABEL_FLUENTD_DS_READY: &str = "beta.kubernetes.io/fluentd-ds-ready";
