//! Member identifiers.
//!
//! Provisioned machines are identified by their provider id. Machines
//! that failed before receiving one get a synthetic id so the autoscaler
//! can still see and remove them.

use std::cmp::Ordering;
use std::fmt;

use poolgrid_state::Machine;

/// Prefix of the synthetic id given to machines without a provider id.
pub const FAILED_MACHINE_PREFIX: &str = "failed:";

/// Identifier of one node group member.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ProviderId {
    Provisioned(String),
    /// Rendered as `failed:<namespace>_<name>`.
    Failed { namespace: String, name: String },
}

impl ProviderId {
    pub fn for_machine(machine: &Machine) -> Self {
        match machine.provider_id.as_deref() {
            Some(id) if !id.is_empty() => ProviderId::Provisioned(id.to_string()),
            _ => ProviderId::Failed {
                namespace: machine.namespace.clone(),
                name: machine.name.clone(),
            },
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ProviderId::Failed { .. })
    }

    pub fn normalized(&self) -> NormalizedProviderId {
        normalized_provider_string(&self.to_string())
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderId::Provisioned(id) => f.write_str(id),
            ProviderId::Failed { namespace, name } => {
                write!(f, "{FAILED_MACHINE_PREFIX}{namespace}_{name}")
            }
        }
    }
}

impl Ord for ProviderId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.to_string().cmp(&other.to_string())
    }
}

impl PartialOrd for ProviderId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A provider id reduced to the part that identifies the instance, so
/// that `aws:///us-east-1a/i-0abc` on a node and `i-0abc` elsewhere
/// compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NormalizedProviderId(String);

impl NormalizedProviderId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NormalizedProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Keep the last `/`-separated segment of a provider id.
pub fn normalized_provider_string(id: &str) -> NormalizedProviderId {
    let last = id.rsplit('/').next().unwrap_or(id);
    NormalizedProviderId(last.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine(name: &str, provider_id: Option<&str>) -> Machine {
        Machine {
            namespace: "test-ns".into(),
            name: name.into(),
            provider_id: provider_id.map(String::from),
            failure_message: None,
            owner_references: vec![],
            annotations: Default::default(),
            deletion_timestamp: None,
            resource_version: 0,
        }
    }

    #[test]
    fn normalizes_to_last_segment() {
        assert_eq!(normalized_provider_string("aws:///us-east-1a/i-0abc").as_str(), "i-0abc");
        assert_eq!(normalized_provider_string("i-0abc").as_str(), "i-0abc");
        assert_eq!(
            normalized_provider_string("test:////machine-0"),
            normalized_provider_string("machine-0")
        );
    }

    #[test]
    fn failed_machines_get_synthetic_id() {
        let id = ProviderId::for_machine(&machine("m-1", None));
        assert!(id.is_failed());
        assert_eq!(id.to_string(), "failed:test-ns_m-1");

        let empty = ProviderId::for_machine(&machine("m-2", Some("")));
        assert!(empty.is_failed());
    }

    #[test]
    fn failed_ids_sort_first() {
        let mut ids = vec![
            ProviderId::for_machine(&machine("a", Some("test:////a"))),
            ProviderId::for_machine(&machine("b", None)),
        ];
        ids.sort();
        assert!(ids[0].is_failed());
    }
}
