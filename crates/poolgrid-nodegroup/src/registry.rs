//! MemberRegistry — provider id → machine and node lookups.
//!
//! Lookups by provider id are what the autoscaler does most, so the
//! registry keeps them in memory and follows the store's change feed.
//! Entries point at object keys only. Callers re-read the object from
//! the store, which means a lagging index can at worst miss a very new
//! member but never hands out stale object contents.

use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use poolgrid_state::{Machine, Node, StateResult, StateStore, StoreEvent, machine_key};

use crate::provider_id::{NormalizedProviderId, ProviderId, normalized_provider_string};

/// Namespace and name of a machine.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MachineRef {
    pub namespace: String,
    pub name: String,
}

impl MachineRef {
    pub fn of(machine: &Machine) -> Self {
        Self {
            namespace: machine.namespace.clone(),
            name: machine.name.clone(),
        }
    }

    /// Parse the `namespace/name` form used in node annotations.
    pub fn parse(s: &str) -> Option<Self> {
        let (namespace, name) = s.split_once('/')?;
        if namespace.is_empty() || name.is_empty() {
            return None;
        }
        Some(Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
        })
    }
}

impl fmt::Display for MachineRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&machine_key(&self.namespace, &self.name))
    }
}

#[derive(Default)]
struct Index {
    machines: HashMap<NormalizedProviderId, MachineRef>,
    /// Reverse of `machines`, for removing an entry when its id changes.
    machine_ids: HashMap<MachineRef, NormalizedProviderId>,
    nodes: HashMap<NormalizedProviderId, String>,
    node_ids: HashMap<String, NormalizedProviderId>,
}

impl Index {
    fn upsert_machine(&mut self, machine: &Machine) {
        let key = MachineRef::of(machine);
        let id = ProviderId::for_machine(machine).normalized();
        if let Some(old) = self.machine_ids.insert(key.clone(), id.clone()) {
            if old != id {
                self.machines.remove(&old);
            }
        }
        self.machines.insert(id, key);
    }

    fn remove_machine(&mut self, key: &MachineRef) {
        if let Some(id) = self.machine_ids.remove(key) {
            if self.machines.get(&id) == Some(key) {
                self.machines.remove(&id);
            }
        }
    }

    fn upsert_node(&mut self, node: &Node) {
        let old = self.node_ids.remove(&node.name);
        if let Some(old) = old {
            if self.nodes.get(&old) == Some(&node.name) {
                self.nodes.remove(&old);
            }
        }
        let Some(provider_id) = node.provider_id.as_deref().filter(|p| !p.is_empty()) else {
            return;
        };
        let id = normalized_provider_string(provider_id);
        self.node_ids.insert(node.name.clone(), id.clone());
        self.nodes.insert(id, node.name.clone());
    }

    fn remove_node(&mut self, name: &str) {
        if let Some(id) = self.node_ids.remove(name) {
            if self.nodes.get(&id).is_some_and(|n| n == name) {
                self.nodes.remove(&id);
            }
        }
    }
}

/// In-memory index of machines and nodes by normalized provider id.
#[derive(Default)]
pub struct MemberRegistry {
    index: RwLock<Index>,
}

impl MemberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the index from a full listing of the store.
    pub fn resync(&self, store: &StateStore) -> StateResult<()> {
        let machines = store.list_machines()?;
        let nodes = store.list_nodes()?;

        let mut fresh = Index::default();
        for machine in &machines {
            fresh.upsert_machine(machine);
        }
        for node in &nodes {
            fresh.upsert_node(node);
        }

        *self.index.write().expect("registry lock") = fresh;
        debug!(
            machines = machines.len(),
            nodes = nodes.len(),
            "member registry resynced"
        );
        Ok(())
    }

    /// Apply one change from the store's feed.
    pub fn apply(&self, event: &StoreEvent) {
        let mut index = self.index.write().expect("registry lock");
        match event {
            StoreEvent::MachineUpserted(machine) => index.upsert_machine(machine),
            StoreEvent::MachineDeleted { namespace, name } => index.remove_machine(&MachineRef {
                namespace: namespace.clone(),
                name: name.clone(),
            }),
            StoreEvent::NodeUpserted(node) => index.upsert_node(node),
            StoreEvent::NodeDeleted { name } => index.remove_node(name),
            StoreEvent::ScalableResourceUpserted(_) | StoreEvent::ScalableResourceDeleted { .. } => {}
        }
    }

    /// The machine registered under a provider id, if any.
    pub fn machine_for(&self, id: &NormalizedProviderId) -> Option<MachineRef> {
        self.index
            .read()
            .expect("registry lock")
            .machines
            .get(id)
            .cloned()
    }

    /// The node registered under a provider id, if any.
    pub fn node_for(&self, id: &NormalizedProviderId) -> Option<String> {
        self.index
            .read()
            .expect("registry lock")
            .nodes
            .get(id)
            .cloned()
    }

    pub fn machine_count(&self) -> usize {
        self.index.read().expect("registry lock").machines.len()
    }

    pub fn node_count(&self) -> usize {
        self.index.read().expect("registry lock").nodes.len()
    }

    /// Follow the change feed until shutdown.
    ///
    /// If the receiver falls behind and events are dropped, the index is
    /// rebuilt from a full listing.
    pub async fn run(
        &self,
        store: StateStore,
        mut events: broadcast::Receiver<StoreEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("member registry started");

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(event) => self.apply(&event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "member registry lagged, resyncing");
                        if let Err(e) = self.resync(&store) {
                            tracing::error!(error = %e, "member registry resync failed");
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("change feed closed, member registry stopping");
                        break;
                    }
                },
                _ = shutdown.changed() => {
                    info!("member registry shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use poolgrid_state::{OwnerReference, ScalableKind};

    fn machine(name: &str, provider_id: Option<&str>) -> Machine {
        Machine {
            namespace: "ns".into(),
            name: name.into(),
            provider_id: provider_id.map(String::from),
            failure_message: None,
            owner_references: vec![OwnerReference::new(ScalableKind::MachineSet, "ms")],
            annotations: Default::default(),
            deletion_timestamp: None,
            resource_version: 0,
        }
    }

    fn node(name: &str, provider_id: &str) -> Node {
        Node {
            name: name.into(),
            provider_id: Some(provider_id.into()),
            ..Default::default()
        }
    }

    fn id(s: &str) -> NormalizedProviderId {
        normalized_provider_string(s)
    }

    #[test]
    fn resync_indexes_machines_and_nodes() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_machine(&machine("m-0", Some("test:////i-0"))).unwrap();
        store.put_machine(&machine("m-1", None)).unwrap();
        store.put_node(&node("node-0", "test:////i-0")).unwrap();

        let registry = MemberRegistry::new();
        registry.resync(&store).unwrap();

        assert_eq!(registry.machine_count(), 2);
        assert_eq!(registry.node_count(), 1);
        assert_eq!(
            registry.machine_for(&id("i-0")).unwrap().to_string(),
            "ns/m-0"
        );
        assert_eq!(registry.node_for(&id("aws:///zone/i-0")).unwrap(), "node-0");
        assert_eq!(
            registry.machine_for(&id("failed:ns_m-1")).unwrap().name,
            "m-1"
        );
    }

    #[test]
    fn apply_tracks_provider_id_changes() {
        let registry = MemberRegistry::new();
        registry.apply(&StoreEvent::MachineUpserted(machine("m-0", None)));
        assert!(registry.machine_for(&id("failed:ns_m-0")).is_some());

        registry.apply(&StoreEvent::MachineUpserted(machine("m-0", Some("test:////i-0"))));
        assert!(registry.machine_for(&id("failed:ns_m-0")).is_none());
        assert!(registry.machine_for(&id("i-0")).is_some());

        registry.apply(&StoreEvent::MachineDeleted {
            namespace: "ns".into(),
            name: "m-0".into(),
        });
        assert_eq!(registry.machine_count(), 0);
    }

    #[test]
    fn apply_tracks_node_lifecycle() {
        let registry = MemberRegistry::new();
        registry.apply(&StoreEvent::NodeUpserted(node("node-0", "test:////i-0")));
        registry.apply(&StoreEvent::NodeUpserted(node("node-0", "test:////i-1")));
        assert!(registry.node_for(&id("i-0")).is_none());
        assert_eq!(registry.node_for(&id("i-1")).unwrap(), "node-0");

        registry.apply(&StoreEvent::NodeDeleted { name: "node-0".into() });
        assert_eq!(registry.node_count(), 0);
    }

    #[test]
    fn machine_ref_parse() {
        let r = MachineRef::parse("ns/m-0").unwrap();
        assert_eq!(r.namespace, "ns");
        assert_eq!(r.name, "m-0");
        assert!(MachineRef::parse("m-0").is_none());
        assert!(MachineRef::parse("/m-0").is_none());
    }

    #[tokio::test]
    async fn run_follows_change_feed() {
        let store = StateStore::open_in_memory().unwrap();
        let registry = Arc::new(MemberRegistry::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let events = store.subscribe();
        let task = {
            let registry = Arc::clone(&registry);
            let store = store.clone();
            tokio::spawn(async move { registry.run(store, events, shutdown_rx).await })
        };

        store.put_machine(&machine("m-0", Some("test:////i-0"))).unwrap();

        let mut found = false;
        for _ in 0..50 {
            if registry.machine_for(&id("i-0")).is_some() {
                found = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(found, "registry never observed the machine");

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
    }
}
