//! StateStore — redb-backed persistence for pools, machines and nodes.
//!
//! Provides typed CRUD operations plus the two primitives the pool
//! protocol relies on: a scale sub-resource with compare-and-swap updates,
//! and idempotent machine annotation. Values are JSON-serialized into
//! redb's `&[u8]` value columns. The store supports both on-disk and
//! in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::broadcast;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

type JsonTable = TableDefinition<'static, &'static str, &'static [u8]>;

/// Buffered change events per subscriber before it starts lagging.
const EVENT_CAPACITY: usize = 1024;

/// Objects whose writes are guarded by a resource version.
trait Versioned {
    fn resource_version(&self) -> ResourceVersion;
    fn set_resource_version(&mut self, version: ResourceVersion);
}

impl Versioned for ScalableResource {
    fn resource_version(&self) -> ResourceVersion {
        self.resource_version
    }
    fn set_resource_version(&mut self, version: ResourceVersion) {
        self.resource_version = version;
    }
}

impl Versioned for Machine {
    fn resource_version(&self) -> ResourceVersion {
        self.resource_version
    }
    fn set_resource_version(&mut self, version: ResourceVersion) {
        self.resource_version = version;
    }
}

/// Thread-safe backing store.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
    events: broadcast::Sender<StoreEvent>,
}

impl StateStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self::from_database(db)?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self::from_database(db)?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    fn from_database(db: Database) -> StateResult<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let store = Self {
            db: Arc::new(db),
            events,
        };
        store.ensure_tables()?;
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(SCALABLE_RESOURCES).map_err(map_err!(Table))?;
        txn.open_table(MACHINES).map_err(map_err!(Table))?;
        txn.open_table(NODES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Subscribe to the change feed. Only writes committed after this
    /// call are delivered.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: StoreEvent) {
        // No subscribers is not an error.
        let _ = self.events.send(event);
    }

    // ── Generic table access ───────────────────────────────────────

    fn get_json<T: DeserializeOwned>(&self, def: JsonTable, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let value: T =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// List values whose key starts with `prefix` (empty = all).
    fn list_json<T: DeserializeOwned>(&self, def: JsonTable, prefix: &str) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(prefix) {
                let item: T =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(item);
            }
        }
        Ok(results)
    }

    fn remove_key(&self, def: JsonTable, key: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            existed = table.remove(key).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    /// Insert or replace a versioned object. The stored version is one
    /// past whatever was there before, regardless of the caller's value.
    fn upsert<T>(&self, def: JsonTable, key: &str, value: &T) -> StateResult<T>
    where
        T: Versioned + Serialize + DeserializeOwned + Clone,
    {
        let mut stored = value.clone();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            let previous: Option<T> = match table.get(key).map_err(map_err!(Read))? {
                Some(guard) => Some(
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?,
                ),
                None => None,
            };
            let version = previous.map(|p| p.resource_version()).unwrap_or(0) + 1;
            stored.set_resource_version(version);
            let bytes = serde_json::to_vec(&stored).map_err(map_err!(Serialize))?;
            table
                .insert(key, bytes.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(stored)
    }

    /// Read-modify-write a single object inside one write transaction.
    ///
    /// `f` returns `Ok(true)` to commit its change, `Ok(false)` to leave
    /// the object untouched, or an error to abort. Returns the committed
    /// object, or `None` when nothing was written.
    fn modify<T, F>(&self, def: JsonTable, key: &str, f: F) -> StateResult<Option<T>>
    where
        T: Versioned + Serialize + DeserializeOwned,
        F: FnOnce(&mut T) -> StateResult<bool>,
    {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let outcome = {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            let current: Option<T> = match table.get(key).map_err(map_err!(Read))? {
                Some(guard) => Some(
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?,
                ),
                None => None,
            };
            match current {
                None => Err(StateError::NotFound(key.to_string())),
                Some(mut obj) => match f(&mut obj) {
                    Ok(true) => {
                        obj.set_resource_version(obj.resource_version() + 1);
                        let bytes = serde_json::to_vec(&obj).map_err(map_err!(Serialize))?;
                        table
                            .insert(key, bytes.as_slice())
                            .map_err(map_err!(Write))?;
                        Ok(Some(obj))
                    }
                    Ok(false) => Ok(None),
                    Err(e) => Err(e),
                },
            }
        };

        match outcome {
            Ok(Some(obj)) => {
                txn.commit().map_err(map_err!(Transaction))?;
                Ok(Some(obj))
            }
            other => {
                txn.abort().map_err(map_err!(Transaction))?;
                other
            }
        }
    }

    // ── Scalable resources ─────────────────────────────────────────

    /// Insert or replace a machine set / machine deployment.
    pub fn put_scalable_resource(
        &self,
        resource: &ScalableResource,
    ) -> StateResult<ScalableResource> {
        let key = resource.table_key();
        let stored = self.upsert(SCALABLE_RESOURCES, &key, resource)?;
        debug!(%key, version = stored.resource_version, "scalable resource stored");
        self.publish(StoreEvent::ScalableResourceUpserted(stored.clone()));
        Ok(stored)
    }

    pub fn get_scalable_resource(
        &self,
        kind: ScalableKind,
        namespace: &str,
        name: &str,
    ) -> StateResult<Option<ScalableResource>> {
        self.get_json(SCALABLE_RESOURCES, &scalable_key(kind, namespace, name))
    }

    /// List all machine sets and machine deployments.
    pub fn list_scalable_resources(&self) -> StateResult<Vec<ScalableResource>> {
        self.list_json(SCALABLE_RESOURCES, "")
    }

    /// Delete a scalable resource. Returns true if it existed.
    pub fn delete_scalable_resource(
        &self,
        kind: ScalableKind,
        namespace: &str,
        name: &str,
    ) -> StateResult<bool> {
        let key = scalable_key(kind, namespace, name);
        let existed = self.remove_key(SCALABLE_RESOURCES, &key)?;
        if existed {
            self.publish(StoreEvent::ScalableResourceDeleted { key: key.clone() });
        }
        debug!(%key, existed, "scalable resource deleted");
        Ok(existed)
    }

    // ── Scale sub-resource ─────────────────────────────────────────

    /// Read the replica count and the version it was read at.
    pub fn get_scale(&self, kind: ScalableKind, namespace: &str, name: &str) -> StateResult<Scale> {
        let resource = self
            .get_scalable_resource(kind, namespace, name)?
            .ok_or_else(|| StateError::NotFound(scalable_key(kind, namespace, name)))?;
        Ok(Scale {
            replicas: resource.replicas(),
            resource_version: resource.resource_version,
        })
    }

    /// Write a new replica count if the resource is still at
    /// `expected_version`; otherwise fail with [`StateError::Conflict`]
    /// and write nothing.
    pub fn update_scale(
        &self,
        kind: ScalableKind,
        namespace: &str,
        name: &str,
        replicas: i32,
        expected_version: ResourceVersion,
    ) -> StateResult<Scale> {
        let key = scalable_key(kind, namespace, name);
        let updated = self.modify(SCALABLE_RESOURCES, &key, |r: &mut ScalableResource| {
            if r.resource_version != expected_version {
                return Err(StateError::Conflict {
                    key: key.clone(),
                    expected: expected_version,
                    actual: r.resource_version,
                });
            }
            r.spec_replicas = Some(replicas);
            Ok(true)
        })?;

        // modify() only returns None when the closure declines to write.
        let resource = updated.ok_or_else(|| StateError::NotFound(key.clone()))?;
        debug!(%key, replicas, version = resource.resource_version, "scale updated");
        let scale = Scale {
            replicas: resource.replicas(),
            resource_version: resource.resource_version,
        };
        self.publish(StoreEvent::ScalableResourceUpserted(resource));
        Ok(scale)
    }

    // ── Machines ───────────────────────────────────────────────────

    /// Insert or replace a machine.
    pub fn put_machine(&self, machine: &Machine) -> StateResult<Machine> {
        let key = machine.table_key();
        let stored = self.upsert(MACHINES, &key, machine)?;
        debug!(%key, version = stored.resource_version, "machine stored");
        self.publish(StoreEvent::MachineUpserted(stored.clone()));
        Ok(stored)
    }

    pub fn get_machine(&self, namespace: &str, name: &str) -> StateResult<Option<Machine>> {
        self.get_json(MACHINES, &machine_key(namespace, name))
    }

    /// List all machines.
    pub fn list_machines(&self) -> StateResult<Vec<Machine>> {
        self.list_json(MACHINES, "")
    }

    /// List the machines in one namespace (by key prefix scan).
    pub fn list_machines_in_namespace(&self, namespace: &str) -> StateResult<Vec<Machine>> {
        self.list_json(MACHINES, &format!("{namespace}/"))
    }

    /// List the machines that belong to a scalable resource.
    ///
    /// Machine sets own machines directly; machine deployments own
    /// machine sets, which own the machines.
    pub fn list_members(
        &self,
        kind: ScalableKind,
        namespace: &str,
        name: &str,
    ) -> StateResult<Vec<Machine>> {
        let owning_sets: Vec<String> = match kind {
            ScalableKind::MachineSet => vec![name.to_string()],
            ScalableKind::MachineDeployment => self
                .list_scalable_resources()?
                .into_iter()
                .filter(|r| {
                    r.kind == ScalableKind::MachineSet
                        && r.namespace == namespace
                        && r
                            .owner(ScalableKind::MachineDeployment)
                            .is_some_and(|o| o.name == name)
                })
                .map(|r| r.name)
                .collect(),
        };

        let members = self
            .list_machines_in_namespace(namespace)?
            .into_iter()
            .filter(|m| {
                m.owner(ScalableKind::MachineSet)
                    .is_some_and(|o| owning_sets.contains(&o.name))
            })
            .collect();
        Ok(members)
    }

    /// Set an annotation on a machine unless it is already present.
    ///
    /// Returns true if the machine was changed; re-annotating is a no-op.
    pub fn annotate_machine(
        &self,
        namespace: &str,
        name: &str,
        annotation: &str,
        value: &str,
    ) -> StateResult<bool> {
        let key = machine_key(namespace, name);
        let updated = self.modify(MACHINES, &key, |m: &mut Machine| {
            if m.annotations.contains_key(annotation) {
                return Ok(false);
            }
            m.annotations
                .insert(annotation.to_string(), value.to_string());
            Ok(true)
        })?;
        Ok(self.publish_machine(updated))
    }

    /// Mark a machine for removal by an external reconciler.
    ///
    /// The annotation value is the current unix time. Idempotent.
    pub fn annotate_for_deletion(
        &self,
        namespace: &str,
        name: &str,
        annotation: &str,
    ) -> StateResult<bool> {
        let now = epoch_secs().to_string();
        let changed = self.annotate_machine(namespace, name, annotation, &now)?;
        debug!(namespace, name, changed, "machine annotated for deletion");
        Ok(changed)
    }

    /// Remove an annotation from a machine. Returns true if it was present.
    pub fn remove_machine_annotation(
        &self,
        namespace: &str,
        name: &str,
        annotation: &str,
    ) -> StateResult<bool> {
        let key = machine_key(namespace, name);
        let updated = self.modify(MACHINES, &key, |m: &mut Machine| {
            Ok(m.annotations.remove(annotation).is_some())
        })?;
        Ok(self.publish_machine(updated))
    }

    /// Record that deletion of a machine has begun. The first timestamp wins.
    pub fn set_deletion_timestamp(
        &self,
        namespace: &str,
        name: &str,
        timestamp: u64,
    ) -> StateResult<bool> {
        let key = machine_key(namespace, name);
        let updated = self.modify(MACHINES, &key, |m: &mut Machine| {
            if m.deletion_timestamp.is_some() {
                return Ok(false);
            }
            m.deletion_timestamp = Some(timestamp);
            Ok(true)
        })?;
        Ok(self.publish_machine(updated))
    }

    /// Delete a machine. Returns true if it existed.
    pub fn delete_machine(&self, namespace: &str, name: &str) -> StateResult<bool> {
        let existed = self.remove_key(MACHINES, &machine_key(namespace, name))?;
        if existed {
            self.publish(StoreEvent::MachineDeleted {
                namespace: namespace.to_string(),
                name: name.to_string(),
            });
        }
        debug!(namespace, name, existed, "machine deleted");
        Ok(existed)
    }

    fn publish_machine(&self, updated: Option<Machine>) -> bool {
        match updated {
            Some(machine) => {
                self.publish(StoreEvent::MachineUpserted(machine));
                true
            }
            None => false,
        }
    }

    // ── Nodes ──────────────────────────────────────────────────────

    /// Insert or update a node.
    pub fn put_node(&self, node: &Node) -> StateResult<()> {
        let value = serde_json::to_vec(node).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(NODES).map_err(map_err!(Table))?;
            table
                .insert(node.name.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        self.publish(StoreEvent::NodeUpserted(node.clone()));
        Ok(())
    }

    /// Get a node by name.
    pub fn get_node(&self, name: &str) -> StateResult<Option<Node>> {
        self.get_json(NODES, name)
    }

    /// List all nodes.
    pub fn list_nodes(&self) -> StateResult<Vec<Node>> {
        self.list_json(NODES, "")
    }

    /// Delete a node by name. Returns true if it existed.
    pub fn delete_node(&self, name: &str) -> StateResult<bool> {
        let existed = self.remove_key(NODES, name)?;
        if existed {
            self.publish(StoreEvent::NodeDeleted {
                name: name.to_string(),
            });
        }
        Ok(existed)
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
