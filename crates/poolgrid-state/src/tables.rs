//! redb table definitions for the PoolGrid backing store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).

use redb::TableDefinition;

/// Machine sets and machine deployments keyed by `{kind}/{namespace}/{name}`.
pub const SCALABLE_RESOURCES: TableDefinition<&str, &[u8]> =
    TableDefinition::new("scalable_resources");

/// Machines keyed by `{namespace}/{name}`.
pub const MACHINES: TableDefinition<&str, &[u8]> = TableDefinition::new("machines");

/// Nodes keyed by node name.
pub const NODES: TableDefinition<&str, &[u8]> = TableDefinition::new("nodes");
