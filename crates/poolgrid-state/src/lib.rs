//! poolgrid-state — backing store for machine pools.
//!
//! Backed by [redb](https://docs.rs/redb), holds the scalable resources
//! (machine sets and machine deployments), their machines, and the nodes
//! those machines registered as.
//!
//! # Concurrency
//!
//! Every object carries a `resource_version` that is bumped on each
//! write. The scale sub-resource is only ever written through
//! [`StateStore::update_scale`], a compare-and-swap against the version
//! the caller last read; redb serializes write transactions, so the
//! compare and the write are atomic.
//!
//! # Change feed
//!
//! Committed writes are published as [`StoreEvent`]s on a broadcast
//! channel. Subscribers see them asynchronously, so any cache built from
//! the feed is eventually consistent with the tables.

pub mod error;
pub mod labels;
pub mod quantity;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use quantity::*;
pub use store::StateStore;
pub use types::*;
