//! poolgrid-nodegroupset — which node groups are interchangeable.
//!
//! The autoscaler balances scale-ups across node groups that would give
//! a pod the same home. This crate decides that sameness:
//!
//! - **`comparator`** — pairwise node similarity with configurable
//!   tolerances
//! - **`grouping`** — similar-group lookup and partitioning over
//!   representative nodes

pub mod comparator;
pub mod grouping;

pub use comparator::{ComparatorConfig, IGNORED_LABELS, is_node_info_similar};
pub use grouping::{GroupSample, find_similar_node_groups, similarity_classes};
