//! poolgrid-nodegroup — autoscaler node groups over machine sets and
//! machine deployments.
//!
//! A node group is a scalable resource whose size the autoscaler may
//! change within bounds read from annotations. The crate provides:
//!
//! - [`MachineController`]: discovers node groups and resolves nodes and
//!   provider ids to the machines and groups behind them.
//! - [`NodeGroup`]: the per-group handle with the resize, targeted
//!   delete and scale-from-zero template operations.
//! - [`MemberRegistry`]: the in-memory provider id index that follows
//!   the store's change feed.
//!
//! # Resize protocol
//!
//! ```text
//! increase_size(d):        d > 0, target + d <= max       → CAS target + d
//! decrease_target_size(d): d < 0, target + d >= members   → CAS target + d
//! delete_nodes(nodes):     all owned by this group
//!                          skip machines already deleting
//!                          target - n >= min
//!                          annotate each → CAS target - n (unannotate on failure)
//! ```
//!
//! Every write to the replica count is conditional on the version it was
//! read at, so two autoscalers racing on the same group cannot both win.

pub mod annotations;
pub mod controller;
mod delete;
pub mod error;
pub mod nodegroup;
pub mod provider_id;
pub mod registry;
mod resize;
pub mod template;

pub use annotations::{AnnotationKeys, DEFAULT_API_GROUP};
pub use controller::MachineController;
pub use error::{NodeGroupError, NodeGroupResult};
pub use nodegroup::{Instance, InstanceState, NodeGroup};
pub use provider_id::{NormalizedProviderId, ProviderId, normalized_provider_string};
pub use registry::{MachineRef, MemberRegistry};
