//! Node group error types.

use thiserror::Error;

use poolgrid_state::StateError;

/// Errors returned by node group operations.
#[derive(Debug, Error)]
pub enum NodeGroupError {
    /// The caller asked for something the group's bounds or inputs forbid.
    #[error("{0}")]
    InvalidArgument(String),

    /// The scale write lost a race with another writer. Nothing was
    /// written; the caller may retry.
    #[error("conflicting scale update: {0}")]
    Conflict(String),

    #[error("node {node:?} doesn't belong to node group {node_group:?}")]
    NotOwned { node: String, node_group: String },

    #[error("not implemented")]
    NotImplemented,

    #[error("node group already exists")]
    AlreadyExists,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("backing store error: {0}")]
    BackingStore(StateError),
}

impl From<StateError> for NodeGroupError {
    fn from(e: StateError) -> Self {
        match e {
            StateError::Conflict { .. } => NodeGroupError::Conflict(e.to_string()),
            other => NodeGroupError::BackingStore(other),
        }
    }
}

pub type NodeGroupResult<T> = Result<T, NodeGroupError>;
