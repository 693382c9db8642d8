//! Error types for orchestration operations.

use thiserror::Error;

use crate::store::StoreError;

/// Result type for orchestration operations.
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Errors that can occur while bringing networks up or down.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The network name is empty.
    #[error("invalid network name provided")]
    InvalidNetworkName,

    /// The database has no record for this network.
    #[error("no network named '{0}' found")]
    NetworkNotFound(String),

    /// The database record is missing its swarm key.
    #[error("network '{0}' has no swarm key configured")]
    MissingSwarmKey(String),

    /// Registry failure (duplicate network, exhausted ports).
    #[error(transparent)]
    Registry(#[from] atoll_registry::RegistryError),

    /// Container runtime failure, surfaced unchanged.
    #[error(transparent)]
    Node(#[from] atoll_ipfs::NodeClientError),

    /// Database failure, surfaced unchanged.
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for OrchestratorError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(name) => Self::NetworkNotFound(name),
            other => Self::Store(other),
        }
    }
}
