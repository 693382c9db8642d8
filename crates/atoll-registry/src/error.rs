//! Error types for registry operations.

use thiserror::Error;

/// Result type for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Errors that can occur while mutating or querying the node registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A node with this network id is already registered.
    #[error("network '{0}' is already registered")]
    DuplicateNetwork(String),

    /// No node is registered for this network id.
    #[error("network '{0}' not found in registry")]
    NotFound(String),

    /// One of the port sub-pools has no free ports left.
    #[error("port range '{pool}' is exhausted")]
    PortExhausted {
        /// The sub-pool that ran dry.
        pool: &'static str,
    },

    /// The node record is not usable (empty network id, unparseable port).
    #[error("invalid node: {0}")]
    InvalidNode(String),
}

impl RegistryError {
    /// Creates an invalid-node error.
    pub fn invalid_node(reason: impl Into<String>) -> Self {
        Self::InvalidNode(reason.into())
    }
}
