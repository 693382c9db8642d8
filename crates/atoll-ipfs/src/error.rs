//! Error types for node lifecycle operations.

use thiserror::Error;

/// Result type for node client operations.
pub type Result<T> = std::result::Result<T, NodeClientError>;

/// Errors that can occur while controlling IPFS node containers.
///
/// Runtime faults are passed through verbatim; the caller decides whether
/// to retry. Postconditions are only guaranteed on success.
#[derive(Debug, Error)]
pub enum NodeClientError {
    /// The node or options fail the create preconditions.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The runtime accepted the create call but reported warnings.
    #[error("node create rejected: {0}")]
    CreateRejected(String),

    /// An in-container command exited non-zero.
    #[error("exec failed in container {container_id}: {reason}")]
    ExecFailed {
        /// The container the command ran in.
        container_id: String,
        /// Exit status or stream error.
        reason: String,
    },

    /// The log stream ended before the daemon announced readiness.
    #[error("container {0} log stream ended before daemon became ready")]
    StreamEnded(String),

    /// The caller cancelled the operation.
    #[error("cancelled while waiting for container {0}")]
    Cancelled(String),

    /// Docker API error, surfaced unchanged.
    #[error("docker: {0}")]
    Docker(#[from] bollard::errors::Error),

    /// Filesystem error while preparing or reclaiming node data.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl NodeClientError {
    /// Creates an invalid-configuration error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig(reason.into())
    }

    /// Creates an exec-failed error.
    pub fn exec_failed(container_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ExecFailed {
            container_id: container_id.into(),
            reason: reason.into(),
        }
    }
}
