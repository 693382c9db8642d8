//! Network lifecycle orchestration.
//!
//! The orchestrator composes the node registry, the container controller,
//! and the network database into two operator-facing operations:
//! `network_up` and `network_down`. It also runs the reconciliation loop
//! that keeps the registry consistent with runtime events.

pub mod error;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod orchestrator;
pub mod reconcile;
pub mod store;

pub use error::{OrchestratorError, Result};
pub use orchestrator::Orchestrator;
pub use store::{NetworkRecord, NetworkStore, PgNetworkStore, StoreError};
