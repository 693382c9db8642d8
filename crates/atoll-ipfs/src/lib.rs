//! IPFS node lifecycle control on the Docker runtime.
//!
//! This crate supervises one container per tenant network. It knows how to
//! bring a private-swarm IPFS daemon up (key material, port bindings,
//! readiness, peer seeding), tear it down with resource reclamation, and
//! stream the runtime's start/die events back to the reconciler.
//!
//! The capability set is deliberately narrow ([`NodeClient`] has four
//! operations) so the orchestrator can run against [`DockerClient`] in
//! production and a mock in tests.

pub mod client;
pub mod error;
pub mod events;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
mod ready;

pub use client::{DockerClient, NodeClient, NodeOpts};
pub use error::{NodeClientError, Result};
pub use events::{NodeEvent, NodeStatus};
