//! Node identity and resource accounting for hosted IPFS networks.
//!
//! This crate is the single in-process source of truth for live networks.
//! It provides:
//!
//! - [`NodeInfo`]: the identity of a live or pending IPFS node, including the
//!   container-label round trip used to rebuild state from a running Docker
//!   daemon.
//! - [`PortPool`]: three disjoint host-port free lists (swarm, api, gateway)
//!   with deterministic lowest-first allocation.
//! - [`NodeRegistry`]: the concurrent map of `network_id -> NodeInfo` that
//!   owns the port pool. Registration and port accounting happen as a single
//!   linearizable transition.
//!
//! The registry makes no durability claims. On process start it is rebuilt
//! by seeding from the container runtime's view of the world (see
//! [`NodeRegistry::new`]).

pub mod error;
pub mod node;
pub mod ports;
pub mod registry;

pub use error::{RegistryError, Result};
pub use node::{NodeInfo, NodePorts};
pub use ports::{PortAllocations, PortPool, PortRange};
pub use registry::NodeRegistry;
