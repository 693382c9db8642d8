//! Request delegation for hosted IPFS networks.
//!
//! The delegator is the HTTP front end: it resolves an incoming
//! `(network, feature)` pair against the node registry and reverse-proxies
//! the request to the container-internal endpoint behind the node's host
//! port. Proxies are cached per `(network, feature)` with TTL eviction so
//! steady traffic reuses a forwarder while churned networks age out.

pub mod auth;
pub mod cache;
pub mod engine;
pub mod error;
pub mod proxy;

pub use auth::AccessChecker;
pub use cache::ProxyCache;
pub use engine::{Engine, ServerOptions};
pub use error::{EngineError, Result};
pub use proxy::ReverseProxy;
