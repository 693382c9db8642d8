//! The in-process registry of live networks.

use std::collections::HashMap;

use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{RegistryError, Result};
use crate::node::{NodeInfo, NodePorts};
use crate::ports::{PortAllocations, PortPool};

/// Registry of `network_id -> NodeInfo`, owning the port pool.
///
/// The node map and the pool live behind one lock, so a registration and its
/// port accounting are a single linearizable transition. Readers take the
/// lock briefly and clone; there are no ad-hoc side locks.
pub struct NodeRegistry {
    inner: RwLock<Inner>,
}

struct Inner {
    nodes: HashMap<String, NodeInfo>,
    pool: PortPool,
}

impl NodeRegistry {
    /// Builds a registry seeded from externally observed nodes.
    ///
    /// Each seed's ports are marked in-use before any allocation can occur,
    /// so restarts preserve the disjointness invariant. Seeds with an empty
    /// network id, unparseable ports, or a duplicate network id are skipped
    /// with a warning; they are not ours to manage.
    pub fn new(allocations: PortAllocations, seeds: Vec<NodeInfo>) -> Self {
        let mut nodes = HashMap::new();
        let mut pool = PortPool::new(allocations);

        for node in seeds {
            let (swarm, api, gateway) = match parse_ports(&node.ports) {
                Ok(p) => p,
                Err(e) => {
                    warn!(network = %node.network_id, error = %e, "skipping seed node");
                    continue;
                }
            };
            if node.network_id.is_empty() {
                warn!(container = %node.container_id, "skipping seed node without network id");
                continue;
            }
            if nodes.contains_key(&node.network_id) {
                warn!(network = %node.network_id, "skipping duplicate seed node");
                continue;
            }

            pool.mark_in_use(swarm, api, gateway);
            debug!(network = %node.network_id, swarm, api, gateway, "seeded node");
            nodes.insert(node.network_id.clone(), node);
        }

        Self {
            inner: RwLock::new(Inner { nodes, pool }),
        }
    }

    /// Registers a pending node, assigning its ports from the pool and
    /// writing them back into `node`.
    pub async fn register(&self, node: &mut NodeInfo) -> Result<()> {
        if node.network_id.is_empty() {
            return Err(RegistryError::invalid_node("empty network id"));
        }

        let mut inner = self.inner.write().await;
        if inner.nodes.contains_key(&node.network_id) {
            return Err(RegistryError::DuplicateNetwork(node.network_id.clone()));
        }

        let (swarm, api, gateway) = inner.pool.assign()?;
        node.ports = NodePorts {
            swarm: swarm.to_string(),
            api: api.to_string(),
            gateway: gateway.to_string(),
        };

        debug!(network = %node.network_id, swarm, api, gateway, "registered node");
        inner.nodes.insert(node.network_id.clone(), node.clone());
        Ok(())
    }

    /// Removes a node and returns its ports to the pool.
    pub async fn deregister(&self, network_id: &str) -> Result<NodeInfo> {
        let mut inner = self.inner.write().await;
        let node = inner
            .nodes
            .remove(network_id)
            .ok_or_else(|| RegistryError::NotFound(network_id.to_string()))?;

        // Registered nodes always carry parseable ports; seeds were vetted
        // on construction.
        if let Ok((swarm, api, gateway)) = parse_ports(&node.ports) {
            inner.pool.release(swarm, api, gateway);
        }

        debug!(network = %network_id, "deregistered node");
        Ok(node)
    }

    /// Returns a copy of the registered node for a network.
    pub async fn get(&self, network_id: &str) -> Result<NodeInfo> {
        self.inner
            .read()
            .await
            .nodes
            .get(network_id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(network_id.to_string()))
    }

    /// Returns copies of all registered nodes.
    pub async fn list(&self) -> Vec<NodeInfo> {
        self.inner.read().await.nodes.values().cloned().collect()
    }

    /// Free port counts per sub-pool, in (swarm, api, gateway) order.
    pub async fn available_ports(&self) -> (usize, usize, usize) {
        self.inner.read().await.pool.available()
    }
}

fn parse_ports(ports: &NodePorts) -> Result<(u16, u16, u16)> {
    let parse = |label: &str, value: &str| {
        value
            .parse::<u16>()
            .map_err(|_| RegistryError::invalid_node(format!("bad {label} port '{value}'")))
    };
    Ok((
        parse("swarm", &ports.swarm)?,
        parse("api", &ports.api)?,
        parse("gateway", &ports.gateway)?,
    ))
}
