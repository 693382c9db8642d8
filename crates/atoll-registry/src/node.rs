//! Node identity and the container-label round trip.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::RegistryError;

/// Prefix of every container name managed by this system.
pub const CONTAINER_NAME_PREFIX: &str = "ipfs-";

/// Container label keys. Together with the container id and first name they
/// are sufficient to reconstruct a [`NodeInfo`], and they are the persisted
/// contract between restarts.
pub mod labels {
    pub const NETWORK_ID: &str = "network_id";
    pub const DATA_DIR: &str = "data_dir";
    pub const SWARM_PORT: &str = "swarm_port";
    pub const API_PORT: &str = "api_port";
    pub const GATEWAY_PORT: &str = "gateway_port";
    pub const BOOTSTRAP_PEERS: &str = "bootstrap_peers";
    pub const JOB_ID: &str = "job_id";
}

/// Host-side ports assigned to a node.
///
/// The swarm port is bound on all interfaces; api and gateway are bound to
/// loopback only. Ports are carried as strings because that is how they
/// travel through container labels and port bindings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodePorts {
    /// Public peer-transport port (container 4001).
    pub swarm: String,

    /// Loopback-only RPC port (container 5001).
    pub api: String,

    /// Loopback-only gateway port (container 8080).
    pub gateway: String,
}

/// Identity of a live or pending IPFS node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Unique network name; primary key in the registry.
    pub network_id: String,

    /// Opaque per-operation identifier, for trace correlation only.
    pub job_id: String,

    /// Host ports assigned from the pool.
    pub ports: NodePorts,

    /// Container id, empty until the runtime accepts the create call.
    pub container_id: String,

    /// Derived container name, `ipfs-<network_id>`.
    pub container_name: String,

    /// Per-network data directory on the host.
    pub data_dir: PathBuf,

    /// Initial dial addresses seeded into the node at bring-up.
    pub bootstrap_peers: Vec<String>,
}

impl NodeInfo {
    /// Creates a pending node for a network. Ports, container id, and data
    /// dir are filled in by the registry and the container controller.
    pub fn new(network_id: impl Into<String>, job_id: impl Into<String>) -> Self {
        Self {
            network_id: network_id.into(),
            job_id: job_id.into(),
            ..Self::default()
        }
    }

    /// The container name derived from a network id.
    pub fn container_name_for(network_id: &str) -> String {
        format!("{}{}", CONTAINER_NAME_PREFIX, network_id)
    }

    /// Encodes this node into the persisted container-label contract.
    pub fn to_labels(&self) -> HashMap<String, String> {
        let peers = serde_json::to_string(&self.bootstrap_peers).unwrap_or_else(|_| "[]".into());
        HashMap::from([
            (labels::NETWORK_ID.to_string(), self.network_id.clone()),
            (
                labels::DATA_DIR.to_string(),
                self.data_dir.to_string_lossy().into_owned(),
            ),
            (labels::SWARM_PORT.to_string(), self.ports.swarm.clone()),
            (labels::API_PORT.to_string(), self.ports.api.clone()),
            (labels::GATEWAY_PORT.to_string(), self.ports.gateway.clone()),
            (labels::BOOTSTRAP_PEERS.to_string(), peers),
            (labels::JOB_ID.to_string(), self.job_id.clone()),
        ])
    }

    /// Rebuilds a node from a container's id, first name, and labels.
    ///
    /// Containers without our label set are not ours; callers are expected
    /// to skip them on error.
    pub fn from_labels(
        container_id: &str,
        container_name: &str,
        labels: &HashMap<String, String>,
    ) -> Result<Self, RegistryError> {
        let required = |key: &str| {
            labels
                .get(key)
                .filter(|v| !v.is_empty())
                .cloned()
                .ok_or_else(|| RegistryError::invalid_node(format!("missing label '{key}'")))
        };

        let bootstrap_peers = match labels.get(labels::BOOTSTRAP_PEERS) {
            Some(raw) if !raw.is_empty() => serde_json::from_str::<Option<Vec<String>>>(raw)
                .map_err(|e| RegistryError::invalid_node(format!("bad bootstrap_peers label: {e}")))?
                .unwrap_or_default(),
            _ => Vec::new(),
        };

        Ok(Self {
            network_id: required(labels::NETWORK_ID)?,
            job_id: labels.get(labels::JOB_ID).cloned().unwrap_or_default(),
            ports: NodePorts {
                swarm: required(labels::SWARM_PORT)?,
                api: required(labels::API_PORT)?,
                gateway: required(labels::GATEWAY_PORT)?,
            },
            container_id: container_id.to_string(),
            container_name: container_name.trim_start_matches('/').to_string(),
            data_dir: PathBuf::from(required(labels::DATA_DIR)?),
            bootstrap_peers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_node() -> NodeInfo {
        NodeInfo {
            network_id: "testnet".to_string(),
            job_id: "job-1".to_string(),
            ports: NodePorts {
                swarm: "4001".to_string(),
                api: "5001".to_string(),
                gateway: "8080".to_string(),
            },
            container_id: "abc123def456".to_string(),
            container_name: "ipfs-testnet".to_string(),
            data_dir: PathBuf::from("/var/lib/atoll/data/ipfs/testnet"),
            bootstrap_peers: vec!["/ip4/10.0.0.1/tcp/4001/ipfs/Qm1".to_string()],
        }
    }

    #[test]
    fn test_label_round_trip() {
        let node = sample_node();
        let labels = node.to_labels();

        let rebuilt =
            NodeInfo::from_labels(&node.container_id, &node.container_name, &labels).unwrap();
        assert_eq!(rebuilt, node);
    }

    #[test]
    fn test_label_round_trip_no_peers() {
        let mut node = sample_node();
        node.bootstrap_peers.clear();

        let rebuilt =
            NodeInfo::from_labels(&node.container_id, &node.container_name, &node.to_labels())
                .unwrap();
        assert_eq!(rebuilt, node);
    }

    #[test]
    fn test_from_labels_rejects_foreign_containers() {
        let labels = HashMap::from([("com.example.vendor".to_string(), "acme".to_string())]);
        assert!(NodeInfo::from_labels("id", "name", &labels).is_err());
    }

    #[test]
    fn test_from_labels_null_peers() {
        let mut map = sample_node().to_labels();
        map.insert(labels::BOOTSTRAP_PEERS.to_string(), "null".to_string());

        let node = NodeInfo::from_labels("id", "name", &map).unwrap();
        assert!(node.bootstrap_peers.is_empty());
    }

    #[test]
    fn test_from_labels_trims_leading_slash() {
        // Docker reports names as "/ipfs-testnet".
        let node = sample_node();
        let rebuilt =
            NodeInfo::from_labels(&node.container_id, "/ipfs-testnet", &node.to_labels()).unwrap();
        assert_eq!(rebuilt.container_name, "ipfs-testnet");
    }

    #[test]
    fn test_container_name_for() {
        assert_eq!(NodeInfo::container_name_for("testnet"), "ipfs-testnet");
    }
}
