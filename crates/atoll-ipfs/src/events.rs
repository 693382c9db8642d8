//! Node-related container events.

use atoll_registry::NodeInfo;
use bollard::models::EventMessage;

/// What happened to a node container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    /// The container started.
    Start,

    /// The container exited.
    Die,
}

impl NodeStatus {
    fn from_action(action: &str) -> Option<Self> {
        match action {
            "start" => Some(Self::Start),
            "die" => Some(Self::Die),
            _ => None,
        }
    }
}

/// A node lifecycle event observed on the runtime.
#[derive(Debug, Clone)]
pub struct NodeEvent {
    /// Unix timestamp reported by the runtime.
    pub time: i64,

    /// Start or die.
    pub status: NodeStatus,

    /// The node, rebuilt from the event actor's labels.
    pub node: NodeInfo,
}

impl NodeEvent {
    /// Rebuilds a node event from a raw runtime event.
    ///
    /// Returns `None` for events that are not ours: unknown actions, or
    /// actors whose attributes do not carry our label set. Such events are
    /// dropped, not reported.
    pub fn from_message(message: &EventMessage) -> Option<Self> {
        let status = NodeStatus::from_action(message.action.as_deref()?)?;
        let actor = message.actor.as_ref()?;
        let attributes = actor.attributes.as_ref()?;

        // Docker attaches the container's labels, plus its name, to the
        // event actor; that is enough to reconstruct the node.
        let id = actor.id.as_deref().unwrap_or_default();
        let short_id = if id.len() > 12 { &id[..12] } else { id };
        let name = attributes.get("name").map(String::as_str).unwrap_or(short_id);

        let node = NodeInfo::from_labels(short_id, name, attributes).ok()?;
        Some(Self {
            time: message.time.unwrap_or_default(),
            status,
            node,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bollard::models::EventActor;
    use std::collections::HashMap;

    fn message(action: &str, attributes: HashMap<String, String>) -> EventMessage {
        EventMessage {
            action: Some(action.to_string()),
            actor: Some(EventActor {
                id: Some("0123456789abcdef".to_string()),
                attributes: Some(attributes),
                ..Default::default()
            }),
            time: Some(1_700_000_000),
            ..Default::default()
        }
    }

    fn node_attributes() -> HashMap<String, String> {
        let node = NodeInfo {
            network_id: "testnet".to_string(),
            ports: atoll_registry::NodePorts {
                swarm: "4001".to_string(),
                api: "5001".to_string(),
                gateway: "8080".to_string(),
            },
            data_dir: "/var/lib/atoll/data/ipfs/testnet".into(),
            ..NodeInfo::default()
        };
        let mut attributes = node.to_labels();
        attributes.insert("name".to_string(), "ipfs-testnet".to_string());
        attributes
    }

    #[test]
    fn test_event_from_message() {
        let event = NodeEvent::from_message(&message("die", node_attributes())).unwrap();
        assert_eq!(event.status, NodeStatus::Die);
        assert_eq!(event.node.network_id, "testnet");
        assert_eq!(event.node.container_id, "0123456789ab");
        assert_eq!(event.node.container_name, "ipfs-testnet");
        assert_eq!(event.time, 1_700_000_000);
    }

    #[test]
    fn test_event_unknown_action_dropped() {
        assert!(NodeEvent::from_message(&message("pause", node_attributes())).is_none());
    }

    #[test]
    fn test_event_foreign_container_dropped() {
        let attributes = HashMap::from([("name".to_string(), "postgres".to_string())]);
        assert!(NodeEvent::from_message(&message("die", attributes)).is_none());
    }
}
