//! Runtime event reconciliation.
//!
//! The loop consumes the controller's watch channels and keeps the registry
//! honest about the world. It never mutates registrations itself:
//! `network_down` is the single authoritative teardown path, so ports are
//! not released here, and out-of-band containers are never auto-registered
//! because their port assignments would conflict with the pool.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use atoll_ipfs::{NodeClientError, NodeEvent, NodeStatus};
use atoll_registry::NodeRegistry;

/// Runs until the token is cancelled or the event channel closes.
pub async fn run(
    registry: Arc<NodeRegistry>,
    mut events: mpsc::Receiver<NodeEvent>,
    mut errors: mpsc::Receiver<NodeClientError>,
    token: CancellationToken,
) {
    let mut errors_open = true;
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            event = events.recv() => match event {
                None => break,
                Some(event) => handle_event(&registry, &event).await,
            },
            error = errors.recv(), if errors_open => match error {
                None => errors_open = false,
                Some(e) => error!(error = %e, "runtime watch error"),
            },
        }
    }
    debug!("reconcile loop stopped");
}

async fn handle_event(registry: &NodeRegistry, event: &NodeEvent) {
    let network = &event.node.network_id;
    let registered = registry.get(network).await.is_ok();

    match (event.status, registered) {
        (NodeStatus::Start, true) => {
            debug!(network = %network, "registered node started");
        }
        (NodeStatus::Start, false) => {
            warn!(
                network = %network,
                container = %event.node.container_id,
                "node started out-of-band, not registering"
            );
        }
        (NodeStatus::Die, true) => {
            warn!(
                network = %network,
                container = %event.node.container_id,
                "registered node died, awaiting network down"
            );
        }
        (NodeStatus::Die, false) => {
            debug!(network = %network, "untracked node died");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atoll_registry::{NodeInfo, PortAllocations, PortRange};

    fn allocations() -> PortAllocations {
        PortAllocations {
            swarm: PortRange::new(4001, 4002),
            api: PortRange::new(5001, 5002),
            gateway: PortRange::new(8080, 8081),
        }
    }

    fn die_event(network: &str) -> NodeEvent {
        NodeEvent {
            time: 0,
            status: NodeStatus::Die,
            node: NodeInfo::new(network, ""),
        }
    }

    #[tokio::test]
    async fn test_loop_exits_on_channel_close() {
        let registry = Arc::new(NodeRegistry::new(allocations(), Vec::new()));
        let (event_tx, event_rx) = mpsc::channel(4);
        let (_error_tx, error_rx) = mpsc::channel(1);

        let handle = tokio::spawn(run(
            registry,
            event_rx,
            error_rx,
            CancellationToken::new(),
        ));

        event_tx.send(die_event("ghost")).await.unwrap();
        drop(event_tx);

        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_loop_exits_on_cancellation() {
        let registry = Arc::new(NodeRegistry::new(allocations(), Vec::new()));
        let (_event_tx, event_rx) = mpsc::channel::<NodeEvent>(4);
        let (_error_tx, error_rx) = mpsc::channel(1);

        let token = CancellationToken::new();
        let handle = tokio::spawn(run(registry, event_rx, error_rx, token.clone()));

        token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_events_do_not_mutate_registry() {
        let registry = Arc::new(NodeRegistry::new(allocations(), Vec::new()));
        let mut node = NodeInfo::new("live", "job-1");
        registry.register(&mut node).await.unwrap();

        let (event_tx, event_rx) = mpsc::channel(4);
        let (_error_tx, error_rx) = mpsc::channel(1);
        let handle = tokio::spawn(run(
            Arc::clone(&registry),
            event_rx,
            error_rx,
            CancellationToken::new(),
        ));

        // A death is observed but deregistration stays with network_down;
        // an out-of-band start is never auto-registered.
        event_tx.send(die_event("live")).await.unwrap();
        event_tx
            .send(NodeEvent {
                time: 0,
                status: NodeStatus::Start,
                node: NodeInfo::new("stray", ""),
            })
            .await
            .unwrap();
        drop(event_tx);
        handle.await.unwrap();

        assert!(registry.get("live").await.is_ok());
        assert!(registry.get("stray").await.is_err());
        assert_eq!(registry.available_ports().await, (1, 1, 1));
    }

    #[tokio::test]
    async fn test_error_channel_close_keeps_loop_alive() {
        let registry = Arc::new(NodeRegistry::new(allocations(), Vec::new()));
        let (event_tx, event_rx) = mpsc::channel(4);
        let (error_tx, error_rx) = mpsc::channel(1);

        let handle = tokio::spawn(run(
            registry,
            event_rx,
            error_rx,
            CancellationToken::new(),
        ));

        // Closing only the error channel must not spin or stop the loop.
        drop(error_tx);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        event_tx.send(die_event("ghost")).await.unwrap();
        drop(event_tx);
        handle.await.unwrap();
    }
}
