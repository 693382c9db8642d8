//! Test double for the node client.
//!
//! `MockNodeClient` reproduces the observable contract of the Docker
//! implementation: create fills in container identity, stop records the
//! reaped node, and watch yields whatever the test emits.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use atoll_registry::NodeInfo;

use crate::client::{NodeClient, NodeOpts};
use crate::error::{NodeClientError, Result};
use crate::events::NodeEvent;

/// In-memory [`NodeClient`] recording every call.
#[derive(Default)]
pub struct MockNodeClient {
    /// Nodes returned by `nodes()`.
    pub seed_nodes: Mutex<Vec<NodeInfo>>,

    /// Recorded `create_node` calls (node state after the call, opts).
    pub created: Mutex<Vec<(NodeInfo, NodeOpts)>>,

    /// Recorded `stop_node` calls.
    pub stopped: Mutex<Vec<NodeInfo>>,

    /// When set, `create_node` fails with this message.
    pub fail_create: Mutex<Option<String>>,

    /// When set, `stop_node` fails with this message.
    pub fail_stop: Mutex<Option<String>>,

    event_tx: Arc<Mutex<Option<mpsc::Sender<NodeEvent>>>>,
    error_tx: Arc<Mutex<Option<mpsc::Sender<NodeClientError>>>>,
}

impl MockNodeClient {
    /// Creates an empty mock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a mock whose `nodes()` returns the given seeds.
    pub fn with_nodes(seed_nodes: Vec<NodeInfo>) -> Self {
        Self {
            seed_nodes: Mutex::new(seed_nodes),
            ..Self::default()
        }
    }

    /// Emits an event to the most recent `watch` subscriber.
    pub async fn emit(&self, event: NodeEvent) {
        let tx = self
            .event_tx
            .lock()
            .unwrap()
            .clone()
            .expect("watch was not called");
        tx.send(event).await.expect("watch receiver dropped");
    }

    /// Emits a runtime error to the most recent `watch` subscriber.
    pub async fn emit_error(&self, error: NodeClientError) {
        let tx = self
            .error_tx
            .lock()
            .unwrap()
            .clone()
            .expect("watch was not called");
        tx.send(error).await.expect("watch error receiver dropped");
    }

    /// Drops the watch senders, closing both channels.
    pub fn close_watch(&self) {
        self.event_tx.lock().unwrap().take();
        self.error_tx.lock().unwrap().take();
    }
}

#[async_trait]
impl NodeClient for MockNodeClient {
    async fn nodes(&self) -> Result<Vec<NodeInfo>> {
        Ok(self.seed_nodes.lock().unwrap().clone())
    }

    async fn create_node(
        &self,
        node: &mut NodeInfo,
        opts: NodeOpts,
        _token: &CancellationToken,
    ) -> Result<()> {
        if node.network_id.is_empty() {
            return Err(NodeClientError::invalid_config("empty network id"));
        }
        if opts.swarm_key.is_empty() {
            return Err(NodeClientError::invalid_config("missing swarm key"));
        }
        if let Some(reason) = self.fail_create.lock().unwrap().clone() {
            return Err(NodeClientError::CreateRejected(reason));
        }

        node.container_id = format!("mock-{}", node.network_id);
        node.container_name = NodeInfo::container_name_for(&node.network_id);
        node.data_dir = PathBuf::from(format!("/tmp/atoll-mock/{}", node.network_id));
        node.bootstrap_peers = opts.bootstrap_peers.clone();

        self.created.lock().unwrap().push((node.clone(), opts));
        Ok(())
    }

    async fn stop_node(&self, node: &NodeInfo) -> Result<()> {
        self.stopped.lock().unwrap().push(node.clone());
        if let Some(reason) = self.fail_stop.lock().unwrap().clone() {
            return Err(NodeClientError::exec_failed(&node.container_id, reason));
        }
        Ok(())
    }

    fn watch(
        &self,
        token: CancellationToken,
    ) -> (mpsc::Receiver<NodeEvent>, mpsc::Receiver<NodeClientError>) {
        let (event_tx, event_rx) = mpsc::channel(16);
        let (error_tx, error_rx) = mpsc::channel(1);

        *self.event_tx.lock().unwrap() = Some(event_tx);
        *self.error_tx.lock().unwrap() = Some(error_tx);

        // Close the channels on cancellation, as the Docker watcher does.
        let event_slot = Arc::clone(&self.event_tx);
        let error_slot = Arc::clone(&self.error_tx);
        tokio::spawn(async move {
            token.cancelled().await;
            event_slot.lock().unwrap().take();
            error_slot.lock().unwrap().take();
        });

        (event_rx, error_rx)
    }
}
