//! The bring-up / tear-down facade.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use atoll_ipfs::{NodeClient, NodeOpts};
use atoll_registry::{NodeInfo, NodeRegistry, PortAllocations};

use crate::error::{OrchestratorError, Result};
use crate::reconcile;
use crate::store::NetworkStore;

/// Composes the registry, the container controller, and the network store.
///
/// `network_up` and `network_down` are synchronous to the caller and may
/// block on runtime I/O. They do not serialize against each other for the
/// same network; callers must not invoke them concurrently for one network.
/// The registry's duplicate check is the ultimate guard.
pub struct Orchestrator {
    client: Arc<dyn NodeClient>,
    store: Arc<dyn NetworkStore>,
    registry: Arc<NodeRegistry>,
    host: String,
    token: CancellationToken,
}

impl Orchestrator {
    /// Builds an orchestrator over an already-seeded registry.
    pub fn new(
        client: Arc<dyn NodeClient>,
        store: Arc<dyn NetworkStore>,
        registry: Arc<NodeRegistry>,
        host: impl Into<String>,
        token: CancellationToken,
    ) -> Self {
        Self {
            client,
            store,
            registry,
            host: host.into(),
            token,
        }
    }

    /// Builds an orchestrator, seeding the registry from the runtime's
    /// current containers so port accounting survives restarts.
    pub async fn bootstrap(
        client: Arc<dyn NodeClient>,
        store: Arc<dyn NetworkStore>,
        allocations: PortAllocations,
        host: impl Into<String>,
        token: CancellationToken,
    ) -> Result<Self> {
        let seeds = client.nodes().await?;
        info!(count = seeds.len(), "seeding registry from runtime");
        let registry = Arc::new(NodeRegistry::new(allocations, seeds));
        Ok(Self::new(client, store, registry, host, token))
    }

    /// The shared registry, for the delegator.
    pub fn registry(&self) -> Arc<NodeRegistry> {
        Arc::clone(&self.registry)
    }

    /// Starts the background reconcile loop. It stops when the
    /// orchestrator's token is cancelled or the runtime event stream ends.
    pub fn run(&self) -> JoinHandle<()> {
        let (events, errors) = self.client.watch(self.token.clone());
        tokio::spawn(reconcile::run(
            Arc::clone(&self.registry),
            events,
            errors,
            self.token.clone(),
        ))
    }

    /// Brings a network online: registry slot, container bring-up, and
    /// database activation.
    ///
    /// On failure past registration nothing is rolled back; the operator
    /// reaps the partial state with [`Orchestrator::network_down`].
    pub async fn network_up(&self, network: &str) -> Result<()> {
        if network.is_empty() {
            return Err(OrchestratorError::InvalidNetworkName);
        }

        let start = Instant::now();
        let job_id = Uuid::new_v4().to_string();
        info!(job_id = %job_id, network = %network, "network up started");

        let record = self.store.get_by_name(network).await?;
        if record.swarm_key.is_empty() {
            return Err(OrchestratorError::MissingSwarmKey(network.to_string()));
        }
        let opts = NodeOpts {
            swarm_key: record.swarm_key.clone(),
            bootstrap_peers: record.bootstrap_peers.clone(),
            auto_remove: false,
        };

        let mut node = NodeInfo::new(network, &job_id);
        self.registry.register(&mut node).await?;

        info!(job_id = %job_id, network = %network, "network registered, creating node");
        self.client
            .create_node(&mut node, opts, &self.token)
            .await?;

        let api_url = format!("{}:{}", self.host, node.ports.api);
        self.store
            .mark_activated(network, &api_url, &record.swarm_key, Utc::now())
            .await?;

        info!(
            job_id = %job_id,
            network = %network,
            container = %node.container_id,
            duration_ms = start.elapsed().as_millis() as u64,
            "network up completed"
        );
        Ok(())
    }

    /// Brings a network offline.
    ///
    /// Stop and deregister failures are logged but not fatal: the port
    /// reservation and database state must be reclaimed even when the
    /// runtime has already lost the container. Only a failed database
    /// update is returned.
    pub async fn network_down(&self, network: &str) -> Result<()> {
        if network.is_empty() {
            return Err(OrchestratorError::InvalidNetworkName);
        }

        let start = Instant::now();
        let job_id = Uuid::new_v4().to_string();
        info!(job_id = %job_id, network = %network, "network down started");

        let node = self.registry.get(network).await?;

        if let Err(e) = self.client.stop_node(&node).await {
            error!(
                job_id = %job_id,
                network = %network,
                container = %node.container_id,
                error = %e,
                "error while stopping node"
            );
        }

        if let Err(e) = self.registry.deregister(network).await {
            warn!(job_id = %job_id, network = %network, error = %e, "error while deregistering node");
        }

        self.store.mark_deactivated(network).await?;

        info!(
            job_id = %job_id,
            network = %network,
            duration_ms = start.elapsed().as_millis() as u64,
            "network down completed"
        );
        Ok(())
    }
}
