//! The node client capability set and its Docker implementation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::models::{HostConfig, PortBinding, RestartPolicy, RestartPolicyNameEnum};
use bollard::system::EventsOptions;
use bollard::Docker;
use futures::StreamExt;
use tokio::fs;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use atoll_registry::NodeInfo;

use crate::error::{NodeClientError, Result};
use crate::events::NodeEvent;
use crate::ready;

/// Container-internal ports, fixed by the IPFS daemon.
const SWARM_PORT_TCP: &str = "4001/tcp";
const API_PORT_TCP: &str = "5001/tcp";
const GATEWAY_PORT_TCP: &str = "8080/tcp";

/// In-container mount point for a node's repository.
const DATA_MOUNT: &str = "/data/ipfs";

/// Grace period given to a node before the runtime kills it.
const STOP_GRACE_SECS: i64 = 10;

/// Options for bringing a node up.
#[derive(Debug, Clone, Default)]
pub struct NodeOpts {
    /// Shared secret enforcing private-network membership. Required; the
    /// daemon refuses to start without it.
    pub swarm_key: String,

    /// Initial dial addresses. When non-empty, the daemon's default
    /// bootstrap list is stripped and replaced with these.
    pub bootstrap_peers: Vec<String>,

    /// Remove the container on exit instead of restarting it.
    pub auto_remove: bool,
}

/// Capability set for controlling IPFS nodes on a container runtime.
#[async_trait]
pub trait NodeClient: Send + Sync {
    /// Lists the nodes currently live on the runtime.
    async fn nodes(&self) -> Result<Vec<NodeInfo>>;

    /// Brings a node up: key material, container create/start, readiness
    /// wait, and peer seeding. On failure the partial state is left for the
    /// caller to reap via [`NodeClient::stop_node`].
    async fn create_node(
        &self,
        node: &mut NodeInfo,
        opts: NodeOpts,
        token: &CancellationToken,
    ) -> Result<()>;

    /// Stops a node and reclaims its container and data directory.
    async fn stop_node(&self, node: &NodeInfo) -> Result<()>;

    /// Streams node start/die events until the token is cancelled. Runtime
    /// errors arrive on the second channel; both close on cancellation.
    fn watch(
        &self,
        token: CancellationToken,
    ) -> (mpsc::Receiver<NodeEvent>, mpsc::Receiver<NodeClientError>);
}

/// [`NodeClient`] backed by the local Docker daemon via bollard.
pub struct DockerClient {
    docker: Docker,
    image: String,
    data_root: PathBuf,
}

impl DockerClient {
    /// Connects to the local Docker daemon, pulls the configured IPFS image,
    /// and prepares the data root.
    pub async fn new(image_version: &str, data_root: impl Into<PathBuf>) -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()?;
        docker.ping().await?;

        let image = format!("ipfs/go-ipfs:{image_version}");
        pull_image(&docker, &image).await?;

        let data_root = data_root.into();
        fs::create_dir_all(data_root.join("data").join("ipfs")).await?;

        info!(image = %image, "connected to docker daemon");
        Ok(Self {
            docker,
            image,
            data_root,
        })
    }

    /// Host directory backing a network's repository.
    fn data_dir(&self, network_id: &str) -> PathBuf {
        self.data_root.join("data").join("ipfs").join(network_id)
    }

    /// Runs a command inside a container and fails on non-zero exit.
    async fn run_in_container(&self, container_id: &str, cmd: Vec<String>) -> Result<()> {
        debug!(container = %container_id, cmd = ?cmd, "running in-container command");

        let exec = self
            .docker
            .create_exec(
                container_id,
                CreateExecOptions {
                    cmd: Some(cmd),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await?;

        if let StartExecResults::Attached { mut output, .. } =
            self.docker.start_exec(&exec.id, None).await?
        {
            let mut stderr = String::new();
            while let Some(chunk) = output.next().await {
                if let LogOutput::StdErr { message } = chunk? {
                    stderr.push_str(&String::from_utf8_lossy(&message));
                }
            }

            let inspect = self.docker.inspect_exec(&exec.id).await?;
            match inspect.exit_code {
                Some(0) | None => {}
                Some(code) => {
                    return Err(NodeClientError::exec_failed(
                        container_id,
                        format!("exit code {code}: {}", stderr.trim()),
                    ));
                }
            }
        }

        Ok(())
    }

    /// Strips the daemon's default bootstrap peers and seeds the provided
    /// list. Order matters: a removal failure aborts the add.
    async fn bootstrap_node(&self, container_id: &str, peers: &[String]) -> Result<()> {
        let rm = ["ipfs", "bootstrap", "rm", "--all"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        self.run_in_container(container_id, rm).await?;

        let mut add: Vec<String> = ["ipfs", "bootstrap", "add"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        add.extend(peers.iter().cloned());
        self.run_in_container(container_id, add).await
    }
}

#[async_trait]
impl NodeClient for DockerClient {
    async fn nodes(&self) -> Result<Vec<NodeInfo>> {
        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions::<String> {
                all: false,
                ..Default::default()
            }))
            .await?;

        let mut nodes = Vec::new();
        for container in containers {
            let id = container.id.unwrap_or_default();
            let name = container
                .names
                .as_ref()
                .and_then(|names| names.first())
                .map(String::as_str)
                .unwrap_or(&id)
                .to_string();
            let labels = container.labels.unwrap_or_default();

            // Containers without our label set are not ours.
            match NodeInfo::from_labels(&id, &name, &labels) {
                Ok(node) => nodes.push(node),
                Err(_) => continue,
            }
        }

        Ok(nodes)
    }

    async fn create_node(
        &self,
        node: &mut NodeInfo,
        opts: NodeOpts,
        token: &CancellationToken,
    ) -> Result<()> {
        if node.network_id.is_empty() {
            return Err(NodeClientError::invalid_config("empty network id"));
        }
        if opts.swarm_key.is_empty() {
            return Err(NodeClientError::invalid_config("missing swarm key"));
        }

        node.data_dir = self.data_dir(&node.network_id);
        node.container_name = NodeInfo::container_name_for(&node.network_id);
        node.bootstrap_peers = opts.bootstrap_peers.clone();

        write_swarm_key(&node.data_dir, &opts.swarm_key).await?;

        let port_bindings = HashMap::from([
            // Public peer transport.
            (SWARM_PORT_TCP.to_string(), host_binding("0.0.0.0", &node.ports.swarm)),
            // Loopback-only control surfaces.
            (API_PORT_TCP.to_string(), host_binding("127.0.0.1", &node.ports.api)),
            (GATEWAY_PORT_TCP.to_string(), host_binding("127.0.0.1", &node.ports.gateway)),
        ]);

        let restart_policy = (!opts.auto_remove).then(|| RestartPolicy {
            name: Some(RestartPolicyNameEnum::UNLESS_STOPPED),
            ..Default::default()
        });

        let config = Config {
            image: Some(self.image.clone()),
            cmd: Some(vec![
                "daemon".to_string(),
                "--migrate=true".to_string(),
                "--enable-pubsub-experiment".to_string(),
            ]),
            // The daemon must refuse to start without the swarm key.
            env: Some(vec!["LIBP2P_FORCE_PNET=1".to_string()]),
            labels: Some(node.to_labels()),
            tty: Some(true),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            exposed_ports: Some(HashMap::from([
                (SWARM_PORT_TCP.to_string(), HashMap::new()),
                (API_PORT_TCP.to_string(), HashMap::new()),
                (GATEWAY_PORT_TCP.to_string(), HashMap::new()),
            ])),
            host_config: Some(HostConfig {
                auto_remove: Some(opts.auto_remove),
                restart_policy,
                binds: Some(vec![format!(
                    "{}:{}",
                    node.data_dir.to_string_lossy(),
                    DATA_MOUNT
                )]),
                port_bindings: Some(port_bindings),
                ..Default::default()
            }),
            ..Default::default()
        };

        // Once the runtime accepts the create call we wait for it to return
        // even under cancellation, so the container id is always reapable.
        let created = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: node.container_name.as_str(),
                    platform: None,
                }),
                config,
            )
            .await?;
        node.container_id = created.id.clone();

        if !created.warnings.is_empty() {
            return Err(NodeClientError::CreateRejected(created.warnings.join("\n")));
        }

        self.docker
            .start_container(&created.id, None::<StartContainerOptions<String>>)
            .await?;

        let logs = Box::pin(self.docker.logs(
            &created.id,
            Some(LogsOptions::<String> {
                stdout: true,
                follow: true,
                ..Default::default()
            }),
        ));
        ready::wait_for_ready(&created.id, logs, token).await?;

        if !opts.bootstrap_peers.is_empty() {
            self.bootstrap_node(&created.id, &opts.bootstrap_peers).await?;
        }

        info!(
            network = %node.network_id,
            container = %created.id,
            "node is up"
        );
        Ok(())
    }

    async fn stop_node(&self, node: &NodeInfo) -> Result<()> {
        self.docker
            .stop_container(
                &node.container_id,
                Some(StopContainerOptions { t: STOP_GRACE_SECS }),
            )
            .await?;

        // Remove failures are tolerated; auto-remove nodes race us here.
        if let Err(e) = self
            .docker
            .remove_container(
                &node.container_id,
                Some(RemoveContainerOptions {
                    v: true,
                    link: true,
                    ..Default::default()
                }),
            )
            .await
        {
            warn!(container = %node.container_id, error = %e, "failed to remove container");
        }

        fs::remove_dir_all(self.data_dir(&node.network_id)).await?;
        info!(network = %node.network_id, "node stopped and reclaimed");
        Ok(())
    }

    fn watch(
        &self,
        token: CancellationToken,
    ) -> (mpsc::Receiver<NodeEvent>, mpsc::Receiver<NodeClientError>) {
        let (event_tx, event_rx) = mpsc::channel(16);
        let (error_tx, error_rx) = mpsc::channel(1);
        let docker = self.docker.clone();

        tokio::spawn(async move {
            let filters = HashMap::from([
                ("type".to_string(), vec!["container".to_string()]),
                (
                    "event".to_string(),
                    vec!["start".to_string(), "die".to_string()],
                ),
            ]);
            let mut stream = Box::pin(docker.events(Some(EventsOptions::<String> {
                filters,
                ..Default::default()
            })));

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    message = stream.next() => match message {
                        None => break,
                        Some(Ok(message)) => {
                            // Events without our labels are dropped.
                            if let Some(event) = NodeEvent::from_message(&message) {
                                debug!(
                                    network = %event.node.network_id,
                                    status = ?event.status,
                                    "node event received"
                                );
                                if event_tx.send(event).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Some(Err(e)) => {
                            if error_tx.send(e.into()).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            }
            // Dropping the senders closes both channels.
        });

        (event_rx, error_rx)
    }
}

fn host_binding(host_ip: &str, host_port: &str) -> Option<Vec<PortBinding>> {
    Some(vec![PortBinding {
        host_ip: Some(host_ip.to_string()),
        host_port: Some(host_port.to_string()),
    }])
}

/// Creates a node's data directory and writes its swarm key, both with
/// owner-only permissions.
async fn write_swarm_key(data_dir: &Path, swarm_key: &str) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    fs::create_dir_all(data_dir).await?;
    fs::set_permissions(data_dir, std::fs::Permissions::from_mode(0o700)).await?;

    let key_path = data_dir.join("swarm.key");
    fs::write(&key_path, swarm_key).await?;
    fs::set_permissions(&key_path, std::fs::Permissions::from_mode(0o600)).await?;
    Ok(())
}

async fn pull_image(docker: &Docker, image: &str) -> Result<()> {
    debug!(image = %image, "pulling image");
    let mut stream = docker.create_image(
        Some(CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        }),
        None,
        None,
    );

    while let Some(progress) = stream.next().await {
        let info = progress?;
        if let Some(status) = info.status {
            debug!(status = %status, "pull progress");
        }
    }
    Ok(())
}
