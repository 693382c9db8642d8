//! Atoll daemon: hosted private IPFS networks.
//!
//! One process serves both roles. The orchestrator brings tenant networks
//! up and down as Docker containers and keeps the node registry consistent
//! with runtime events; the delegator reverse-proxies
//! `/network/{net}/{feature}` traffic to the right container endpoint.
//!
//! # Usage
//!
//! ```bash
//! # Serve the delegator and the event reconciler
//! atolld run
//!
//! # Bring a network up or down
//! atolld network up my-network
//! atolld network down my-network
//!
//! # Start with a configuration file
//! atolld --config /etc/atoll/atoll.toml run
//! ```

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use atoll_delegator::{Engine, ServerOptions};
use atoll_ipfs::DockerClient;
use atoll_orchestrator::{Orchestrator, PgNetworkStore};

use config::AtollConfig;

/// CLI arguments for the atoll daemon.
#[derive(Parser, Debug)]
#[command(
    name = "atolld",
    about = "Orchestrator and delegator for hosted private IPFS networks",
    version,
    author
)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Enable JSON log output.
    #[arg(long)]
    json_logs: bool,

    /// Print the default configuration and exit.
    #[arg(long)]
    print_config: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the delegator and the event reconciler.
    Run,

    /// Bring a network up or down.
    Network {
        #[command(subcommand)]
        action: NetworkAction,
    },
}

#[derive(Subcommand, Debug)]
enum NetworkAction {
    /// Bring a network online.
    Up {
        /// Network name as registered in the database.
        name: String,
    },

    /// Bring a network offline.
    Down {
        /// Network name as registered in the database.
        name: String,
    },
}

/// Initialize tracing/logging.
fn init_tracing(config: &config::LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .context("failed to parse log filter")?;

    match config.format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json())
                .try_init()
                .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;
        }
        "compact" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().compact())
                .try_init()
                .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().pretty())
                .try_init()
                .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;
        }
    }

    Ok(())
}

/// Resolves once on ctrl-c or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Wires the shared components: Docker client, store, and a registry
/// seeded from the runtime's current containers.
async fn build_orchestrator(
    config: &AtollConfig,
    token: CancellationToken,
) -> Result<Orchestrator> {
    let client = DockerClient::new(&config.ipfs.image_version, config.ipfs.data_directory.clone())
        .await
        .context("failed to connect to the container runtime")?;

    let store = PgNetworkStore::connect(&config.database.url)
        .await
        .context("failed to connect to the network database")?;

    Orchestrator::bootstrap(
        Arc::new(client),
        Arc::new(store),
        config.ports.allocations(),
        config.private_host.clone(),
        token,
    )
    .await
    .context("failed to seed the node registry")
}

async fn run(config: AtollConfig, token: CancellationToken) -> Result<()> {
    let orchestrator = build_orchestrator(&config, token.clone()).await?;
    let reconciler = orchestrator.run();

    let engine = Engine::new(
        orchestrator.registry(),
        env!("CARGO_PKG_VERSION"),
        config.private_host.clone(),
    );
    let options = ServerOptions {
        host: config.delegator.host.clone(),
        port: config.delegator.port,
        timeout: config.delegator.timeout(),
    };

    engine
        .run(options, token)
        .await
        .context("delegator stopped with an error")?;

    reconciler.await.context("reconciler task panicked")?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    if args.print_config {
        let config = AtollConfig::default();
        println!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    let mut config = if let Some(ref path) = args.config {
        AtollConfig::from_file(path)
            .with_context(|| format!("failed to load config from {path:?}"))?
    } else {
        AtollConfig::default()
    };
    config.merge_cli_args(&args);
    config.validate().context("invalid configuration")?;

    init_tracing(&config.logging)?;
    info!(version = env!("CARGO_PKG_VERSION"), "atolld starting");

    // Shutdown is one-shot: the first signal cancels the token and every
    // component drains from there.
    let token = CancellationToken::new();
    let signal_token = token.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        signal_token.cancel();
    });

    let result = match args.command.unwrap_or(Command::Run) {
        Command::Run => run(config, token).await,
        Command::Network { action } => match action {
            NetworkAction::Up { name } => {
                let orchestrator = build_orchestrator(&config, token).await?;
                orchestrator.network_up(&name).await.map_err(Into::into)
            }
            NetworkAction::Down { name } => {
                let orchestrator = build_orchestrator(&config, token).await?;
                orchestrator.network_down(&name).await.map_err(Into::into)
            }
        },
    };

    if let Err(ref e) = result {
        error!(error = %e, "atolld failed");
    } else {
        info!("atolld stopped");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_args_parsing() {
        let args = CliArgs::parse_from(["atolld"]);
        assert!(args.config.is_none());
        assert!(args.command.is_none());
        assert!(!args.json_logs);
    }

    #[test]
    fn test_cli_network_up() {
        let args = CliArgs::parse_from(["atolld", "network", "up", "my-network"]);
        match args.command {
            Some(Command::Network {
                action: NetworkAction::Up { name },
            }) => assert_eq!(name, "my-network"),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_cli_overrides_merge() {
        let args = CliArgs::parse_from(["atolld", "--log-level", "debug", "--json-logs", "run"]);
        let mut config = AtollConfig::default();
        config.merge_cli_args(&args);

        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, "json");
    }
}
