//! Shoal agent - per-node replication executor and inventory publisher

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use futures::StreamExt;
use kube::runtime::controller::Config as ControllerConfig;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use shoal_agent::{controller, scanner, server, AgentContext};
use shoal_common::crd::Replication;
use shoal_common::{DEFAULT_WORKSPACE, HTTP_PORT, NODE_NAME_ENV};

/// Shoal node agent
#[derive(Parser, Debug)]
#[command(name = "shoal-agent", version, about, long_about = None)]
struct Cli {
    /// Workspace directory holding repo blobs and snapshots
    #[arg(long, default_value = DEFAULT_WORKSPACE)]
    workspace: PathBuf,

    /// Port to serve the peer sync endpoint on
    #[arg(long, default_value_t = HTTP_PORT)]
    port: u16,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let node_name = std::env::var(NODE_NAME_ENV)
        .ok()
        .filter(|n| !n.is_empty())
        .ok_or_else(|| anyhow::anyhow!("{NODE_NAME_ENV} must be set"))?;

    tracing::info!(node = %node_name, "shoal agent starting...");

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("failed to create kubernetes client: {e}"))?;

    let ctx = Arc::new(AgentContext::new(client.clone(), node_name, cli.port));

    // Peer sync server.
    let addr = format!("0.0.0.0:{}", cli.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| anyhow::anyhow!("failed to bind sync listener {addr}: {e}"))?;
    tracing::info!(addr = %addr, "peer sync server listening");
    let sync_server = tokio::spawn(async move { axum::serve(listener, server::router()).await });

    // Inventory scanner.
    let scan = tokio::spawn(scanner::run(ctx.clone(), cli.workspace.clone()));

    // Replication executor.
    // Downloads can run for a long time; the worker pool bounds how many
    // transfer at once.
    let replications: Api<Replication> = Api::all(client);
    let replication_controller = Controller::new(replications, WatcherConfig::default())
        .with_config(ControllerConfig::default().concurrency(10))
        .shutdown_on_signal()
        .run(controller::reconcile, controller::error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok(ref obj) => tracing::debug!(?obj, "replication execution completed"),
                Err(e) => tracing::error!(error = ?e, "replication execution error"),
            }
        });

    tokio::select! {
        _ = replication_controller => tracing::info!("replication controller completed"),
        result = sync_server => {
            if let Ok(Err(e)) = result {
                return Err(anyhow::anyhow!("sync server failed: {e}"));
            }
        }
        _ = scan => tracing::warn!("scanner terminated"),
    }

    tracing::info!("shoal agent shutting down");
    Ok(())
}
