//! Shoal controller - fleet-wide model artifact placement

use std::sync::Arc;

use clap::Parser;
use futures::StreamExt;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::runtime::controller::Config as ControllerConfig;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, CustomResourceExt, ResourceExt};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use shoal_common::crd::{NodeTracker, Replication, Torrent};
use shoal_common::{DEFAULT_WORKSPACE, TORRENT_NAME_LABEL_KEY};
use shoal_controller::controller::{node_tracker, pod, replication, torrent, Context};
use shoal_controller::dispatcher::Dispatcher;
use shoal_controller::hub::HuggingfaceCatalog;
use shoal_controller::index::ChunkIndex;
use shoal_controller::webhook::webhook_router;

/// Shoal - declarative peer-to-peer placement of model artifacts
#[derive(Parser, Debug)]
#[command(name = "shoal-controller", version, about, long_about = None)]
struct Cli {
    /// Generate CRD manifests and exit
    #[arg(long)]
    crd: bool,

    /// Bind address for the admission webhook server
    #[arg(long, default_value = "0.0.0.0:9443")]
    webhook_addr: String,

    /// Per-node workspace directory referenced in Replication URIs
    #[arg(long, default_value = DEFAULT_WORKSPACE)]
    workspace: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    if cli.crd {
        for crd in [Torrent::crd(), NodeTracker::crd(), Replication::crd()] {
            let yaml = serde_yaml::to_string(&crd)
                .map_err(|e| anyhow::anyhow!("failed to serialize CRD: {e}"))?;
            println!("---\n{yaml}");
        }
        return Ok(());
    }

    run_controller(cli).await
}

async fn run_controller(cli: Cli) -> anyhow::Result<()> {
    tracing::info!("shoal controller starting...");

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("failed to create kubernetes client: {e}"))?;

    let index = Arc::new(ChunkIndex::new());
    let dispatcher = Arc::new(
        Dispatcher::new(index.clone(), cli.workspace.clone())
            .map_err(|e| anyhow::anyhow!("failed to build dispatcher: {e}"))?,
    );
    let catalog = Arc::new(HuggingfaceCatalog::from_env());
    let ctx = Arc::new(Context::new(client.clone(), dispatcher, catalog));

    // Inventory feed: NodeTracker watch events → live chunk index.
    let index_feed = tokio::spawn(node_tracker::run_index_feed(client.clone(), index));

    // Admission webhook server.
    let listener = tokio::net::TcpListener::bind(&cli.webhook_addr)
        .await
        .map_err(|e| anyhow::anyhow!("failed to bind webhook listener {}: {e}", cli.webhook_addr))?;
    tracing::info!(addr = %cli.webhook_addr, "webhook server listening");
    let webhook = tokio::spawn(async move { axum::serve(listener, webhook_router()).await });

    let torrents: Api<Torrent> = Api::all(client.clone());
    let replications: Api<Replication> = Api::all(client.clone());
    let trackers: Api<NodeTracker> = Api::all(client.clone());
    let nodes: Api<Node> = Api::all(client.clone());
    let pods: Api<Pod> = Api::all(client.clone());

    tracing::info!("starting shoal controllers...");
    tracing::info!("  - Torrent placement controller");
    tracing::info!("  - NodeTracker controller");
    tracing::info!("  - Replication controller");
    tracing::info!("  - Pod preheat controller");

    // Replication status flips re-trigger the owning Torrent via ownerReference.
    let torrent_controller = Controller::new(torrents, WatcherConfig::default())
        .owns(replications.clone(), WatcherConfig::default())
        .with_config(ControllerConfig::default().concurrency(5))
        .shutdown_on_signal()
        .run(torrent::reconcile, torrent::error_policy, ctx.clone())
        .for_each(|result| async move {
            match result {
                Ok(ref obj) => tracing::debug!(?obj, "torrent reconciliation completed"),
                Err(e) => tracing::error!(error = ?e, "torrent reconciliation error"),
            }
        });

    // Node label drift re-triggers the matching NodeTracker.
    let tracker_controller = Controller::new(trackers, WatcherConfig::default())
        .watches(nodes, WatcherConfig::default(), |node: Node| {
            Some(ObjectRef::<NodeTracker>::new(&node.name_any()))
        })
        .shutdown_on_signal()
        .run(
            node_tracker::reconcile,
            node_tracker::error_policy,
            ctx.clone(),
        )
        .for_each(|result| async move {
            match result {
                Ok(ref obj) => tracing::debug!(?obj, "node tracker reconciliation completed"),
                Err(e) => tracing::error!(error = ?e, "node tracker reconciliation error"),
            }
        });

    let replication_controller = Controller::new(replications, WatcherConfig::default())
        .with_config(ControllerConfig::default().concurrency(5))
        .shutdown_on_signal()
        .run(
            replication::reconcile,
            replication::error_policy,
            ctx.clone(),
        )
        .for_each(|result| async move {
            match result {
                Ok(ref obj) => tracing::debug!(?obj, "replication reconciliation completed"),
                Err(e) => tracing::error!(error = ?e, "replication reconciliation error"),
            }
        });

    // Only pods asking for preheat are watched at all.
    let pod_controller = Controller::new(
        pods,
        WatcherConfig::default().labels(TORRENT_NAME_LABEL_KEY),
    )
    .shutdown_on_signal()
    .run(pod::reconcile, pod::error_policy, ctx.clone())
    .for_each(|result| async move {
        match result {
            Ok(ref obj) => tracing::debug!(?obj, "pod reconciliation completed"),
            Err(e) => tracing::error!(error = ?e, "pod reconciliation error"),
        }
    });

    tokio::select! {
        _ = torrent_controller => tracing::info!("torrent controller completed"),
        _ = tracker_controller => tracing::info!("node tracker controller completed"),
        _ = replication_controller => tracing::info!("replication controller completed"),
        _ = pod_controller => tracing::info!("pod controller completed"),
        result = webhook => {
            if let Ok(Err(e)) = result {
                return Err(anyhow::anyhow!("webhook server failed: {e}"));
            }
        }
        _ = index_feed => tracing::warn!("index feed terminated"),
    }

    tracing::info!("shoal controller shutting down");
    Ok(())
}
