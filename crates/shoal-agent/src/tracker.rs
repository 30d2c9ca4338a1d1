//! NodeTracker bootstrap and inventory writes
//!
//! The agent is the only writer of its node's `NodeTracker.spec.chunks`. The
//! tracker is created on first boot with the Node as owner reference, so it
//! is garbage-collected when the Node goes away.

use k8s_openapi::api::core::v1::Node;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{Api, ObjectMeta, PostParams};
use kube::{Client, ResourceExt};
use tracing::{debug, info};

use shoal_common::crd::{ChunkTracker, NodeTracker, NodeTrackerSpec};
use shoal_common::{Error, Result, SIZE_LIMIT_ENV};

/// Ensure this node's NodeTracker exists, creating it with the Node's labels
/// and owner reference when absent.
pub async fn ensure_node_tracker(client: &Client, node_name: &str) -> Result<()> {
    let trackers: Api<NodeTracker> = Api::all(client.clone());

    if trackers.get_opt(node_name).await?.is_some() {
        return Ok(());
    }

    let nodes: Api<Node> = Api::all(client.clone());
    let node = nodes.get(node_name).await?;

    let size_limit = std::env::var(SIZE_LIMIT_ENV).ok().filter(|v| !v.is_empty());

    let tracker = NodeTracker {
        metadata: ObjectMeta {
            name: Some(node_name.to_string()),
            labels: node.metadata.labels.clone(),
            owner_references: Some(vec![OwnerReference {
                api_version: "v1".to_string(),
                kind: "Node".to_string(),
                name: node.name_any(),
                uid: node.metadata.uid.clone().unwrap_or_default(),
                controller: Some(true),
                block_owner_deletion: Some(true),
            }]),
            ..Default::default()
        },
        spec: NodeTrackerSpec {
            chunks: Vec::new(),
            size_limit,
        },
        status: None,
    };

    match trackers.create(&PostParams::default(), &tracker).await {
        Ok(_) => {
            info!(node = node_name, "created node tracker");
            Ok(())
        }
        // Another task won the race; the tracker exists either way.
        Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Replace the tracker's chunk list with the scanner's latest walk.
pub async fn publish_chunks(
    client: &Client,
    node_name: &str,
    chunks: Vec<ChunkTracker>,
) -> Result<()> {
    let trackers: Api<NodeTracker> = Api::all(client.clone());
    let mut tracker = trackers.get(node_name).await?;
    tracker.spec.chunks = chunks;
    tracker.metadata.managed_fields = None;
    trackers
        .replace(node_name, &PostParams::default(), &tracker)
        .await?;
    Ok(())
}

/// Record a freshly replicated chunk without waiting for the next scan.
pub async fn track_chunk(
    client: &Client,
    node_name: &str,
    chunk_name: &str,
    size_bytes: i64,
) -> Result<()> {
    let trackers: Api<NodeTracker> = Api::all(client.clone());
    let Some(mut tracker) = trackers.get_opt(node_name).await? else {
        // First scan hasn't created the tracker yet; it will pick the chunk up.
        debug!(node = node_name, chunk = chunk_name, "no tracker yet, deferring to scanner");
        return Ok(());
    };

    if tracker
        .spec
        .chunks
        .iter()
        .any(|c| c.chunk_name == chunk_name)
    {
        return Ok(());
    }

    tracker.spec.chunks.push(ChunkTracker {
        chunk_name: chunk_name.to_string(),
        size_bytes,
    });
    tracker.metadata.managed_fields = None;
    trackers
        .replace(node_name, &PostParams::default(), &tracker)
        .await
        .map_err(Error::from)?;
    Ok(())
}

/// Drop a reclaimed chunk from the tracker.
pub async fn untrack_chunk(client: &Client, node_name: &str, chunk_name: &str) -> Result<()> {
    let trackers: Api<NodeTracker> = Api::all(client.clone());
    let Some(mut tracker) = trackers.get_opt(node_name).await? else {
        return Ok(());
    };

    let before = tracker.spec.chunks.len();
    tracker.spec.chunks.retain(|c| c.chunk_name != chunk_name);
    if tracker.spec.chunks.len() == before {
        return Ok(());
    }

    tracker.metadata.managed_fields = None;
    trackers
        .replace(node_name, &PostParams::default(), &tracker)
        .await
        .map_err(Error::from)?;
    Ok(())
}
