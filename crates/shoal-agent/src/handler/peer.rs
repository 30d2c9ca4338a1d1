//! Peer-to-peer chunk fetch
//!
//! The sync half of a Replication: locate the agent Pod on the holding node,
//! stream the chunk over its `/sync` endpoint, and land it at the local blob
//! path.

use std::path::Path;

use futures::TryStreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams};
use kube::Client;
use tokio::io::AsyncWriteExt;

use shoal_common::{Error, Result, AGENT_APP_LABEL};

/// Resolve the IP of the agent Pod on `peer_node`. Exactly one agent runs
/// per node (it's a DaemonSet); the first match wins.
pub async fn resolve_peer_address(client: &Client, peer_node: &str) -> Result<String> {
    let pods: Api<Pod> = Api::all(client.clone());
    let params = ListParams::default()
        .labels(AGENT_APP_LABEL)
        .fields(&format!("spec.nodeName={peer_node}"));

    let list = pods.list(&params).await?;
    let pod = list.items.into_iter().next().ok_or_else(|| {
        Error::internal_with_context("peer", format!("no agent pod found on node {peer_node}"))
    })?;

    pod.status.and_then(|s| s.pod_ip).ok_or_else(|| {
        Error::internal_with_context("peer", format!("agent pod on {peer_node} has no IP yet"))
    })
}

/// Stream `remote_path` from the peer into the local `blob_path`.
pub async fn recv_chunk(
    http: &reqwest::Client,
    peer_addr: &str,
    peer_port: u16,
    remote_path: &str,
    blob_path: &str,
) -> Result<()> {
    let url = format!("http://{peer_addr}:{peer_port}/sync?path={remote_path}");

    let response = http
        .get(&url)
        .send()
        .await
        .map_err(|e| Error::internal_with_context("peer", format!("sync request failed: {e}")))?;

    if !response.status().is_success() {
        return Err(Error::internal_with_context(
            "peer",
            format!("sync request returned status {}", response.status()),
        ));
    }

    if let Some(parent) = Path::new(blob_path).parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| Error::io(parent.display().to_string(), e))?;
    }

    // The blob path is content-addressed: every peer serves identical bytes,
    // so plain truncate-and-write is safe across retries.
    let mut file = tokio::fs::File::create(blob_path)
        .await
        .map_err(|e| Error::io(blob_path.to_string(), e))?;

    let mut stream = response.bytes_stream();
    while let Some(bytes) = stream
        .try_next()
        .await
        .map_err(|e| Error::internal_with_context("peer", format!("sync stream failed: {e}")))?
    {
        file.write_all(&bytes)
            .await
            .map_err(|e| Error::io(blob_path.to_string(), e))?;
    }

    file.flush()
        .await
        .map_err(|e| Error::io(blob_path.to_string(), e))?;
    Ok(())
}
