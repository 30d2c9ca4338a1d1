//! Replication execution
//!
//! Dispatches a work order on its source/destination discriminator and does
//! the filesystem work. The on-disk layout per repo is:
//!
//! ```text
//! <repoRoot>/blobs/<oid>--<NN>                  content-addressed chunk file
//! <repoRoot>/snapshots/<revision>/<filePath>    symlink → ../../blobs/<oid>--<NN>
//! ```
//!
//! The symlink's existence is the "downloaded" flag: executions short-circuit
//! when the snapshot path already resolves.

pub mod hub;
pub mod peer;

use std::path::Path;

use kube::api::Api;
use kube::ResourceExt;
use tracing::{info, warn};

use shoal_common::crd::{parse_remote_uri, parse_uri, Replication, Torrent};
use shoal_common::{Error, Result, TORRENT_NAME_LABEL_KEY};

use crate::AgentContext;

/// Execute one Replication to completion.
pub async fn execute(ctx: &AgentContext, replication: &Replication) -> Result<()> {
    let spec = &replication.spec;

    // No destination means the source names a local file to remove.
    if spec.destination.is_none() {
        return delete_chunk(replication).await;
    }

    if spec.source.hub().is_some() {
        return download_chunk(ctx, replication).await;
    }

    sync_chunk(ctx, replication).await
}

/// Download from the origin into the local blob path, then snapshot-link it.
async fn download_chunk(ctx: &AgentContext, replication: &Replication) -> Result<()> {
    let spec = &replication.spec;
    let hub = spec
        .source
        .hub()
        .ok_or_else(|| Error::validation("download replication without hub source"))?;
    let filename = hub
        .filename
        .as_deref()
        .ok_or_else(|| Error::validation("download replication without filename"))?;

    let blob_path = destination_blob_path(replication)?;
    let snapshot_path = snapshot_path_for(&blob_path, hub.revision(), filename)?;

    // Symlink exists means already downloaded.
    if tokio::fs::metadata(&snapshot_path).await.is_ok() {
        info!(file = filename, "file already downloaded");
        return Ok(());
    }

    info!(file = filename, repo = %hub.repo_id, "downloading file from hub");
    hub::download_from_hub(&ctx.http, &hub.repo_id, hub.revision(), filename, &blob_path).await?;

    create_symlink(&blob_path, &snapshot_path).await?;
    info!(file = filename, "download complete");
    Ok(())
}

/// Stream the chunk from the peer already holding it, then snapshot-link it.
///
/// The sync order carries only URIs, so the human-named snapshot path is
/// recovered from the parent Torrent (via the torrent-name label): its repo
/// status maps the chunk back to a file path and its hub names the revision.
async fn sync_chunk(ctx: &AgentContext, replication: &Replication) -> Result<()> {
    let spec = &replication.spec;
    let source_uri = spec
        .source
        .uri()
        .ok_or_else(|| Error::validation("sync replication without uri source"))?;
    let (peer_node, peer_path) = parse_remote_uri(source_uri)?;

    let blob_path = destination_blob_path(replication)?;
    let (revision, file_path) = lookup_parent_file(ctx, replication).await?;
    let snapshot_path = snapshot_path_for(&blob_path, &revision, &file_path)?;

    if tokio::fs::metadata(&snapshot_path).await.is_ok() {
        info!(chunk = %spec.chunk_name, "chunk already synced");
        return Ok(());
    }

    let peer_addr = peer::resolve_peer_address(&ctx.client, peer_node).await?;
    info!(chunk = %spec.chunk_name, peer = peer_node, "syncing chunk from peer");
    peer::recv_chunk(&ctx.http, &peer_addr, ctx.peer_port, peer_path, &blob_path).await?;

    create_symlink(&blob_path, &snapshot_path).await?;
    info!(chunk = %spec.chunk_name, "sync complete");
    Ok(())
}

/// Remove the snapshot symlink and its blob. Absent paths are not errors:
/// reclaim must converge even after a partial earlier attempt.
async fn delete_chunk(replication: &Replication) -> Result<()> {
    let spec = &replication.spec;
    let uri = spec
        .source
        .uri()
        .ok_or_else(|| Error::validation("delete replication without uri source"))?;
    let (_, snapshot_path) = parse_uri(uri)?;

    info!(chunk = %spec.chunk_name, path = snapshot_path, "deleting chunk");
    delete_symlink_and_target(snapshot_path).await
}

/// The local blob path named by the destination URI.
fn destination_blob_path(replication: &Replication) -> Result<String> {
    let uri = replication
        .spec
        .destination
        .as_ref()
        .and_then(|d| d.uri())
        .ok_or_else(|| Error::validation("replication without localhost destination"))?;
    let (_, path) = parse_uri(uri)?;
    Ok(path.to_string())
}

/// `<repoRoot>/snapshots/<revision>/<filePath>`, derived from the blob path.
pub fn snapshot_path_for(blob_path: &str, revision: &str, file_path: &str) -> Result<String> {
    let (root, _) = blob_path
        .split_once("/blobs/")
        .ok_or_else(|| Error::validation(format!("unexpected blob path {blob_path:?}")))?;
    Ok(format!("{root}/snapshots/{revision}/{file_path}"))
}

/// Find the revision and file path backing this chunk on the parent Torrent.
async fn lookup_parent_file(
    ctx: &AgentContext,
    replication: &Replication,
) -> Result<(String, String)> {
    let torrent_name = replication
        .labels()
        .get(TORRENT_NAME_LABEL_KEY)
        .cloned()
        .ok_or_else(|| {
            Error::validation_for(replication.name_any(), "replication without torrent label")
        })?;

    let torrents: Api<Torrent> = Api::all(ctx.client.clone());
    let torrent = torrents.get(&torrent_name).await?;

    let revision = torrent
        .spec
        .hub
        .as_ref()
        .map(|h| h.revision().to_string())
        .ok_or_else(|| Error::validation_for(&torrent_name, "parent torrent without hub"))?;

    let chunk_name = &replication.spec.chunk_name;
    let file_path = torrent
        .status
        .as_ref()
        .and_then(|s| s.repo.as_ref())
        .and_then(|repo| {
            repo.objects
                .iter()
                .find(|o| o.chunks.iter().any(|c| &c.name == chunk_name))
                .map(|o| o.path.clone())
        })
        .ok_or_else(|| {
            Error::validation_for(
                &torrent_name,
                format!("chunk {chunk_name} not found in parent repo"),
            )
        })?;

    Ok((revision, file_path))
}

/// Create the relative snapshot symlink for a blob, replacing any stale link.
///
/// The link is relative (`../../blobs/<chunk>`) so the same tree works when
/// the workspace is mounted at a different path inside containers.
pub async fn create_symlink(blob_path: &str, snapshot_path: &str) -> Result<()> {
    let snapshot = Path::new(snapshot_path);
    if let Some(parent) = snapshot.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| Error::io(parent.display().to_string(), e))?;
    }

    if tokio::fs::symlink_metadata(snapshot).await.is_ok() {
        tokio::fs::remove_file(snapshot)
            .await
            .map_err(|e| Error::io(snapshot_path.to_string(), e))?;
    }

    let (_, blob_name) = blob_path
        .split_once("/blobs/")
        .ok_or_else(|| Error::validation(format!("unexpected blob path {blob_path:?}")))?;

    let target = format!("../../blobs/{blob_name}");
    tokio::fs::symlink(&target, snapshot)
        .await
        .map_err(|e| Error::io(snapshot_path.to_string(), e))
}

/// Remove a snapshot symlink and the blob it points to.
pub async fn delete_symlink_and_target(snapshot_path: &str) -> Result<()> {
    let snapshot = Path::new(snapshot_path);

    let target = match tokio::fs::read_link(snapshot).await {
        Ok(target) => target,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(path = snapshot_path, "snapshot symlink already gone");
            return Ok(());
        }
        Err(e) => return Err(Error::io(snapshot_path.to_string(), e)),
    };

    // Resolve the relative link against the symlink's directory.
    let blob_path = match snapshot.parent() {
        Some(parent) => parent.join(&target),
        None => target.clone(),
    };

    tokio::fs::remove_file(snapshot)
        .await
        .map_err(|e| Error::io(snapshot_path.to_string(), e))?;

    match tokio::fs::remove_file(&blob_path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(path = %blob_path.display(), "blob already gone");
        }
        Err(e) => return Err(Error::io(blob_path.display().to_string(), e)),
    }

    Ok(())
}
