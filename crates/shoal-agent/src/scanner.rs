//! Inventory scanner
//!
//! Background task, one cycle every five minutes: make sure the NodeTracker
//! exists, walk the workspace's snapshot symlinks, and publish the deduped
//! chunk list. The walk follows `<workspace>/<repo>/snapshots/<revision>/<file>`
//! at fixed depth; a chunk referenced from several snapshots counts once.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use shoal_common::crd::ChunkTracker;
use shoal_common::Result;

use crate::tracker;
use crate::AgentContext;

/// Period between inventory cycles.
const SYNC_PERIOD: Duration = Duration::from_secs(5 * 60);

/// NodeTracker bootstrap attempts per cycle.
const BOOTSTRAP_ATTEMPTS: u32 = 10;

/// Pause between bootstrap attempts.
const BOOTSTRAP_INTERVAL: Duration = Duration::from_millis(500);

/// Run the scanner until the process exits.
pub async fn run(ctx: Arc<AgentContext>, workspace: PathBuf) {
    loop {
        if let Err(e) = run_cycle(&ctx, &workspace).await {
            // If this keeps happening the cluster is unstable.
            error!(error = %e, "inventory cycle failed");
        }
        tokio::time::sleep(SYNC_PERIOD).await;
    }
}

async fn run_cycle(ctx: &AgentContext, workspace: &Path) -> Result<()> {
    bootstrap_node_tracker(ctx).await?;

    info!("syncing chunks");
    let walk_root = workspace.to_path_buf();
    let chunks = tokio::task::spawn_blocking(move || walk_chunks(&walk_root))
        .await
        .map_err(|e| shoal_common::Error::internal_with_context("scanner", e.to_string()))?
        .map_err(|e| shoal_common::Error::io(workspace.display().to_string(), e))?;

    tracker::publish_chunks(&ctx.client, &ctx.node_name, chunks).await
}

async fn bootstrap_node_tracker(ctx: &AgentContext) -> Result<()> {
    let mut attempts = 0;
    loop {
        attempts += 1;
        match tracker::ensure_node_tracker(&ctx.client, &ctx.node_name).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                if attempts >= BOOTSTRAP_ATTEMPTS {
                    return Err(e);
                }
                warn!(error = %e, "failed to ensure node tracker, retrying");
                tokio::time::sleep(BOOTSTRAP_INTERVAL).await;
            }
        }
    }
}

/// Walk `<workspace>/<repo>/snapshots/<revision>/<file>` symlinks, recording
/// `(basename(target), size)` per link and deduplicating by basename.
pub fn walk_chunks(workspace: &Path) -> std::io::Result<Vec<ChunkTracker>> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut chunks = Vec::new();

    let repos = match std::fs::read_dir(workspace) {
        Ok(repos) => repos,
        // An agent that has never downloaded anything has no workspace yet.
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(chunks),
        Err(e) => return Err(e),
    };

    for repo in repos {
        let repo = repo?;
        if !repo.file_type()?.is_dir() {
            continue;
        }

        let snapshots = repo.path().join("snapshots");
        let revisions = match std::fs::read_dir(&snapshots) {
            Ok(revisions) => revisions,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e),
        };

        for revision in revisions {
            let revision = revision?;
            if !revision.file_type()?.is_dir() {
                continue;
            }

            for file in std::fs::read_dir(revision.path())? {
                let file = file?;
                let path = file.path();

                let target = match std::fs::read_link(&path) {
                    Ok(target) => target,
                    // Not a symlink: not one of ours.
                    Err(_) => continue,
                };

                // Follows the link; a dangling link means a half-finished
                // replication, skipped until it completes.
                let metadata = match std::fs::metadata(&path) {
                    Ok(metadata) => metadata,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        warn!(path = %path.display(), "dangling snapshot link, skipping");
                        continue;
                    }
                    Err(e) => return Err(e),
                };

                let Some(chunk_name) = target.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };

                if seen.insert(chunk_name.to_string()) {
                    chunks.push(ChunkTracker {
                        chunk_name: chunk_name.to_string(),
                        size_bytes: metadata.len() as i64,
                    });
                }
            }
        }
    }

    Ok(chunks)
}
