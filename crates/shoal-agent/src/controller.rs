//! Agent Replication reconciler
//!
//! Executes the work orders targeting this node. State machine per order:
//! `[new] → Pending → Replicating → Ready`; the transition into Replicating
//! is persisted before any I/O starts, and Ready only after the bytes (or
//! their removal) are on disk. Foreign, finished, and deleting orders are
//! skipped.

use std::sync::Arc;
use std::time::Duration;

use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{debug, info, warn};

use shoal_common::conditions::{is_condition_true, new_condition, set_condition};
use shoal_common::crd::{Replication, READY_CONDITION_TYPE, REPLICATING_CONDITION_TYPE};
use shoal_common::Error;

use crate::handler;
use crate::tracker;
use crate::AgentContext;

/// Error policy: log and requeue. Transient download failures land here and
/// retry with the partial blob still on disk.
pub fn error_policy(replication: Arc<Replication>, error: &Error, _ctx: Arc<AgentContext>) -> Action {
    warn!(replication = %replication.name_any(), %error, "replication execution error, will retry");
    Action::requeue(Duration::from_secs(15))
}

/// Reconcile one Replication on this node.
pub async fn reconcile(
    replication: Arc<Replication>,
    ctx: Arc<AgentContext>,
) -> Result<Action, Error> {
    // Filter out unrelated events.
    if replication.spec.node_name != ctx.node_name
        || replication_ready(&replication)
        || replication.metadata.deletion_timestamp.is_some()
    {
        debug!(replication = %replication.name_any(), "skipping replication");
        return Ok(Action::await_change());
    }

    info!(replication = %replication.name_any(), chunk = %replication.spec.chunk_name, "executing replication");

    // Persist Replicating before starting work: a crash mid-transfer leaves
    // the order visibly in progress, and the parent Torrent phase follows.
    set_replication_condition(&ctx, &replication, REPLICATING_CONDITION_TYPE).await?;

    // This can run for a long time; concurrency is bounded by the
    // controller's worker count.
    handler::execute(&ctx, &replication).await?;

    set_replication_condition(&ctx, &replication, READY_CONDITION_TYPE).await?;

    // Publish the inventory change right away rather than waiting for the
    // next scanner cycle.
    if replication.spec.destination.is_none() {
        tracker::untrack_chunk(&ctx.client, &ctx.node_name, &replication.spec.chunk_name).await?;
    } else {
        tracker::track_chunk(
            &ctx.client,
            &ctx.node_name,
            &replication.spec.chunk_name,
            replication.spec.size_bytes,
        )
        .await?;
    }

    Ok(Action::await_change())
}

/// Set a condition (and the matching phase) on the Replication status.
async fn set_replication_condition(
    ctx: &AgentContext,
    replication: &Replication,
    condition_type: &str,
) -> Result<(), Error> {
    let mut status = replication.status.clone().unwrap_or_default();

    let condition = match condition_type {
        REPLICATING_CONDITION_TYPE => new_condition(
            REPLICATING_CONDITION_TYPE,
            "Replicating",
            "Replicating chunks",
        ),
        _ => new_condition(READY_CONDITION_TYPE, "Ready", "Replicated chunks successfully"),
    };

    let changed = set_condition(&mut status.conditions, condition);
    let phase_changed = status.phase.as_deref() != Some(condition_type);
    if !changed && !phase_changed {
        return Ok(());
    }
    status.phase = Some(condition_type.to_string());

    let api: Api<Replication> = Api::all(ctx.client.clone());
    api.patch_status(
        &replication.name_any(),
        &PatchParams::default(),
        &Patch::Merge(&serde_json::json!({ "status": status })),
    )
    .await?;
    Ok(())
}

fn replication_ready(replication: &Replication) -> bool {
    replication
        .status
        .as_ref()
        .map(|s| is_condition_true(&s.conditions, READY_CONDITION_TYPE))
        .unwrap_or(false)
}
