//! Central Replication reconciler
//!
//! Stamps the initial `Pending` condition on freshly created work orders.
//! Everything after that (Replicating, Ready) is the owning node's agent.

use std::sync::Arc;
use std::time::Duration;

use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{debug, warn};

use shoal_common::conditions::{new_condition, set_condition};
use shoal_common::crd::{Replication, ReplicationStatus, PENDING_CONDITION_TYPE};
use shoal_common::Error;

use super::Context;

/// Error policy: log and requeue.
pub fn error_policy(replication: Arc<Replication>, error: &Error, _ctx: Arc<Context>) -> Action {
    warn!(replication = %replication.name_any(), %error, "replication reconcile error, will retry");
    Action::requeue(Duration::from_secs(30))
}

/// Reconcile one Replication.
pub async fn reconcile(
    replication: Arc<Replication>,
    ctx: Arc<Context>,
) -> Result<Action, Error> {
    debug!(replication = %replication.name_any(), "reconcile Replication");

    let has_conditions = replication
        .status
        .as_ref()
        .map(|s| !s.conditions.is_empty())
        .unwrap_or(false);
    if has_conditions {
        return Ok(Action::await_change());
    }

    let mut status = ReplicationStatus::default();
    set_condition(
        &mut status.conditions,
        new_condition(PENDING_CONDITION_TYPE, "Pending", "Waiting for downloading"),
    );
    status.phase = Some(PENDING_CONDITION_TYPE.to_string());

    let api: Api<Replication> = Api::all(ctx.client.clone());
    api.patch_status(
        &replication.name_any(),
        &PatchParams::default(),
        &Patch::Merge(&serde_json::json!({ "status": status })),
    )
    .await?;

    Ok(Action::await_change())
}
