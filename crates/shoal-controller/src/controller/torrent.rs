//! Torrent reconciliation: the placement controller
//!
//! Drives a Torrent through its lifecycle:
//! - creation: add the protection finalizer, resolve the origin catalog once
//! - dispatch: schedule every pending chunk into Replications
//! - ready: preheat callback, TTL handling, Replication cleanup
//! - deletion: reclaim chunks per the reclaim policy, then drop the finalizer
//!
//! Reconciles are idempotent: Replication names are deterministic and
//! "already exists" on create is absorbed.

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{debug, info, warn};

use shoal_common::conditions::{is_condition_true, new_condition, set_condition};
use shoal_common::crd::{
    ChunkStatus, NodeTracker, ObjectStatus, ObjectType, ReclaimPolicy, RepoStatus, Replication,
    Torrent, TrackerState, PENDING_CONDITION_TYPE, READY_CONDITION_TYPE,
    RECLAIMING_CONDITION_TYPE, REPLICATING_CONDITION_TYPE,
};
use shoal_common::{
    Error, HTTP_PORT, PARENT_POD_ANNO_KEY, TORRENT_NAME_LABEL_KEY, TORRENT_PROTECTION_FINALIZER,
};

use super::Context;
use crate::hub::RepoObject;

/// Name of the preheat init container whose readiness gates the callback.
const PREHEAT_CONTAINER_NAME: &str = "preheat";

/// Field manager for server-side patches issued by this controller.
const FIELD_MANAGER: &str = "shoal-placement-controller";

/// Error policy: log and requeue with a delay.
pub fn error_policy(torrent: Arc<Torrent>, error: &Error, _ctx: Arc<Context>) -> Action {
    warn!(torrent = %torrent.name_any(), %error, "torrent reconcile error, will retry");
    Action::requeue(Duration::from_secs(30))
}

/// Reconcile one Torrent.
pub async fn reconcile(torrent: Arc<Torrent>, ctx: Arc<Context>) -> Result<Action, Error> {
    let name = torrent.name_any();
    debug!(torrent = %name, "reconcile Torrent");

    // Preheat gate: nothing to do until the user asks for bytes to move.
    if !torrent.preheat() {
        return Ok(Action::await_change());
    }

    if torrent_ready(&torrent) && torrent_deleting(&torrent) {
        info!(torrent = %name, "handling torrent deletion");
        return handle_deletion(&torrent, &ctx).await;
    }

    if torrent_ready(&torrent) {
        info!(torrent = %name, "handling torrent ready");
        return handle_ready(&torrent, &ctx).await;
    }

    if torrent.status.as_ref().and_then(|s| s.repo.as_ref()).is_none() {
        info!(torrent = %name, "handling torrent creation");
        return handle_creation(&torrent, &ctx).await;
    }

    handle_dispatch(&torrent, &ctx).await
}

/// Creation branch: protect the object with a finalizer, then resolve the
/// origin catalog exactly once into `status.repo`.
async fn handle_creation(torrent: &Torrent, ctx: &Context) -> Result<Action, Error> {
    add_finalizer(torrent, ctx).await?;

    let hub = torrent
        .spec
        .hub
        .clone()
        .ok_or_else(|| Error::validation_for(torrent.name_any(), "hub can't be null"))?;

    let objects = ctx
        .catalog
        .list_repo_objects(&hub.repo_id, hub.revision())
        .await?;

    let mut updated = torrent.clone();
    let status = updated.status.get_or_insert_with(Default::default);
    status.repo = Some(construct_repo_status(
        hub.filename.as_deref(),
        &objects,
    ));

    set_torrent_condition_to(
        &mut updated,
        new_condition(
            PENDING_CONDITION_TYPE,
            "Pending",
            "Waiting for Replication creations",
        ),
    );

    update_status(&updated, ctx).await?;
    Ok(Action::await_change())
}

/// Deletion branch: Retain drops the finalizer immediately; Delete emits
/// reclaim Replications and drops the finalizer once they all report Ready.
async fn handle_deletion(torrent: &Torrent, ctx: &Context) -> Result<Action, Error> {
    match torrent.reclaim_policy() {
        ReclaimPolicy::Retain => {
            remove_finalizer(torrent, ctx).await?;
            Ok(Action::await_change())
        }
        ReclaimPolicy::Delete => {
            let mut updated = torrent.clone();
            let prepared = ctx.dispatcher.reclaim_replications(&mut updated)?;

            create_replications(&prepared.replications, ctx).await?;

            let condition_changed = set_torrent_condition_to(
                &mut updated,
                new_condition(RECLAIMING_CONDITION_TYPE, "Reclaiming", "Deleting chunks"),
            );
            if prepared.status_changed || condition_changed {
                update_status(&updated, ctx).await?;
            }

            let replications = owned_replications(torrent, ctx).await?;
            if replications_ready(&replications) {
                remove_finalizer(torrent, ctx).await?;
            }
            Ok(Action::await_change())
        }
    }
}

/// Ready branch: notify the parent Pod (preheat flow), honor a zero TTL, and
/// garbage-collect the finished work orders.
async fn handle_ready(torrent: &Torrent, ctx: &Context) -> Result<Action, Error> {
    if torrent
        .annotations()
        .get(PARENT_POD_ANNO_KEY)
        .is_some()
    {
        preheat_callback(torrent, ctx).await?;
    }

    if torrent.ttl_is_zero() {
        // Owned Replications are garbage-collected with the Torrent.
        let api: Api<Torrent> = Api::all(ctx.client.clone());
        api.delete(&torrent.name_any(), &DeleteParams::default())
            .await?;
        return Ok(Action::await_change());
    }

    let replications = owned_replications(torrent, ctx).await?;
    let api: Api<Replication> = Api::all(ctx.client.clone());
    for replication in replications {
        api.delete(&replication.name_any(), &DeleteParams::default())
            .await?;
    }
    Ok(Action::await_change())
}

/// Dispatch branch: schedule pending chunks and converge conditions.
async fn handle_dispatch(torrent: &Torrent, ctx: &Context) -> Result<Action, Error> {
    let tracker_api: Api<NodeTracker> = Api::all(ctx.client.clone());
    let trackers = tracker_api.list(&ListParams::default()).await?.items;

    let mut updated = torrent.clone();
    let prepared = ctx
        .dispatcher
        .prepare_replications(&mut updated, &trackers)?;

    // First-time shortcut: every chunk was already present everywhere needed.
    if prepared.replications.is_empty() && prepared.fully_satisfied {
        let changed = set_torrent_condition_to(
            &mut updated,
            new_condition(
                READY_CONDITION_TYPE,
                "Ready",
                "All chunks are replicated already",
            ),
        );
        if changed {
            update_status(&updated, ctx).await?;
        }
        return Ok(Action::await_change());
    }

    create_replications(&prepared.replications, ctx).await?;

    let replications = owned_replications(torrent, ctx).await?;
    let condition_changed = set_torrent_condition(&mut updated, &replications);
    if prepared.status_changed || condition_changed {
        update_status(&updated, ctx).await?;
    }

    Ok(Action::await_change())
}

/// Create work orders, absorbing duplicates: deterministic names make a
/// re-created Replication collide with the one already accepted.
async fn create_replications(replications: &[Replication], ctx: &Context) -> Result<(), Error> {
    let api: Api<Replication> = Api::all(ctx.client.clone());
    for replication in replications {
        match api.create(&PostParams::default(), replication).await {
            Ok(_) => {}
            Err(kube::Error::Api(ae)) if ae.code == 409 => {
                debug!(replication = %replication.name_any(), "replication already exists");
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// List the Replications owned by this Torrent (via the torrent-name label).
async fn owned_replications(torrent: &Torrent, ctx: &Context) -> Result<Vec<Replication>, Error> {
    let api: Api<Replication> = Api::all(ctx.client.clone());
    let params = ListParams::default().labels(&format!(
        "{}={}",
        TORRENT_NAME_LABEL_KEY,
        torrent.name_any()
    ));
    Ok(api.list(&params).await?.items)
}

/// POST to the parent Pod's preheat endpoint, unless the preheat container
/// already reported ready (the callback fires at most once).
async fn preheat_callback(torrent: &Torrent, ctx: &Context) -> Result<(), Error> {
    let annotation = torrent
        .annotations()
        .get(PARENT_POD_ANNO_KEY)
        .cloned()
        .unwrap_or_default();
    let Some((namespace, pod_name)) = annotation.split_once('/') else {
        return Err(Error::validation_for(
            torrent.name_any(),
            format!("malformed parent pod annotation {annotation:?}"),
        ));
    };

    let pods: Api<Pod> = Api::namespaced(ctx.client.clone(), namespace);
    let pod = pods.get(pod_name).await?;

    // Once invoked, no need to call again.
    let already_ready = pod
        .status
        .as_ref()
        .and_then(|s| s.init_container_statuses.as_ref())
        .map(|statuses| {
            statuses
                .iter()
                .any(|s| s.name == PREHEAT_CONTAINER_NAME && s.ready)
        })
        .unwrap_or(false);
    if already_ready {
        return Ok(());
    }

    let pod_ip = pod
        .status
        .as_ref()
        .and_then(|s| s.pod_ip.clone())
        .ok_or_else(|| Error::internal_with_context("preheat", "parent pod has no IP"))?;

    let url = format!("http://{pod_ip}:{HTTP_PORT}/preheated");
    let response = ctx
        .http
        .post(&url)
        .send()
        .await
        .map_err(|e| Error::internal_with_context("preheat", format!("callback failed: {e}")))?;

    if !response.status().is_success() {
        return Err(Error::internal_with_context(
            "preheat",
            format!("callback returned status {}", response.status()),
        ));
    }
    Ok(())
}

async fn add_finalizer(torrent: &Torrent, ctx: &Context) -> Result<(), Error> {
    let mut finalizers = torrent.finalizers().to_vec();
    if finalizers.iter().any(|f| f == TORRENT_PROTECTION_FINALIZER) {
        return Ok(());
    }
    finalizers.push(TORRENT_PROTECTION_FINALIZER.to_string());
    patch_finalizers(torrent, finalizers, ctx).await
}

async fn remove_finalizer(torrent: &Torrent, ctx: &Context) -> Result<(), Error> {
    let finalizers: Vec<String> = torrent
        .finalizers()
        .iter()
        .filter(|f| *f != TORRENT_PROTECTION_FINALIZER)
        .cloned()
        .collect();
    if finalizers.len() == torrent.finalizers().len() {
        return Ok(());
    }
    patch_finalizers(torrent, finalizers, ctx).await
}

async fn patch_finalizers(
    torrent: &Torrent,
    finalizers: Vec<String>,
    ctx: &Context,
) -> Result<(), Error> {
    let api: Api<Torrent> = Api::all(ctx.client.clone());
    let patch = serde_json::json!({ "metadata": { "finalizers": finalizers } });
    api.patch(
        &torrent.name_any(),
        &PatchParams::default(),
        &Patch::Merge(&patch),
    )
    .await?;
    Ok(())
}

/// One status update per reconcile.
async fn update_status(torrent: &Torrent, ctx: &Context) -> Result<(), Error> {
    let api: Api<Torrent> = Api::all(ctx.client.clone());
    let patch = serde_json::json!({ "status": torrent.status });
    api.patch_status(
        &torrent.name_any(),
        &PatchParams::apply(FIELD_MANAGER),
        &Patch::Merge(&patch),
    )
    .await?;
    Ok(())
}

// =============================================================================
// Condition machinery
// =============================================================================

/// Recompute the Torrent condition from its flags and owned Replications.
/// Returns true when the status changed.
fn set_torrent_condition(torrent: &mut Torrent, replications: &[Replication]) -> bool {
    if torrent.status.as_ref().and_then(|s| s.repo.as_ref()).is_none() {
        return set_torrent_condition_to(
            torrent,
            new_condition(
                PENDING_CONDITION_TYPE,
                "Pending",
                "Waiting for Replication creations",
            ),
        );
    }

    if torrent_ready(torrent) && torrent_deleting(torrent) {
        return set_torrent_condition_to(
            torrent,
            new_condition(RECLAIMING_CONDITION_TYPE, "Reclaiming", "Deleting chunks"),
        );
    }

    if torrent_ready(torrent) {
        return false;
    }

    let conditions = torrent
        .status
        .as_ref()
        .map(|s| s.conditions.as_slice())
        .unwrap_or_default();

    // Ready only after Replicating was observed: a Torrent never skips the
    // replication phase in its condition log.
    if is_condition_true(conditions, REPLICATING_CONDITION_TYPE)
        && replications_ready(replications)
    {
        return set_torrent_condition_to(
            torrent,
            new_condition(
                READY_CONDITION_TYPE,
                "Ready",
                "Chunks replicated successfully",
            ),
        );
    }

    if any_replicating(replications) {
        return set_torrent_condition_to(
            torrent,
            new_condition(
                REPLICATING_CONDITION_TYPE,
                "Replicating",
                "Replicating chunks",
            ),
        );
    }

    false
}

/// Apply the condition and project it into `status.phase`.
fn set_torrent_condition_to(
    torrent: &mut Torrent,
    condition: k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition,
) -> bool {
    let status = torrent.status.get_or_insert_with(Default::default);
    status.phase = Some(condition.type_.clone());
    set_condition(&mut status.conditions, condition)
}

fn torrent_ready(torrent: &Torrent) -> bool {
    torrent
        .status
        .as_ref()
        .map(|s| is_condition_true(&s.conditions, READY_CONDITION_TYPE))
        .unwrap_or(false)
}

fn torrent_deleting(torrent: &Torrent) -> bool {
    torrent.metadata.deletion_timestamp.is_some()
}

fn any_replicating(replications: &[Replication]) -> bool {
    replications.iter().any(|r| {
        r.status
            .as_ref()
            .map(|s| is_condition_true(&s.conditions, REPLICATING_CONDITION_TYPE))
            .unwrap_or(false)
    })
}

fn replications_ready(replications: &[Replication]) -> bool {
    replications.iter().all(|r| {
        r.status
            .as_ref()
            .map(|s| is_condition_true(&s.conditions, READY_CONDITION_TYPE))
            .unwrap_or(false)
    })
}

/// Build `status.repo` from the catalog listing. One chunk per file for now;
/// directory entries are carried without chunks. A `filename` restriction
/// keeps that single file.
fn construct_repo_status(filename: Option<&str>, objects: &[RepoObject]) -> RepoStatus {
    let mut repo = RepoStatus::default();

    for object in objects {
        if let Some(wanted) = filename {
            if object.path != wanted {
                continue;
            }
        }

        let object_type = if object.object_type == "directory" {
            ObjectType::Directory
        } else {
            ObjectType::File
        };

        let chunks = if object_type == ObjectType::File {
            vec![ChunkStatus {
                name: format!("{}--0001", object.oid),
                size_bytes: object.size,
                state: TrackerState::Pending,
            }]
        } else {
            Vec::new()
        };

        repo.objects.push(ObjectStatus {
            path: object.path.clone(),
            object_type,
            chunks,
        });

        if filename.is_some() {
            break;
        }
    }

    repo
}
