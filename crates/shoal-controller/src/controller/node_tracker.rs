//! NodeTracker lifecycle
//!
//! Two responsibilities, split across two loops:
//!
//! - [`run_index_feed`] tails NodeTracker watch events and keeps the live
//!   [`ChunkIndex`](crate::index::ChunkIndex) in step with fleet inventory.
//!   The index is never persisted; a watch restart replays the full list and
//!   reconverges it.
//! - [`reconcile`] mirrors Node label drift onto the NodeTracker so the
//!   NodeSelector plugin can match against fresh labels.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Node;
use kube::api::{Api, PostParams};
use kube::runtime::controller::Action;
use kube::runtime::watcher;
use kube::{Client, ResourceExt};
use tracing::{debug, warn};

use shoal_common::crd::NodeTracker;
use shoal_common::Error;

use super::Context;
use crate::index::ChunkIndex;

/// Error policy for the label mirror.
pub fn error_policy(tracker: Arc<NodeTracker>, error: &Error, _ctx: Arc<Context>) -> Action {
    warn!(node_tracker = %tracker.name_any(), %error, "node tracker reconcile error, will retry");
    Action::requeue(Duration::from_secs(30))
}

/// Mirror the underlying Node's labels onto the NodeTracker.
pub async fn reconcile(tracker: Arc<NodeTracker>, ctx: Arc<Context>) -> Result<Action, Error> {
    let name = tracker.name_any();
    debug!(node_tracker = %name, "reconcile NodeTracker");

    let nodes: Api<Node> = Api::all(ctx.client.clone());
    let node = match nodes.get(&name).await {
        Ok(node) => node,
        // No backing Node (e.g. integration environments): nothing to mirror.
        Err(kube::Error::Api(ae)) if ae.code == 404 => return Ok(Action::await_change()),
        Err(e) => return Err(e.into()),
    };

    if node.metadata.labels != tracker.metadata.labels {
        let mut updated = (*tracker).clone();
        updated.metadata.labels = node.metadata.labels.clone();
        updated.metadata.managed_fields = None;

        let api: Api<NodeTracker> = Api::all(ctx.client.clone());
        api.replace(&name, &PostParams::default(), &updated).await?;
    }

    Ok(Action::await_change())
}

/// Tail NodeTracker events into the chunk index. Runs for the life of the
/// process; watch errors are logged and the underlying watcher backs off and
/// resumes on its own.
pub async fn run_index_feed(client: Client, index: Arc<ChunkIndex>) {
    let api: Api<NodeTracker> = Api::all(client);
    let mut stream = std::pin::pin!(watcher(api, watcher::Config::default()));

    // Names seen during a (re)list, used to drop stale nodes afterwards.
    let mut relist_seen: Option<HashSet<String>> = None;

    while let Some(event) = stream.next().await {
        match event {
            Ok(watcher::Event::Init) => {
                relist_seen = Some(HashSet::new());
            }
            Ok(watcher::Event::InitApply(tracker)) => {
                let name = tracker.name_any();
                if let Some(seen) = relist_seen.as_mut() {
                    seen.insert(name.clone());
                }
                index.sync_node(&name, &tracker.spec.chunks);
            }
            Ok(watcher::Event::InitDone) => {
                if let Some(seen) = relist_seen.take() {
                    for node in index.node_names() {
                        if !seen.contains(&node) {
                            debug!(node = %node, "dropping node absent from relist");
                            index.remove_node(&node);
                        }
                    }
                }
            }
            Ok(watcher::Event::Apply(tracker)) => {
                index.sync_node(&tracker.name_any(), &tracker.spec.chunks);
            }
            Ok(watcher::Event::Delete(tracker)) => {
                index.remove_node(&tracker.name_any());
            }
            Err(error) => {
                warn!(%error, "node tracker watch error");
            }
        }
    }
}
