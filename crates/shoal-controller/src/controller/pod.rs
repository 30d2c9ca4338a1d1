//! Preheat Pod controller
//!
//! A Pod labelled `shoal.dev/torrent-name=<T>` asks for just-in-time
//! preheating: this controller spawns an ephemeral Torrent pinned to the
//! Pod's node (`replicas=1`, `reclaimPolicy=Retain`, `ttl=0`) whose Ready
//! handling will call the Pod's preheat endpoint. The Replication flow is
//! identical to any other Torrent.

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, PostParams};
use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{debug, info, warn};

use shoal_common::crd::{ReclaimPolicy, Torrent};
use shoal_common::{Error, NODE_HOSTNAME_LABEL_KEY, PARENT_POD_ANNO_KEY, TORRENT_NAME_LABEL_KEY};

use super::Context;

/// Error policy: log and requeue.
pub fn error_policy(pod: Arc<Pod>, error: &Error, _ctx: Arc<Context>) -> Action {
    warn!(pod = %pod.name_any(), %error, "pod reconcile error, will retry");
    Action::requeue(Duration::from_secs(30))
}

/// Reconcile one labelled Pod into an ephemeral preheat Torrent.
pub async fn reconcile(pod: Arc<Pod>, ctx: Arc<Context>) -> Result<Action, Error> {
    debug!(pod = %pod.name_any(), "reconcile Pod");

    // The watch is label-filtered; double check here.
    let Some(torrent_name) = pod.labels().get(TORRENT_NAME_LABEL_KEY).cloned() else {
        return Ok(Action::await_change());
    };

    let Some(node_name) = pod.spec.as_ref().and_then(|s| s.node_name.clone()) else {
        // Not scheduled yet; a later update re-triggers us.
        return Ok(Action::await_change());
    };

    let torrents: Api<Torrent> = Api::all(ctx.client.clone());
    let parent = torrents.get(&torrent_name).await?;

    let ephemeral = construct_torrent(&parent, &pod, &node_name);
    match torrents.create(&PostParams::default(), &ephemeral).await {
        Ok(_) => {
            info!(
                torrent = %ephemeral.name_any(),
                node = %node_name,
                "created ephemeral preheat torrent"
            );
        }
        Err(kube::Error::Api(ae)) if ae.code == 409 => {
            debug!(torrent = %ephemeral.name_any(), "preheat torrent already exists");
        }
        Err(e) => return Err(e.into()),
    }

    Ok(Action::await_change())
}

/// Derive the single-node Torrent preheating the Pod's node.
fn construct_torrent(parent: &Torrent, pod: &Pod, node_name: &str) -> Torrent {
    let mut torrent = Torrent::new(
        &format!("{}--tmp--{}", parent.name_any(), node_name),
        parent.spec.clone(),
    );
    torrent.metadata.annotations = Some(
        [(
            PARENT_POD_ANNO_KEY.to_string(),
            format!("{}/{}", pod.namespace().unwrap_or_default(), pod.name_any()),
        )]
        .into_iter()
        .collect(),
    );
    torrent.spec.preheat = Some(true);
    torrent.spec.replicas = Some(1);
    torrent.spec.reclaim_policy = Some(ReclaimPolicy::Retain);
    torrent.spec.ttl_seconds_after_ready = Some(0);
    torrent.spec.node_selector = Some(
        [(NODE_HOSTNAME_LABEL_KEY.to_string(), node_name.to_string())]
            .into_iter()
            .collect(),
    );
    torrent
}

#[cfg(test)]
mod tests {
    use super::*;
    use shoal_common::crd::{Hub, TorrentSpec};

    fn parent() -> Torrent {
        Torrent::new(
            "opt-125m",
            TorrentSpec {
                hub: Some(Hub {
                    repo_id: "facebook/opt-125m".into(),
                    ..Default::default()
                }),
                replicas: Some(3),
                reclaim_policy: Some(ReclaimPolicy::Delete),
                ..Default::default()
            },
        )
    }

    fn pod(namespace: &str, name: &str) -> Pod {
        let mut pod = Pod::default();
        pod.metadata.name = Some(name.to_string());
        pod.metadata.namespace = Some(namespace.to_string());
        pod
    }

    #[test]
    fn ephemeral_torrent_pins_the_pod_node() {
        let torrent = construct_torrent(&parent(), &pod("default", "vllm-0"), "node7");

        assert_eq!(torrent.name_any(), "opt-125m--tmp--node7");
        assert_eq!(torrent.spec.replicas, Some(1));
        assert_eq!(torrent.spec.reclaim_policy, Some(ReclaimPolicy::Retain));
        assert_eq!(torrent.spec.ttl_seconds_after_ready, Some(0));
        assert_eq!(torrent.spec.preheat, Some(true));
        assert_eq!(
            torrent
                .spec
                .node_selector
                .as_ref()
                .unwrap()
                .get(NODE_HOSTNAME_LABEL_KEY)
                .map(String::as_str),
            Some("node7")
        );
        assert_eq!(
            torrent.annotations().get(PARENT_POD_ANNO_KEY).unwrap(),
            "default/vllm-0"
        );
        // Hub carries over from the parent.
        assert_eq!(
            torrent.spec.hub.as_ref().unwrap().repo_id,
            "facebook/opt-125m"
        );
    }
}
