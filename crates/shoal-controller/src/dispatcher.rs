//! Chunk dispatcher
//!
//! Turns a Torrent's pending chunks into Replication work orders. Each pass
//! snapshots the [`ChunkIndex`], consults the *live* index to decide
//! download-vs-sync per chunk, schedules candidates through the plugin
//! frameworks, and mutates the snapshot after every emission so one pass
//! cannot oversubscribe a node. Replication names are deterministic, so
//! emission is idempotent across passes: a duplicate create is absorbed by
//! the API server.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::ObjectMeta;
use kube::ResourceExt;
use tracing::warn;

use shoal_common::crd::{
    ChunkTracker, Hub, NodeTracker, Replication, ReplicationSpec, Target, Torrent, TrackerState,
};
use shoal_common::{Result, API_GROUP, API_VERSION, TORRENT_NAME_LABEL_KEY};

use crate::framework::{plugins, ChunkRequest, Framework, ScoredNode};
use crate::index::{ChunkIndex, IndexSnapshot};

/// Outcome of one dispatch pass.
#[derive(Debug, Default)]
pub struct PreparedDispatch {
    /// Work orders to create (duplicates are absorbed by the object store).
    pub replications: Vec<Replication>,
    /// Whether the Torrent status (chunk states) changed.
    pub status_changed: bool,
    /// True when this pass processed pending chunks and found every one of
    /// them already satisfied: the caller may mark the Torrent Ready
    /// directly without waiting on Replications.
    pub fully_satisfied: bool,
}

/// Outcome of a reclaim pass.
#[derive(Debug, Default)]
pub struct PreparedReclaim {
    /// Deletion work orders, one per (chunk, holder).
    pub replications: Vec<Replication>,
    /// Whether the Torrent status (chunk states) changed.
    pub status_changed: bool,
}

/// The placement scheduler: owns the chunk index and the two plugin
/// frameworks (downloads schedule against no source node, syncs against a
/// specific holder).
pub struct Dispatcher {
    index: Arc<ChunkIndex>,
    downloader: Framework,
    syncer: Framework,
    workspace: String,
}

impl Dispatcher {
    /// Build a dispatcher with the default plugin line-up.
    pub fn new(index: Arc<ChunkIndex>, workspace: impl Into<String>) -> Result<Self> {
        let mut workspace = workspace.into();
        if !workspace.ends_with('/') {
            workspace.push('/');
        }
        Ok(Self {
            index,
            downloader: Framework::with_plugins(plugins::default_registrations())?,
            syncer: Framework::with_plugins(plugins::default_registrations())?,
            workspace,
        })
    }

    /// The live chunk index.
    pub fn index(&self) -> &Arc<ChunkIndex> {
        &self.index
    }

    /// Construct the Replications needed for every pending chunk of the
    /// Torrent, flipping chunk states to Ready (= dispatched) as it goes.
    ///
    /// The same download/sync task is never sent to two passes' worth of the
    /// same node: names are deterministic and the snapshot absorbs in-pass
    /// placements.
    pub fn prepare_replications(
        &self,
        torrent: &mut Torrent,
        trackers: &[NodeTracker],
    ) -> Result<PreparedDispatch> {
        let Some(hub) = torrent.spec.hub.clone() else {
            // The webhook rejects hub-less Torrents; reaching here means the
            // declaration bypassed admission.
            return Err(shoal_common::Error::validation_for(
                torrent.name_any(),
                "hub can't be null at dispatch",
            ));
        };

        let torrent_name = torrent.name_any();
        let torrent_uid = torrent.metadata.uid.clone().unwrap_or_default();
        let replicas = torrent.replicas();
        let node_selector = torrent.spec.node_selector.clone().unwrap_or_default();

        let Some(repo) = torrent.status.as_mut().and_then(|s| s.repo.as_mut()) else {
            return Ok(PreparedDispatch::default());
        };

        // The snapshot gives this pass a stable view; the live index is
        // still consulted per chunk for the download-vs-sync decision so a
        // concurrent Torrent's convergence is picked up as early as possible.
        let mut snapshot = self.index.snapshot();
        let mut out = PreparedDispatch::default();
        let mut processed_any = false;
        let mut left_pending = false;

        for object in &mut repo.objects {
            for chunk in &mut object.chunks {
                if chunk.state != TrackerState::Pending {
                    continue;
                }
                processed_any = true;

                let request = ChunkRequest {
                    name: chunk.name.clone(),
                    size_bytes: chunk.size_bytes,
                    path: object.path.clone(),
                    node_selector: node_selector.clone(),
                };

                let emitted = if self.index.chunk_exists(&chunk.name) {
                    self.schedule_sync(
                        &torrent_name,
                        &torrent_uid,
                        &hub,
                        &request,
                        replicas,
                        trackers,
                        &mut snapshot,
                        &mut out.replications,
                    )
                } else {
                    self.schedule_download(
                        &torrent_name,
                        &torrent_uid,
                        &hub,
                        &request,
                        replicas,
                        trackers,
                        &mut snapshot,
                        &mut out.replications,
                    )
                };

                if emitted {
                    chunk.state = TrackerState::Ready;
                    out.status_changed = true;
                } else {
                    left_pending = true;
                }
            }
        }

        out.fully_satisfied = processed_any && !left_pending;
        Ok(out)
    }

    /// Schedule origin downloads for a chunk nobody holds yet. Returns false
    /// when no candidate survives filtering (the chunk stays Pending and the
    /// next reconcile retries).
    #[allow(clippy::too_many_arguments)]
    fn schedule_download(
        &self,
        torrent_name: &str,
        torrent_uid: &str,
        hub: &Hub,
        request: &ChunkRequest,
        replicas: i32,
        trackers: &[NodeTracker],
        snapshot: &mut IndexSnapshot,
        replications: &mut Vec<Replication>,
    ) -> bool {
        let candidates = self
            .downloader
            .run_filter(request, None, trackers, snapshot);
        if candidates.is_empty() {
            warn!(
                torrent = torrent_name,
                chunk = %request.name,
                "no available candidate, chunk left pending"
            );
            return false;
        }

        let mut scored = self
            .downloader
            .run_score(request, None, &candidates, snapshot);
        sort_by_score(&mut scored);

        for candidate in scored.into_iter().take(replicas.max(0) as usize) {
            replications.push(self.build_download_replication(
                torrent_name,
                torrent_uid,
                hub,
                request,
                &candidate.node_name,
            ));
            snapshot.add_chunks(
                &candidate.node_name,
                &[ChunkTracker {
                    chunk_name: request.name.clone(),
                    size_bytes: request.size_bytes,
                }],
            );
        }
        true
    }

    /// Schedule peer syncs for a chunk some nodes already hold. The replica
    /// budget is reduced by the existing holders; each remaining placement
    /// copies from whichever (holder, target) pair scored best.
    #[allow(clippy::too_many_arguments)]
    fn schedule_sync(
        &self,
        torrent_name: &str,
        torrent_uid: &str,
        hub: &Hub,
        request: &ChunkRequest,
        replicas: i32,
        trackers: &[NodeTracker],
        snapshot: &mut IndexSnapshot,
        replications: &mut Vec<Replication>,
    ) -> bool {
        let holders = self.index.chunk_nodes(&request.name);
        let budget = replicas - holders.len() as i32;
        if budget <= 0 {
            return true;
        }

        struct SyncCandidate {
            source: String,
            target: String,
            score: f32,
        }

        let mut scored: Vec<SyncCandidate> = Vec::new();
        for holder in &holders {
            let candidates = self
                .syncer
                .run_filter(request, Some(holder.as_str()), trackers, snapshot);
            // A node already holding the chunk (in the snapshot, which also
            // reflects this pass's placements) is not a sync target.
            let candidates: Vec<&NodeTracker> = candidates
                .into_iter()
                .filter(|nt| !snapshot.chunk_exists_in_node(&nt.name_any(), &request.name))
                .collect();

            for node in self
                .syncer
                .run_score(request, Some(holder.as_str()), &candidates, snapshot)
            {
                scored.push(SyncCandidate {
                    source: holder.clone(),
                    target: node.node_name,
                    score: node.score,
                });
            }
        }

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));

        let mut chosen: HashSet<String> = HashSet::new();
        for candidate in scored {
            if chosen.len() as i32 >= budget {
                break;
            }
            if chosen.contains(&candidate.target) {
                continue;
            }

            replications.push(self.build_sync_replication(
                torrent_name,
                torrent_uid,
                hub,
                request,
                &candidate.source,
                &candidate.target,
            ));
            snapshot.add_chunks(
                &candidate.target,
                &[ChunkTracker {
                    chunk_name: request.name.clone(),
                    size_bytes: request.size_bytes,
                }],
            );
            chosen.insert(candidate.target);
        }

        true
    }

    /// Construct the deletion Replications reclaiming every chunk of the
    /// Torrent from every holder, flipping chunk states to Deleting.
    pub fn reclaim_replications(&self, torrent: &mut Torrent) -> Result<PreparedReclaim> {
        let Some(hub) = torrent.spec.hub.clone() else {
            return Err(shoal_common::Error::validation_for(
                torrent.name_any(),
                "hub can't be null at reclaim",
            ));
        };

        let torrent_name = torrent.name_any();
        let torrent_uid = torrent.metadata.uid.clone().unwrap_or_default();

        let Some(repo) = torrent.status.as_mut().and_then(|s| s.repo.as_mut()) else {
            return Ok(PreparedReclaim::default());
        };

        let mut out = PreparedReclaim::default();

        for object in &mut repo.objects {
            for chunk in &mut object.chunks {
                if chunk.state == TrackerState::Deleting {
                    continue;
                }

                for holder in self.index.chunk_nodes(&chunk.name) {
                    let snapshot_path = self.snapshot_path(&hub, &object.path);
                    out.replications.push(build_replication(
                        deletion_name(&chunk.name, &holder),
                        &torrent_name,
                        &torrent_uid,
                        ReplicationSpec {
                            node_name: holder,
                            chunk_name: chunk.name.clone(),
                            size_bytes: chunk.size_bytes,
                            source: Target::from_uri(format!("localhost://{snapshot_path}")),
                            destination: None,
                        },
                    ));
                }

                chunk.state = TrackerState::Deleting;
                out.status_changed = true;
            }
        }

        Ok(out)
    }

    /// `<workspace><repoSlug>/blobs/<chunkName>`
    fn blob_path(&self, hub: &Hub, chunk_name: &str) -> String {
        format!("{}{}/blobs/{}", self.workspace, hub.repo_slug(), chunk_name)
    }

    /// `<workspace><repoSlug>/snapshots/<revision>/<filePath>`
    fn snapshot_path(&self, hub: &Hub, file_path: &str) -> String {
        format!(
            "{}{}/snapshots/{}/{}",
            self.workspace,
            hub.repo_slug(),
            hub.revision(),
            file_path
        )
    }

    fn build_download_replication(
        &self,
        torrent_name: &str,
        torrent_uid: &str,
        hub: &Hub,
        request: &ChunkRequest,
        node_name: &str,
    ) -> Replication {
        build_replication(
            replication_name(&request.name, node_name),
            torrent_name,
            torrent_uid,
            ReplicationSpec {
                node_name: node_name.to_string(),
                chunk_name: request.name.clone(),
                size_bytes: request.size_bytes,
                source: Target::from_hub(Hub {
                    name: hub.name.clone(),
                    repo_id: hub.repo_id.clone(),
                    filename: Some(request.path.clone()),
                    revision: hub.revision.clone(),
                }),
                destination: Some(Target::from_uri(format!(
                    "localhost://{}",
                    self.blob_path(hub, &request.name)
                ))),
            },
        )
    }

    fn build_sync_replication(
        &self,
        torrent_name: &str,
        torrent_uid: &str,
        hub: &Hub,
        request: &ChunkRequest,
        source_node: &str,
        target_node: &str,
    ) -> Replication {
        let blob_path = self.blob_path(hub, &request.name);
        build_replication(
            replication_name(&request.name, target_node),
            torrent_name,
            torrent_uid,
            ReplicationSpec {
                node_name: target_node.to_string(),
                chunk_name: request.name.clone(),
                size_bytes: request.size_bytes,
                source: Target::from_uri(format!("remote://{source_node}@{blob_path}")),
                destination: Some(Target::from_uri(format!("localhost://{blob_path}"))),
            },
        )
    }
}

/// Deterministic name for a create/sync order: `<chunk>--<hash5(node)>`.
/// Determinism makes re-creation within a reconcile idempotent.
pub fn replication_name(chunk_name: &str, node_name: &str) -> String {
    format!("{chunk_name}--{}", hash5(node_name))
}

/// Deterministic name for a deletion order: the create name plus `--d`.
pub fn deletion_name(chunk_name: &str, node_name: &str) -> String {
    format!("{chunk_name}--{}--d", hash5(node_name))
}

/// First five hex chars of the SHA-256 of the input.
fn hash5(input: &str) -> String {
    use aws_lc_rs::digest::{digest, SHA256};

    let hash = digest(&SHA256, input.as_bytes());
    hash.as_ref()
        .iter()
        .take(3)
        .map(|b| format!("{b:02x}"))
        .collect::<String>()[..5]
        .to_string()
}

fn build_replication(
    name: String,
    torrent_name: &str,
    torrent_uid: &str,
    spec: ReplicationSpec,
) -> Replication {
    Replication {
        metadata: ObjectMeta {
            name: Some(name),
            labels: Some(
                [(TORRENT_NAME_LABEL_KEY.to_string(), torrent_name.to_string())]
                    .into_iter()
                    .collect(),
            ),
            owner_references: Some(vec![OwnerReference {
                api_version: format!("{API_GROUP}/{API_VERSION}"),
                kind: "Torrent".to_string(),
                name: torrent_name.to_string(),
                uid: torrent_uid.to_string(),
                controller: Some(true),
                block_owner_deletion: Some(true),
            }]),
            ..Default::default()
        },
        spec,
        status: None,
    }
}

fn sort_by_score(scored: &mut [ScoredNode]) {
    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use shoal_common::crd::{
        ChunkStatus, NodeTrackerSpec, ObjectStatus, ObjectType, RepoStatus, TorrentSpec,
        TorrentStatus,
    };

    fn hub() -> Hub {
        Hub {
            repo_id: "facebook/opt-125m".into(),
            ..Default::default()
        }
    }

    fn torrent_with_repo(replicas: i32, files: &[(&str, &str, i64)]) -> Torrent {
        let mut torrent = Torrent::new(
            "opt-125m",
            TorrentSpec {
                hub: Some(hub()),
                replicas: Some(replicas),
                ..Default::default()
            },
        );
        torrent.metadata.uid = Some("uid-1234".into());
        torrent.status = Some(TorrentStatus {
            repo: Some(RepoStatus {
                objects: files
                    .iter()
                    .map(|(path, oid, size)| ObjectStatus {
                        path: path.to_string(),
                        object_type: ObjectType::File,
                        chunks: vec![ChunkStatus {
                            name: format!("{oid}--0001"),
                            size_bytes: *size,
                            state: TrackerState::Pending,
                        }],
                    })
                    .collect(),
            }),
            ..Default::default()
        });
        torrent
    }

    fn tracker(name: &str) -> NodeTracker {
        NodeTracker::new(name, NodeTrackerSpec::default())
    }

    fn tracker_with(name: &str, labels: &[(&str, &str)], limit: Option<&str>) -> NodeTracker {
        let mut nt = NodeTracker::new(
            name,
            NodeTrackerSpec {
                chunks: Vec::new(),
                size_limit: limit.map(String::from),
            },
        );
        if !labels.is_empty() {
            nt.metadata.labels = Some(
                labels
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            );
        }
        nt
    }

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(Arc::new(ChunkIndex::new()), "/workspace/models/").unwrap()
    }

    #[test]
    fn deterministic_names() {
        assert_eq!(
            replication_name("abc--0001", "node1"),
            replication_name("abc--0001", "node1"),
        );
        assert_ne!(
            replication_name("abc--0001", "node1"),
            replication_name("abc--0001", "node2"),
        );
        assert_eq!(
            deletion_name("abc--0001", "node1"),
            format!("{}--d", replication_name("abc--0001", "node1")),
        );
        // hash suffix is exactly five hex chars
        let name = replication_name("abc--0001", "node1");
        let suffix = name.rsplit("--").next().unwrap();
        assert_eq!(suffix.len(), 5);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn download_dispatch_emits_one_replication_per_file() {
        // S1: single node, multi-file repo, replicas=1.
        let d = dispatcher();
        let mut torrent = torrent_with_repo(
            1,
            &[("config.json", "aaaa", 500), ("model.safetensors", "bbbb", 1000)],
        );
        let trackers = vec![tracker("node1")];

        let prepared = d.prepare_replications(&mut torrent, &trackers).unwrap();
        assert_eq!(prepared.replications.len(), 2);
        assert!(prepared.status_changed);
        assert!(prepared.fully_satisfied);

        for replication in &prepared.replications {
            assert_eq!(replication.spec.node_name, "node1");
            assert!(replication.spec.source.hub().is_some());
            let dest = replication.spec.destination.as_ref().unwrap().uri().unwrap();
            assert!(dest.starts_with("localhost:///workspace/models/facebook--opt-125m/blobs/"));
            assert_eq!(
                replication.labels().get(TORRENT_NAME_LABEL_KEY).unwrap(),
                "opt-125m"
            );
            let owner = &replication.owner_references()[0];
            assert_eq!(owner.kind, "Torrent");
            assert_eq!(owner.name, "opt-125m");
        }

        // All chunk states flipped to Ready (= dispatched).
        let repo = torrent.status.unwrap().repo.unwrap();
        assert!(repo
            .objects
            .iter()
            .all(|o| o.chunks.iter().all(|c| c.state == TrackerState::Ready)));
    }

    #[test]
    fn dispatch_is_idempotent_across_passes() {
        // Property: running the reconcile twice back-to-back emits the same
        // set of names, and the second pass emits nothing new.
        let d = dispatcher();
        let trackers = vec![tracker("node1")];

        let mut first = torrent_with_repo(1, &[("model.bin", "cccc", 10)]);
        let prepared1 = d.prepare_replications(&mut first, &trackers).unwrap();

        let mut second = torrent_with_repo(1, &[("model.bin", "cccc", 10)]);
        let prepared2 = d.prepare_replications(&mut second, &trackers).unwrap();

        let names1: Vec<_> = prepared1.replications.iter().map(|r| r.name_any()).collect();
        let names2: Vec<_> = prepared2.replications.iter().map(|r| r.name_any()).collect();
        assert_eq!(names1, names2);

        // After the first pass the chunks are no longer Pending, so
        // re-dispatching the same (already mutated) torrent is a no-op.
        let prepared3 = d.prepare_replications(&mut first, &trackers).unwrap();
        assert!(prepared3.replications.is_empty());
        assert!(!prepared3.status_changed);
        assert!(!prepared3.fully_satisfied);
    }

    #[test]
    fn selector_restricts_placement() {
        // S2: node2 carries the zone label, node1 does not.
        let d = dispatcher();
        let mut torrent = torrent_with_repo(1, &[("model.bin", "dddd", 10)]);
        torrent.spec.node_selector = Some(BTreeMap::from([("zone".to_string(), "zone1".to_string())]));

        let trackers = vec![
            tracker("node1"),
            tracker_with("node2", &[("zone", "zone1")], None),
        ];

        let prepared = d.prepare_replications(&mut torrent, &trackers).unwrap();
        assert_eq!(prepared.replications.len(), 1);
        assert_eq!(prepared.replications[0].spec.node_name, "node2");
    }

    #[test]
    fn chunk_with_no_candidate_stays_pending() {
        let d = dispatcher();
        let mut torrent = torrent_with_repo(1, &[("model.bin", "eeee", 10)]);
        torrent.spec.node_selector =
            Some(BTreeMap::from([("zone".to_string(), "nowhere".to_string())]));

        let trackers = vec![tracker("node1")];
        let prepared = d.prepare_replications(&mut torrent, &trackers).unwrap();

        assert!(prepared.replications.is_empty());
        assert!(!prepared.fully_satisfied);
        let repo = torrent.status.unwrap().repo.unwrap();
        assert_eq!(repo.objects[0].chunks[0].state, TrackerState::Pending);
    }

    #[test]
    fn sync_path_copies_from_existing_holder() {
        // S3: node1 already holds the chunk; replicas=3 over three nodes.
        let index = Arc::new(ChunkIndex::new());
        index.add_chunks(
            "node1",
            &[ChunkTracker {
                chunk_name: "ffff--0001".into(),
                size_bytes: 10,
            }],
        );
        let d = Dispatcher::new(index, "/workspace/models/").unwrap();

        let mut torrent = torrent_with_repo(3, &[("model.bin", "ffff", 10)]);
        let trackers = vec![tracker("node1"), tracker("node2"), tracker("node3")];

        let prepared = d.prepare_replications(&mut torrent, &trackers).unwrap();

        // One holder exists, budget is 2: two syncs, zero downloads.
        assert_eq!(prepared.replications.len(), 2);
        let mut targets: Vec<_> = prepared
            .replications
            .iter()
            .map(|r| r.spec.node_name.clone())
            .collect();
        targets.sort();
        assert_eq!(targets, vec!["node2", "node3"]);

        for replication in &prepared.replications {
            let source = replication.spec.source.uri().unwrap();
            assert!(
                source.starts_with("remote://node1@"),
                "expected peer source, got {source}"
            );
            let dest = replication.spec.destination.as_ref().unwrap().uri().unwrap();
            assert!(dest.starts_with("localhost://"));
        }
    }

    #[test]
    fn sync_with_satisfied_budget_emits_nothing() {
        let index = Arc::new(ChunkIndex::new());
        index.add_chunks(
            "node1",
            &[ChunkTracker {
                chunk_name: "ffff--0001".into(),
                size_bytes: 10,
            }],
        );
        let d = Dispatcher::new(index, "/workspace/models/").unwrap();

        let mut torrent = torrent_with_repo(1, &[("model.bin", "ffff", 10)]);
        let trackers = vec![tracker("node1"), tracker("node2")];

        let prepared = d.prepare_replications(&mut torrent, &trackers).unwrap();
        assert!(prepared.replications.is_empty());
        assert!(prepared.status_changed);
        // Everything already satisfied: the caller can go straight to Ready.
        assert!(prepared.fully_satisfied);
    }

    #[test]
    fn replica_budget_honored_per_chunk() {
        // Property: never more placements than min(replicas, eligible nodes),
        // and distinct nodes per chunk.
        let d = dispatcher();
        let mut torrent = torrent_with_repo(2, &[("model.bin", "abcd", 10)]);
        let trackers = vec![tracker("node1"), tracker("node2"), tracker("node3")];

        let prepared = d.prepare_replications(&mut torrent, &trackers).unwrap();
        assert_eq!(prepared.replications.len(), 2);
        let targets: HashSet<_> = prepared
            .replications
            .iter()
            .map(|r| r.spec.node_name.clone())
            .collect();
        assert_eq!(targets.len(), 2);
    }

    #[test]
    fn disk_pressure_skips_full_node() {
        // S4: node2 is full; placements go to node1.
        let index = Arc::new(ChunkIndex::new());
        index.add_chunks(
            "node2",
            &[ChunkTracker {
                chunk_name: "old--0001".into(),
                size_bytes: 10 * 1024 * 1024,
            }],
        );
        let d = Dispatcher::new(index, "/workspace/models/").unwrap();

        let mut torrent = torrent_with_repo(1, &[("model.bin", "beef", 1024)]);
        let trackers = vec![
            tracker_with("node2", &[], Some("10Mi")),
            tracker("node1"),
        ];

        let prepared = d.prepare_replications(&mut torrent, &trackers).unwrap();
        assert_eq!(prepared.replications.len(), 1);
        assert_eq!(prepared.replications[0].spec.node_name, "node1");
    }

    #[test]
    fn same_pass_placements_update_the_snapshot() {
        // node2 is empty and scores best, node1 carries 2Mi. Both chunks are
        // 6Mi against 10Mi limits: the first lands on node2, and the second
        // can only spill to node1 if the snapshot already carries the first
        // placement (6 + 6 > 10 on node2).
        let index = Arc::new(ChunkIndex::new());
        index.add_chunks(
            "node1",
            &[ChunkTracker {
                chunk_name: "old--0001".into(),
                size_bytes: 2 * 1024 * 1024,
            }],
        );
        let d = Dispatcher::new(index, "/workspace/models/").unwrap();

        let mut torrent = torrent_with_repo(
            1,
            &[
                ("a.bin", "aa11", 6 * 1024 * 1024),
                ("b.bin", "bb22", 6 * 1024 * 1024),
            ],
        );
        let trackers = vec![
            tracker_with("node1", &[], Some("10Mi")),
            tracker_with("node2", &[], Some("10Mi")),
        ];

        let prepared = d.prepare_replications(&mut torrent, &trackers).unwrap();
        assert_eq!(prepared.replications.len(), 2);
        assert_eq!(prepared.replications[0].spec.node_name, "node2");
        assert_eq!(prepared.replications[1].spec.node_name, "node1");
    }

    #[test]
    fn reclaim_emits_one_deletion_per_holder() {
        // S5 at dispatcher level.
        let index = Arc::new(ChunkIndex::new());
        index.add_chunks(
            "node1",
            &[ChunkTracker {
                chunk_name: "dead--0001".into(),
                size_bytes: 10,
            }],
        );
        index.add_chunks(
            "node2",
            &[ChunkTracker {
                chunk_name: "dead--0001".into(),
                size_bytes: 10,
            }],
        );
        let d = Dispatcher::new(index, "/workspace/models/").unwrap();

        let mut torrent = torrent_with_repo(2, &[("model.bin", "dead", 10)]);
        // Simulate an already-dispatched torrent.
        if let Some(repo) = torrent.status.as_mut().and_then(|s| s.repo.as_mut()) {
            repo.objects[0].chunks[0].state = TrackerState::Ready;
        }

        let prepared = d.reclaim_replications(&mut torrent).unwrap();
        assert_eq!(prepared.replications.len(), 2);
        assert!(prepared.status_changed);

        for replication in &prepared.replications {
            assert!(replication.name_any().ends_with("--d"));
            assert!(replication.spec.destination.is_none());
            let source = replication.spec.source.uri().unwrap();
            assert_eq!(
                source,
                "localhost:///workspace/models/facebook--opt-125m/snapshots/main/model.bin"
            );
        }

        let repo = torrent.status.unwrap().repo.unwrap();
        assert_eq!(repo.objects[0].chunks[0].state, TrackerState::Deleting);

        // Second reclaim pass is a no-op: states already Deleting.
        let mut torrent2 = Torrent::new("opt-125m", TorrentSpec { hub: Some(hub()), ..Default::default() });
        torrent2.status = Some(TorrentStatus {
            repo: Some(repo),
            ..Default::default()
        });
        let prepared2 = d.reclaim_replications(&mut torrent2).unwrap();
        assert!(prepared2.replications.is_empty());
        assert!(!prepared2.status_changed);
    }

    #[test]
    fn dispatch_without_hub_is_an_error() {
        let d = dispatcher();
        let mut torrent = torrent_with_repo(1, &[("model.bin", "aaaa", 10)]);
        torrent.spec.hub = None;
        assert!(d.prepare_replications(&mut torrent, &[]).is_err());
    }
}
