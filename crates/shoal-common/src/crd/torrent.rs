//! Torrent CRD types
//!
//! A Torrent declares the desired placement of a repository's chunks across
//! the fleet: which hub to pull from, how many replicas of each chunk, which
//! nodes qualify, and what happens to the bytes when the Torrent goes away.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The only hub supported today
pub const HUGGINGFACE_HUB: &str = "Huggingface";

/// Default git revision used when a Hub omits one
const DEFAULT_REVISION: &str = "main";

// =============================================================================
// Hub: origin descriptor
// =============================================================================

/// Hub represents the model registry chunks are downloaded from.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Hub {
    /// Registry name. Only "Huggingface" is supported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Repository identifier on the hub, e.g. `facebook/opt-125m`.
    pub repo_id: String,

    /// Restrict the Torrent to a single file rather than the whole repo.
    /// Useful for pulling one quantized GGUF out of a repo full of them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,

    /// Git revision: branch name, tag, or commit hash. Defaults to "main".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
}

impl Hub {
    /// Registry name with the default applied
    pub fn hub_name(&self) -> &str {
        self.name.as_deref().unwrap_or(HUGGINGFACE_HUB)
    }

    /// Revision with the default applied
    pub fn revision(&self) -> &str {
        self.revision.as_deref().unwrap_or(DEFAULT_REVISION)
    }

    /// Directory-safe repo name: `facebook/opt-125m` → `facebook--opt-125m`
    pub fn repo_slug(&self) -> String {
        self.repo_id.replace('/', "--")
    }
}

// =============================================================================
// TorrentSpec
// =============================================================================

/// How chunk files are handled when the Torrent is deleted.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ReclaimPolicy {
    /// Keep the files on disk.
    #[default]
    Retain,
    /// Remove the files from every holding node. Be careful: if two Torrents
    /// refer to the same repo, deleting one removes the shared files.
    Delete,
}

/// TorrentSpec defines the desired state of a Torrent
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "shoal.dev",
    version = "v1alpha1",
    kind = "Torrent",
    plural = "torrents",
    status = "TorrentStatus",
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct TorrentSpec {
    /// Whether the repo should be preloaded now. Can only be transitioned
    /// from false to true, never back.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preheat: Option<bool>,

    /// The model registry to download from. Required.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hub: Option<Hub>,

    /// Replication count for each chunk, between 1 and 99. Defaults to 1.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// How to handle the chunk files when the Torrent is deleted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reclaim_policy: Option<ReclaimPolicy>,

    /// Waiting time before deleting the Torrent once Ready. Only nil
    /// (never delete) and 0 (delete immediately) are supported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_seconds_after_ready: Option<i64>,

    /// Node label constraints for chunk placement. Used to preheat a model
    /// onto specific nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_selector: Option<BTreeMap<String, String>>,
}

// =============================================================================
// TorrentStatus
// =============================================================================

/// Placement state of a single chunk.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum TrackerState {
    /// Waiting for dispatch. Pending chunks lead to Replication creations.
    #[default]
    Pending,
    /// Dispatched (or already present). The Replications carry whether the
    /// bytes have actually arrived.
    Ready,
    /// Being removed during reclaim.
    Deleting,
}

/// Status of one chunk of an object.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChunkStatus {
    /// Chunk name, formatted `<object oid>--<chunk number>`, e.g.
    /// `945c19bff66ba533eb2032a33dcc6281c4a1e032--0001`. One chunk per file
    /// for now; the numbering leaves room for future file splitting.
    pub name: String,

    /// Chunk size in bytes.
    pub size_bytes: i64,

    /// Placement state of the chunk.
    pub state: TrackerState,
}

/// Kind of a repository object.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ObjectType {
    /// A regular file
    File,
    /// A directory entry
    Directory,
}

/// One object (file or directory) of the repository.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectStatus {
    /// Path of the object within the repository.
    pub path: String,

    /// The chunks making up the object.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chunks: Vec<ChunkStatus>,

    /// Object type.
    #[serde(rename = "type")]
    pub object_type: ObjectType,
}

/// The enumerated repository, set exactly once after catalog resolution.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RepoStatus {
    /// All objects belonging to the repo.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub objects: Vec<ObjectStatus>,
}

/// TorrentStatus defines the observed state of a Torrent
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TorrentStatus {
    /// Condition log. The newest true condition is the current phase.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// The resolved repository contents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<RepoStatus>,

    /// Denormalized current phase.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
}

impl Torrent {
    /// Replica count with the default applied
    pub fn replicas(&self) -> i32 {
        self.spec.replicas.unwrap_or(1)
    }

    /// Preheat flag with the default applied (true)
    pub fn preheat(&self) -> bool {
        self.spec.preheat.unwrap_or(true)
    }

    /// Reclaim policy with the default applied (Retain)
    pub fn reclaim_policy(&self) -> ReclaimPolicy {
        self.spec.reclaim_policy.unwrap_or_default()
    }

    /// True when a zero TTL asks for deletion right after Ready
    pub fn ttl_is_zero(&self) -> bool {
        self.spec.ttl_seconds_after_ready == Some(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hub_defaults() {
        let hub = Hub {
            repo_id: "facebook/opt-125m".into(),
            ..Default::default()
        };
        assert_eq!(hub.hub_name(), HUGGINGFACE_HUB);
        assert_eq!(hub.revision(), "main");
        assert_eq!(hub.repo_slug(), "facebook--opt-125m");
    }

    #[test]
    fn torrent_spec_defaults() {
        let torrent = Torrent::new("t", TorrentSpec::default());
        assert_eq!(torrent.replicas(), 1);
        assert!(torrent.preheat());
        assert_eq!(torrent.reclaim_policy(), ReclaimPolicy::Retain);
        assert!(!torrent.ttl_is_zero());
    }

    #[test]
    fn ttl_zero_detected() {
        let torrent = Torrent::new(
            "t",
            TorrentSpec {
                ttl_seconds_after_ready: Some(0),
                ..Default::default()
            },
        );
        assert!(torrent.ttl_is_zero());
    }

    #[test]
    fn chunk_status_serializes_camel_case() {
        let chunk = ChunkStatus {
            name: "945c19bf--0001".into(),
            size_bytes: 42,
            state: TrackerState::Pending,
        };
        let json = serde_json::to_value(&chunk).unwrap();
        assert_eq!(json["sizeBytes"], 42);
        assert_eq!(json["state"], "Pending");
    }

    #[test]
    fn object_type_uses_lowercase_wire_values() {
        assert_eq!(
            serde_json::to_value(ObjectType::File).unwrap(),
            serde_json::json!("file")
        );
        assert_eq!(
            serde_json::to_value(ObjectType::Directory).unwrap(),
            serde_json::json!("directory")
        );
    }

    #[test]
    fn unknown_status_fields_are_ignored_on_read() {
        let status: TorrentStatus = serde_json::from_value(serde_json::json!({
            "phase": "Pending",
            "someFutureField": {"nested": true}
        }))
        .unwrap();
        assert_eq!(status.phase.as_deref(), Some("Pending"));
    }
}
