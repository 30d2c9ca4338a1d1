//! NodeTracker CRD types
//!
//! One NodeTracker per node, acting as the fleet's record of what that node
//! currently stores. Created by the agent at boot with the Node as owner (so
//! it is garbage-collected with the Node), mutated only by that node's
//! inventory scanner.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// One stored chunk. No file path here: a chunk can back several snapshot
/// files, but belongs to exactly one repo barring hash collisions.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChunkTracker {
    /// Name of the chunk (blob basename).
    pub chunk_name: String,

    /// Chunk size in bytes.
    pub size_bytes: i64,
}

/// NodeTrackerSpec defines the inventory of one node. It acts like a cache.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "shoal.dev",
    version = "v1alpha1",
    kind = "NodeTracker",
    plural = "nodetrackers",
    status = "NodeTrackerStatus",
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct NodeTrackerSpec {
    /// Chunks replicated on this node.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chunks: Vec<ChunkTracker>,

    /// Maximum bytes reserved for chunks, as a quantity string ("100Gi").
    /// Nil falls back to the scheduler default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_limit: Option<String>,
}

/// NodeTrackerStatus is currently empty.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
pub struct NodeTrackerStatus {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_tracker_wire_format() {
        let chunk = ChunkTracker {
            chunk_name: "8b08b863--0001".into(),
            size_bytes: 1024,
        };
        let json = serde_json::to_value(&chunk).unwrap();
        assert_eq!(json["chunkName"], "8b08b863--0001");
        assert_eq!(json["sizeBytes"], 1024);
    }

    #[test]
    fn empty_chunk_list_is_omitted() {
        let spec = NodeTrackerSpec::default();
        let json = serde_json::to_value(&spec).unwrap();
        assert!(json.get("chunks").is_none());
    }
}
