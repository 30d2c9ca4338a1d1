//! Custom resource definitions for the Shoal API group
//!
//! Three cluster-scoped resources drive the system:
//! - [`Torrent`]: the user's declarative request to place a repository
//! - [`NodeTracker`]: one node's inventory of stored chunks
//! - [`Replication`]: a single work order (download, peer sync, or delete)

mod node_tracker;
mod replication;
mod torrent;

pub use node_tracker::{ChunkTracker, NodeTracker, NodeTrackerSpec, NodeTrackerStatus};
pub use replication::{
    parse_remote_uri, parse_uri, Replication, ReplicationSpec, ReplicationStatus, Target,
    LOCALHOST_SCHEME, REMOTE_SCHEME,
};
pub use torrent::{
    ChunkStatus, Hub, ObjectStatus, ObjectType, ReclaimPolicy, RepoStatus, Torrent, TorrentSpec,
    TorrentStatus, TrackerState, HUGGINGFACE_HUB,
};

/// Condition type: object is waiting for Replication creations
pub const PENDING_CONDITION_TYPE: &str = "Pending";

/// Condition type: chunks are being downloaded or synced
pub const REPLICATING_CONDITION_TYPE: &str = "Replicating";

/// Condition type: all chunks replicated successfully
pub const READY_CONDITION_TYPE: &str = "Ready";

/// Condition type: chunks are being removed after Torrent deletion
pub const RECLAIMING_CONDITION_TYPE: &str = "Reclaiming";
