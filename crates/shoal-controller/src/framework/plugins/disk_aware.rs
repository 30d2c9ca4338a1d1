//! DiskAware filter + score plugin
//!
//! Filter: reject a node whose stored bytes plus the candidate chunk would
//! exceed its size limit. The current byte total is memoized in the snapshot
//! scratchpad so Score can reuse it without recomputing.
//!
//! Score: `(1 - (current + chunk) / limit) * 100`: favors emptier nodes.

use std::sync::Arc;

use kube::ResourceExt;
use tracing::warn;

use shoal_common::crd::NodeTracker;
use shoal_common::quantity::parse_quantity;

use crate::framework::{ChunkRequest, FilterPlugin, Plugin, Registration, ScorePlugin, Status};
use crate::index::IndexSnapshot;

const NAME: &str = "DiskAware";

/// Default storage reserved for chunks when a NodeTracker sets no limit.
pub const DEFAULT_SIZE_LIMIT: &str = "100Gi";

/// Disk-pressure-aware filter and scorer.
pub struct DiskAware;

/// Capability set: filter and score.
pub fn registration() -> Registration {
    let plugin = Arc::new(DiskAware);
    Registration {
        name: NAME,
        filter: Some(plugin.clone()),
        score: Some(plugin),
    }
}

impl Plugin for DiskAware {
    fn name(&self) -> &'static str {
        NAME
    }
}

impl FilterPlugin for DiskAware {
    fn filter(
        &self,
        chunk: &ChunkRequest,
        _source_node: Option<&str>,
        tracker: &NodeTracker,
        snapshot: &mut IndexSnapshot,
    ) -> Status {
        let node_name = tracker.name_any();
        let total_size = snapshot.node_total_size_bytes(&node_name);

        if total_size + chunk.size_bytes > size_limit(tracker) {
            return Status::Unschedulable;
        }

        snapshot.store(&node_name, total_size);
        Status::Success
    }
}

impl ScorePlugin for DiskAware {
    fn score(
        &self,
        chunk: &ChunkRequest,
        _source_node: Option<&str>,
        tracker: &NodeTracker,
        snapshot: &mut IndexSnapshot,
    ) -> f32 {
        let node_name = tracker.name_any();
        let total_size = snapshot
            .load(&node_name)
            .unwrap_or_else(|| snapshot.node_total_size_bytes(&node_name));

        let limit = size_limit(tracker);
        (1.0 - (total_size + chunk.size_bytes) as f32 / limit as f32) * 100.0
    }
}

/// The node's byte limit, with the default applied. The webhook layer keeps
/// malformed quantities out; if one slips through we fall back to the default
/// rather than unschedule the node.
fn size_limit(tracker: &NodeTracker) -> i64 {
    let limit = tracker
        .spec
        .size_limit
        .as_deref()
        .unwrap_or(DEFAULT_SIZE_LIMIT);

    match parse_quantity(limit) {
        Ok(value) => value,
        Err(error) => {
            warn!(node = %tracker.name_any(), %error, "invalid sizeLimit, using default");
            parse_quantity(DEFAULT_SIZE_LIMIT).unwrap_or(i64::MAX)
        }
    }
}
