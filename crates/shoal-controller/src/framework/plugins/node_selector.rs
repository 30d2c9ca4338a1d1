//! NodeSelector filter plugin
//!
//! Succeeds iff every `(key, value)` in the chunk's node selector matches the
//! NodeTracker's labels (which mirror the underlying Node's labels).

use std::sync::Arc;

use shoal_common::crd::NodeTracker;

use crate::framework::{ChunkRequest, FilterPlugin, Plugin, Registration, Status};
use crate::index::IndexSnapshot;

const NAME: &str = "NodeSelector";

/// Label-matching filter.
pub struct NodeSelector;

/// Capability set: filter only.
pub fn registration() -> Registration {
    Registration {
        name: NAME,
        filter: Some(Arc::new(NodeSelector)),
        score: None,
    }
}

impl Plugin for NodeSelector {
    fn name(&self) -> &'static str {
        NAME
    }
}

impl FilterPlugin for NodeSelector {
    fn filter(
        &self,
        chunk: &ChunkRequest,
        _source_node: Option<&str>,
        tracker: &NodeTracker,
        _snapshot: &mut IndexSnapshot,
    ) -> Status {
        let labels = &tracker.metadata.labels;
        for (key, value) in &chunk.node_selector {
            let matched = labels
                .as_ref()
                .and_then(|l| l.get(key))
                .map(|v| v == value)
                .unwrap_or(false);
            if !matched {
                return Status::Unschedulable;
            }
        }

        Status::Success
    }
}
