//! Scheduling framework
//!
//! Two extension points over a candidate set of NodeTrackers: **Filter**
//! (keep or reject a node) and **Score** (rank the survivors). Plugins are
//! registered at process start; evaluation order is registration order and
//! composition is deterministic given a snapshot: plugins do no I/O and
//! share no state beyond the snapshot scratchpad.

pub mod plugins;

use std::collections::BTreeMap;
use std::sync::Arc;

use kube::ResourceExt;
use tracing::debug;

use shoal_common::crd::NodeTracker;
use shoal_common::{Error, Result};

use crate::index::IndexSnapshot;

/// Upper clamp for a single plugin score
pub const MAX_SCORE: f32 = 100.0;

/// Lower clamp for a single plugin score
pub const MIN_SCORE: f32 = 0.0;

/// Outcome of a filter plugin for one candidate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    /// The candidate passes this plugin.
    Success,
    /// The candidate cannot host the chunk.
    Unschedulable,
}

/// The chunk being scheduled, with everything plugins may consult.
#[derive(Clone, Debug, Default)]
pub struct ChunkRequest {
    /// Chunk name.
    pub name: String,
    /// Chunk size in bytes.
    pub size_bytes: i64,
    /// Path of the file the chunk belongs to.
    pub path: String,
    /// Node label constraints from the owning Torrent.
    pub node_selector: BTreeMap<String, String>,
}

/// Parent type for all framework plugins.
pub trait Plugin: Send + Sync {
    /// Unique plugin name.
    fn name(&self) -> &'static str;
}

/// Filter extension point.
///
/// `source_node` is the holder a sync would copy from: `None` for download
/// tasks, `Some` for peer-sync tasks.
pub trait FilterPlugin: Plugin {
    /// Decide whether `tracker` can host the chunk.
    fn filter(
        &self,
        chunk: &ChunkRequest,
        source_node: Option<&str>,
        tracker: &NodeTracker,
        snapshot: &mut IndexSnapshot,
    ) -> Status;
}

/// Score extension point. Scores are clamped to `[0, 100]` before summing.
pub trait ScorePlugin: Plugin {
    /// Rank `tracker` for the chunk; higher is better.
    fn score(
        &self,
        chunk: &ChunkRequest,
        source_node: Option<&str>,
        tracker: &NodeTracker,
        snapshot: &mut IndexSnapshot,
    ) -> f32;
}

/// A plugin's capabilities, declared at registration. No inheritance
/// hierarchy: a plugin is its name plus whichever extension points it
/// implements.
pub struct Registration {
    /// Plugin name, unique within a framework.
    pub name: &'static str,
    /// Filter capability, when implemented.
    pub filter: Option<Arc<dyn FilterPlugin>>,
    /// Score capability, when implemented.
    pub score: Option<Arc<dyn ScorePlugin>>,
}

/// A candidate that survived filtering and scoring.
#[derive(Clone, Debug)]
pub struct ScoredNode {
    /// The candidate node name.
    pub node_name: String,
    /// Sum of clamped plugin scores.
    pub score: f32,
}

/// An ordered set of registered plugins.
#[derive(Default)]
pub struct Framework {
    registrations: Vec<Registration>,
}

impl Framework {
    /// Register plugins in order. Duplicate names are rejected.
    pub fn with_plugins(registrations: Vec<Registration>) -> Result<Self> {
        let mut framework = Framework::default();
        for registration in registrations {
            if framework
                .registrations
                .iter()
                .any(|r| r.name == registration.name)
            {
                return Err(Error::internal_with_context(
                    "framework",
                    format!("plugin {:?} registered twice", registration.name),
                ));
            }
            framework.registrations.push(registration);
        }
        Ok(framework)
    }

    /// Run every filter plugin over every tracker, short-circuiting a
    /// candidate on its first Unschedulable. Returns the survivors in input
    /// order.
    pub fn run_filter<'nt>(
        &self,
        chunk: &ChunkRequest,
        source_node: Option<&str>,
        trackers: &'nt [NodeTracker],
        snapshot: &mut IndexSnapshot,
    ) -> Vec<&'nt NodeTracker> {
        let mut candidates = Vec::new();

        for tracker in trackers {
            let mut schedulable = true;
            for registration in &self.registrations {
                let Some(filter) = &registration.filter else {
                    continue;
                };
                if filter.filter(chunk, source_node, tracker, snapshot) != Status::Success {
                    debug!(
                        plugin = registration.name,
                        node = %tracker.name_any(),
                        chunk = %chunk.name,
                        "filtered out candidate"
                    );
                    schedulable = false;
                    break;
                }
            }
            if schedulable {
                candidates.push(tracker);
            }
        }

        candidates
    }

    /// Score each candidate as the sum of clamped plugin scores. Candidate
    /// order is preserved so a later stable sort breaks ties by input order.
    pub fn run_score(
        &self,
        chunk: &ChunkRequest,
        source_node: Option<&str>,
        candidates: &[&NodeTracker],
        snapshot: &mut IndexSnapshot,
    ) -> Vec<ScoredNode> {
        candidates
            .iter()
            .map(|tracker| {
                let mut total = 0.0;
                for registration in &self.registrations {
                    let Some(score) = &registration.score else {
                        continue;
                    };
                    let value = score.score(chunk, source_node, tracker, snapshot);
                    debug!(
                        plugin = registration.name,
                        node = %tracker.name_any(),
                        chunk = %chunk.name,
                        score = value,
                        "plugin score"
                    );
                    total += value.clamp(MIN_SCORE, MAX_SCORE);
                }
                ScoredNode {
                    node_name: tracker.name_any(),
                    score: total,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shoal_common::crd::NodeTrackerSpec;

    struct AlwaysFilter {
        name: &'static str,
        status: Status,
    }

    impl Plugin for AlwaysFilter {
        fn name(&self) -> &'static str {
            self.name
        }
    }

    impl FilterPlugin for AlwaysFilter {
        fn filter(
            &self,
            _chunk: &ChunkRequest,
            _source: Option<&str>,
            _tracker: &NodeTracker,
            _snapshot: &mut IndexSnapshot,
        ) -> Status {
            self.status
        }
    }

    struct FixedScore {
        name: &'static str,
        value: f32,
    }

    impl Plugin for FixedScore {
        fn name(&self) -> &'static str {
            self.name
        }
    }

    impl ScorePlugin for FixedScore {
        fn score(
            &self,
            _chunk: &ChunkRequest,
            _source: Option<&str>,
            _tracker: &NodeTracker,
            _snapshot: &mut IndexSnapshot,
        ) -> f32 {
            self.value
        }
    }

    fn tracker(name: &str) -> NodeTracker {
        NodeTracker::new(name, NodeTrackerSpec::default())
    }

    fn filter_reg(name: &'static str, status: Status) -> Registration {
        Registration {
            name,
            filter: Some(Arc::new(AlwaysFilter { name, status })),
            score: None,
        }
    }

    fn score_reg(name: &'static str, value: f32) -> Registration {
        Registration {
            name,
            filter: None,
            score: Some(Arc::new(FixedScore { name, value })),
        }
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let result = Framework::with_plugins(vec![
            filter_reg("dup", Status::Success),
            filter_reg("dup", Status::Success),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn filter_short_circuits_on_first_unschedulable() {
        let framework = Framework::with_plugins(vec![
            filter_reg("reject", Status::Unschedulable),
            filter_reg("accept", Status::Success),
        ])
        .unwrap();

        let trackers = vec![tracker("node1"), tracker("node2")];
        let mut snapshot = IndexSnapshot::default();
        let candidates =
            framework.run_filter(&ChunkRequest::default(), None, &trackers, &mut snapshot);
        assert!(candidates.is_empty());
    }

    #[test]
    fn filter_keeps_passing_candidates_in_order() {
        let framework =
            Framework::with_plugins(vec![filter_reg("accept", Status::Success)]).unwrap();

        let trackers = vec![tracker("node1"), tracker("node2")];
        let mut snapshot = IndexSnapshot::default();
        let candidates =
            framework.run_filter(&ChunkRequest::default(), None, &trackers, &mut snapshot);
        let names: Vec<String> = candidates.iter().map(|c| c.name_any()).collect();
        assert_eq!(names, vec!["node1", "node2"]);
    }

    #[test]
    fn scores_are_clamped_and_summed() {
        let framework = Framework::with_plugins(vec![
            score_reg("big", 500.0),   // clamps to 100
            score_reg("small", -10.0), // clamps to 0
            score_reg("mid", 25.0),
        ])
        .unwrap();

        let trackers = vec![tracker("node1")];
        let candidates: Vec<&NodeTracker> = trackers.iter().collect();
        let mut snapshot = IndexSnapshot::default();
        let scored = framework.run_score(
            &ChunkRequest::default(),
            None,
            &candidates,
            &mut snapshot,
        );
        assert_eq!(scored.len(), 1);
        assert_eq!(scored[0].score, 125.0);
    }
}
