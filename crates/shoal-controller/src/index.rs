//! Cluster-wide chunk index
//!
//! [`ChunkIndex`] maintains the live mapping between chunks and the nodes
//! holding them, fed by NodeTracker watch events and consulted on every
//! dispatch. The scheduler never works on the live index directly: each pass
//! takes a detached [`IndexSnapshot`] and mutates that to reflect in-flight
//! placements, so concurrent reconciles see stable views and a single pass
//! cannot oversubscribe a node.
//!
//! Invariant maintained throughout: `c ∈ nodes[n] ⟺ n ∈ chunks[c].nodes`.
//! Chunk entries are pruned when their last holder disappears; node entries
//! may linger empty.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use shoal_common::crd::ChunkTracker;

/// A chunk known to the cluster and the set of nodes holding it.
#[derive(Clone, Debug)]
pub struct ChunkInfo {
    /// Chunk name (blob basename).
    pub name: String,
    /// Nodes currently holding the chunk.
    pub nodes: HashSet<String>,
    /// Chunk size in bytes.
    pub size_bytes: i64,
}

#[derive(Clone, Debug, Default)]
struct IndexState {
    chunks: HashMap<String, ChunkInfo>,
    nodes: HashMap<String, HashSet<String>>,
}

impl IndexState {
    fn add_chunks(&mut self, node_name: &str, chunks: &[ChunkTracker]) {
        let chunk_names = self.nodes.entry(node_name.to_string()).or_default();

        for chunk in chunks {
            chunk_names.insert(chunk.chunk_name.clone());

            if let Some(info) = self.chunks.get_mut(&chunk.chunk_name) {
                info.nodes.insert(node_name.to_string());
                continue;
            }

            self.chunks.insert(
                chunk.chunk_name.clone(),
                ChunkInfo {
                    name: chunk.chunk_name.clone(),
                    nodes: HashSet::from([node_name.to_string()]),
                    size_bytes: chunk.size_bytes,
                },
            );
        }
    }

    fn delete_chunks(&mut self, node_name: &str, chunk_names: &[String]) {
        for chunk_name in chunk_names {
            if let Some(info) = self.chunks.get_mut(chunk_name) {
                info.nodes.remove(node_name);
                if info.nodes.is_empty() {
                    self.chunks.remove(chunk_name);
                }
            }

            if let Some(node) = self.nodes.get_mut(node_name) {
                node.remove(chunk_name);
            }
        }
    }

    fn node_total_size_bytes(&self, node_name: &str) -> i64 {
        let Some(chunks) = self.nodes.get(node_name) else {
            return 0;
        };
        chunks
            .iter()
            .filter_map(|c| self.chunks.get(c))
            .map(|c| c.size_bytes)
            .sum()
    }

    fn chunk_exists_in_node(&self, node_name: &str, chunk_name: &str) -> bool {
        self.nodes
            .get(node_name)
            .map(|chunks| chunks.contains(chunk_name))
            .unwrap_or(false)
    }
}

/// Thread-safe live index. One per controller process, built lazily from
/// NodeTracker events and never persisted: recovery is a `list` replay at
/// startup.
#[derive(Debug, Default)]
pub struct ChunkIndex {
    inner: RwLock<IndexState>,
}

impl ChunkIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `node_name` holds each of `chunks`.
    pub fn add_chunks(&self, node_name: &str, chunks: &[ChunkTracker]) {
        let mut state = self.inner.write().expect("chunk index lock poisoned");
        state.add_chunks(node_name, chunks);
    }

    /// Remove `node_name` from each chunk's holder set, pruning chunk
    /// entries that lose their last holder.
    pub fn delete_chunks(&self, node_name: &str, chunk_names: &[String]) {
        let mut state = self.inner.write().expect("chunk index lock poisoned");
        state.delete_chunks(node_name, chunk_names);
    }

    /// Reconcile one node's inventory to exactly `chunks`, computing the
    /// symmetric diff against the index's current view of that node.
    pub fn sync_node(&self, node_name: &str, chunks: &[ChunkTracker]) {
        let mut state = self.inner.write().expect("chunk index lock poisoned");

        let current: HashSet<String> = state.nodes.get(node_name).cloned().unwrap_or_default();
        let desired: HashSet<&str> = chunks.iter().map(|c| c.chunk_name.as_str()).collect();

        let to_delete: Vec<String> = current
            .iter()
            .filter(|c| !desired.contains(c.as_str()))
            .cloned()
            .collect();
        let to_add: Vec<ChunkTracker> = chunks
            .iter()
            .filter(|c| !current.contains(&c.chunk_name))
            .cloned()
            .collect();

        state.delete_chunks(node_name, &to_delete);
        state.add_chunks(node_name, &to_add);
    }

    /// Drop a node and all of its holdings (NodeTracker deleted).
    pub fn remove_node(&self, node_name: &str) {
        let mut state = self.inner.write().expect("chunk index lock poisoned");
        let chunk_names: Vec<String> = state
            .nodes
            .get(node_name)
            .map(|chunks| chunks.iter().cloned().collect())
            .unwrap_or_default();
        state.delete_chunks(node_name, &chunk_names);
        state.nodes.remove(node_name);
    }

    /// True when any node holds the chunk.
    pub fn chunk_exists(&self, chunk_name: &str) -> bool {
        let state = self.inner.read().expect("chunk index lock poisoned");
        state.chunks.contains_key(chunk_name)
    }

    /// The nodes currently holding the chunk (unordered).
    pub fn chunk_nodes(&self, chunk_name: &str) -> Vec<String> {
        let state = self.inner.read().expect("chunk index lock poisoned");
        state
            .chunks
            .get(chunk_name)
            .map(|info| info.nodes.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// True when the specific node holds the chunk.
    pub fn chunk_exists_in_node(&self, node_name: &str, chunk_name: &str) -> bool {
        let state = self.inner.read().expect("chunk index lock poisoned");
        state.chunk_exists_in_node(node_name, chunk_name)
    }

    /// Total bytes stored on the node, derived from its chunk set.
    pub fn node_total_size_bytes(&self, node_name: &str) -> i64 {
        let state = self.inner.read().expect("chunk index lock poisoned");
        state.node_total_size_bytes(node_name)
    }

    /// Names of every node the index knows about (holders or not).
    pub fn node_names(&self) -> Vec<String> {
        let state = self.inner.read().expect("chunk index lock poisoned");
        state.nodes.keys().cloned().collect()
    }

    /// Deep-copy the index into a detached snapshot with a fresh scratchpad.
    /// Called once at the start of each dispatch pass.
    pub fn snapshot(&self) -> IndexSnapshot {
        let state = self.inner.read().expect("chunk index lock poisoned");
        IndexSnapshot {
            state: state.clone(),
            scratch: HashMap::new(),
        }
    }
}

/// A detached copy of the index used by a single scheduling pass.
///
/// Mutations never reach the live index. The scratchpad lets plugins memoize
/// per-node derived quantities (currently byte totals) between the filter and
/// score extension points.
#[derive(Clone, Debug, Default)]
pub struct IndexSnapshot {
    state: IndexState,
    scratch: HashMap<String, i64>,
}

impl IndexSnapshot {
    /// Record an in-flight placement so later chunks in the same pass see it.
    pub fn add_chunks(&mut self, node_name: &str, chunks: &[ChunkTracker]) {
        self.state.add_chunks(node_name, chunks);
    }

    /// True when any node holds the chunk in this snapshot.
    pub fn chunk_exists(&self, chunk_name: &str) -> bool {
        self.state.chunks.contains_key(chunk_name)
    }

    /// The snapshot's holders of the chunk.
    pub fn chunk_nodes(&self, chunk_name: &str) -> Vec<String> {
        self.state
            .chunks
            .get(chunk_name)
            .map(|info| info.nodes.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// True when the specific node holds the chunk in this snapshot.
    pub fn chunk_exists_in_node(&self, node_name: &str, chunk_name: &str) -> bool {
        self.state.chunk_exists_in_node(node_name, chunk_name)
    }

    /// Total bytes stored on the node in this snapshot.
    pub fn node_total_size_bytes(&self, node_name: &str) -> i64 {
        self.state.node_total_size_bytes(node_name)
    }

    /// Memoize a per-node derived value for this pass.
    pub fn store(&mut self, key: &str, value: i64) {
        self.scratch.insert(key.to_string(), value);
    }

    /// Read back a memoized value.
    pub fn load(&self, key: &str) -> Option<i64> {
        self.scratch.get(key).copied()
    }
}
