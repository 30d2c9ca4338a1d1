//! Shoal node agent
//!
//! Runs on every node in the fleet. Executes the Replications targeting its
//! node (origin download, peer sync, or delete), serves chunk bytes to peers
//! over HTTP, and periodically publishes the node's inventory to its
//! NodeTracker.

pub mod controller;
pub mod handler;
pub mod scanner;
pub mod server;
pub mod tracker;

use kube::Client;

/// Shared state for the agent's reconciler and background tasks.
pub struct AgentContext {
    /// Kubernetes client.
    pub client: Client,
    /// The node this agent runs on (`NODE_NAME`).
    pub node_name: String,
    /// HTTP client for hub downloads and peer syncs.
    pub http: reqwest::Client,
    /// Port peers serve `/sync` on.
    pub peer_port: u16,
}

impl AgentContext {
    /// Create an agent context.
    pub fn new(client: Client, node_name: String, peer_port: u16) -> Self {
        Self {
            client,
            node_name,
            http: reqwest::Client::new(),
            peer_port,
        }
    }
}
