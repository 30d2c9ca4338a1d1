//! Central controllers
//!
//! Four reconciliation loops share one [`Context`]:
//! - [`torrent`]: the placement controller (the core of the system)
//! - [`node_tracker`]: inventory feed into the ChunkIndex + node label mirror
//! - [`replication`]: stamps the initial Pending condition on work orders
//! - [`pod`]: spawns ephemeral preheat Torrents for labelled Pods

pub mod node_tracker;
pub mod pod;
pub mod replication;
pub mod torrent;

use std::sync::Arc;

use kube::Client;

use crate::dispatcher::Dispatcher;
use crate::hub::HubCatalog;

/// Shared state for the central controllers.
pub struct Context {
    /// Kubernetes client.
    pub client: Client,
    /// The placement scheduler (owns the live ChunkIndex).
    pub dispatcher: Arc<Dispatcher>,
    /// Origin catalog used to resolve repositories.
    pub catalog: Arc<dyn HubCatalog>,
    /// Plain HTTP client for the preheat callback.
    pub http: reqwest::Client,
}

impl Context {
    /// Create a context over the given collaborators.
    pub fn new(client: Client, dispatcher: Arc<Dispatcher>, catalog: Arc<dyn HubCatalog>) -> Self {
        Self {
            client,
            dispatcher,
            catalog,
            http: reqwest::Client::new(),
        }
    }
}
