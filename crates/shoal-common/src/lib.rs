//! Common types for Shoal: CRDs, errors, and utilities

#![deny(missing_docs)]

pub mod conditions;
pub mod crd;
pub mod error;
pub mod quantity;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// API group for all Shoal custom resources
pub const API_GROUP: &str = "shoal.dev";

/// API version for all Shoal custom resources
pub const API_VERSION: &str = "v1alpha1";

/// Label key linking a Replication (or a preheat Pod) to its parent Torrent
pub const TORRENT_NAME_LABEL_KEY: &str = "shoal.dev/torrent-name";

/// Finalizer blocking Torrent removal until reclaim Replications finish
pub const TORRENT_PROTECTION_FINALIZER: &str = "shoal.dev/torrent-protect";

/// Annotation carrying the `<namespace>/<name>` of the Pod that spawned an
/// ephemeral preheat Torrent
pub const PARENT_POD_ANNO_KEY: &str = "shoal.dev/parent-pod-name";

/// Label selector (`app=shoal-agent`) used to locate the agent Pod on a peer node
pub const AGENT_APP_LABEL: &str = "app=shoal-agent";

/// Default port for the agent HTTP service (peer sync) and the preheat sidecar
pub const HTTP_PORT: u16 = 9090;

/// Default workspace directory holding repo blobs and snapshots on each node
pub const DEFAULT_WORKSPACE: &str = "/workspace/models/";

/// Well-known node label carrying the hostname, used for single-node preheat
pub const NODE_HOSTNAME_LABEL_KEY: &str = "kubernetes.io/hostname";

/// Environment variable naming the node an agent runs on (required)
pub const NODE_NAME_ENV: &str = "NODE_NAME";

/// Environment variable carrying the node's chunk storage limit (byte quantity)
pub const SIZE_LIMIT_ENV: &str = "SIZE_LIMIT";
