//! Replication CRD types
//!
//! A Replication is a single atomic work order: bring one chunk into being on
//! one node (download from the hub or sync from a peer), or remove it. The
//! kind of work is discriminated entirely by the source/destination pair:
//!
//! - `source.hub` set, `destination = localhost://…`: download from origin
//! - `source.uri = remote://<node>@<path>`, `destination = localhost://…`: peer sync
//! - `source.uri = localhost://<path>`, no destination: delete a local file

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::torrent::Hub;
use crate::Error;

/// URI scheme addressing a path on the Replication's own target node
pub const LOCALHOST_SCHEME: &str = "localhost";

/// URI scheme addressing a path on a peer node (`remote://<node>@<path>`)
pub const REMOTE_SCHEME: &str = "remote";

/// One endpoint of a Replication: exactly one of a URI or a hub reference.
///
/// Modeled as a sum type so downstream code can never observe both set.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase", untagged)]
pub enum Target {
    /// A filesystem location, `localhost://<path>` or `remote://<node>@<path>`.
    Uri {
        /// The location URI.
        uri: String,
    },
    /// The model hub (download source only).
    Hub {
        /// Origin descriptor.
        hub: Hub,
    },
}

impl Target {
    /// Build a URI target
    pub fn from_uri(uri: impl Into<String>) -> Self {
        Target::Uri { uri: uri.into() }
    }

    /// Build a hub target
    pub fn from_hub(hub: Hub) -> Self {
        Target::Hub { hub }
    }

    /// The URI, when this target is one
    pub fn uri(&self) -> Option<&str> {
        match self {
            Target::Uri { uri } => Some(uri),
            Target::Hub { .. } => None,
        }
    }

    /// The hub, when this target is one
    pub fn hub(&self) -> Option<&Hub> {
        match self {
            Target::Hub { hub } => Some(hub),
            Target::Uri { .. } => None,
        }
    }
}

/// Split a target URI into `(scheme, rest)`.
pub fn parse_uri(uri: &str) -> Result<(&str, &str), Error> {
    uri.split_once("://")
        .ok_or_else(|| Error::validation(format!("malformed target uri {uri:?}")))
}

/// Split the rest of a `remote://` URI into `(node, path)`.
pub fn parse_remote_uri(uri: &str) -> Result<(&str, &str), Error> {
    let (scheme, rest) = parse_uri(uri)?;
    if scheme != REMOTE_SCHEME {
        return Err(Error::validation(format!(
            "expected a remote:// uri, got {uri:?}"
        )));
    }
    rest.split_once('@')
        .ok_or_else(|| Error::validation(format!("remote uri {uri:?} is missing the node part")))
}

/// ReplicationSpec defines the desired state of a Replication
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "shoal.dev",
    version = "v1alpha1",
    kind = "Replication",
    plural = "replications",
    status = "ReplicationStatus",
    printcolumn = r#"{"name":"Node","type":"string","jsonPath":".spec.nodeName"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationSpec {
    /// The node this work order targets. Only that node's agent acts on it.
    pub node_name: String,

    /// Name of the chunk being replicated or removed.
    pub chunk_name: String,

    /// Chunk size in bytes.
    pub size_bytes: i64,

    /// Where the bytes come from. Never nil.
    pub source: Target,

    /// Where the bytes go. Nil means delete the file named by `source`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<Target>,
}

/// ReplicationStatus defines the observed state of a Replication
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationStatus {
    /// Condition log: Pending → Replicating → Ready. Immutable after Ready.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Denormalized current phase.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
}
