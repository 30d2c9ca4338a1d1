//! Origin catalog enumeration
//!
//! The placement controller only needs one thing from the hub: the object
//! list of a repository at a revision. The trait keeps the controller
//! testable without network access; [`HuggingfaceCatalog`] is the production
//! implementation over the Hub tree API.

use async_trait::async_trait;
use serde::Deserialize;

use shoal_common::{Error, Result};

/// Default Huggingface endpoint, overridable via `HF_ENDPOINT`.
const DEFAULT_HF_ENDPOINT: &str = "https://huggingface.co";

/// One entry of a repository tree listing.
#[derive(Clone, Debug, Deserialize)]
pub struct RepoObject {
    /// Path of the object within the repo.
    pub path: String,
    /// `file` or `directory`.
    #[serde(rename = "type")]
    pub object_type: String,
    /// Content hash of the object.
    pub oid: String,
    /// Object size in bytes. Directories report no size.
    #[serde(default)]
    pub size: i64,
}

/// Catalog access used by the Torrent creation branch.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HubCatalog: Send + Sync {
    /// List the objects of `repo_id` at `revision`.
    async fn list_repo_objects(&self, repo_id: &str, revision: &str) -> Result<Vec<RepoObject>>;
}

/// Catalog client for the Huggingface tree API.
pub struct HuggingfaceCatalog {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
}

impl HuggingfaceCatalog {
    /// Build a catalog client from the environment (`HF_ENDPOINT`,
    /// `HF_TOKEN` / `HUGGING_FACE_HUB_TOKEN`).
    pub fn from_env() -> Self {
        let endpoint = std::env::var("HF_ENDPOINT")
            .ok()
            .filter(|e| !e.is_empty())
            .unwrap_or_else(|| DEFAULT_HF_ENDPOINT.to_string());
        let token = std::env::var("HF_TOKEN")
            .ok()
            .or_else(|| std::env::var("HUGGING_FACE_HUB_TOKEN").ok())
            .filter(|t| !t.is_empty());
        Self {
            client: reqwest::Client::new(),
            endpoint,
            token,
        }
    }
}

#[async_trait]
impl HubCatalog for HuggingfaceCatalog {
    async fn list_repo_objects(&self, repo_id: &str, revision: &str) -> Result<Vec<RepoObject>> {
        let url = format!("{}/api/models/{}/tree/{}", self.endpoint, repo_id, revision);

        let mut request = self.client.get(&url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::hub(repo_id, format!("failed to list repo tree: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            // 4xx means the repo/revision doesn't resolve; retrying won't help.
            if status.is_client_error() {
                return Err(Error::hub_permanent(
                    repo_id,
                    format!("repo tree request rejected: status {status}"),
                ));
            }
            return Err(Error::hub(
                repo_id,
                format!("repo tree request failed: status {status}"),
            ));
        }

        response
            .json::<Vec<RepoObject>>()
            .await
            .map_err(|e| Error::hub(repo_id, format!("failed to decode repo tree: {e}")))
    }
}
