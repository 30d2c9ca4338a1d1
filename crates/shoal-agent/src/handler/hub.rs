//! Hub downloads with range-resume
//!
//! Downloads a file from the Huggingface resolve endpoint straight into the
//! content-addressed blob path. A partial file left by a crash becomes the
//! `Range:` offset of the next attempt; a `416 Requested Range Not
//! Satisfiable` means the file is already complete.

use std::io::SeekFrom;
use std::path::Path;
use std::time::Duration;

use futures::TryStreamExt;
use reqwest::header::RANGE;
use reqwest::StatusCode;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tracing::warn;

use shoal_common::{Error, Result};

/// Maximum download attempts per Replication execution.
const MAX_ATTEMPTS: u32 = 10;

/// Pause between attempts.
const RETRY_INTERVAL: Duration = Duration::from_millis(500);

/// Default Huggingface endpoint, overridable via `HF_ENDPOINT`.
const DEFAULT_HF_ENDPOINT: &str = "https://huggingface.co";

/// Download `filename` at `revision` of `repo_id` into `blob_path`,
/// retrying with resume on transient failures.
pub async fn download_from_hub(
    http: &reqwest::Client,
    repo_id: &str,
    revision: &str,
    filename: &str,
    blob_path: &str,
) -> Result<()> {
    // Example: https://huggingface.co/Qwen/Qwen2.5-72B-Instruct/resolve/main/model-00031-of-00037.safetensors
    let url = format!("{}/{repo_id}/resolve/{revision}/{filename}", hf_endpoint());
    let token = hf_token();

    let mut attempts = 0;
    loop {
        attempts += 1;
        match download_with_resume(http, &url, blob_path, token.as_deref()).await {
            Ok(()) => return Ok(()),
            Err(error) => {
                if !error.is_retryable() {
                    return Err(error);
                }
                if attempts >= MAX_ATTEMPTS {
                    return Err(Error::hub(
                        repo_id,
                        format!("reached maximum download attempts for {blob_path}: {error}"),
                    ));
                }
                warn!(%error, url = %url, attempt = attempts, "download failed, resuming");
                tokio::time::sleep(RETRY_INTERVAL).await;
            }
        }
    }
}

/// One download attempt, resuming from the current size of the blob file.
async fn download_with_resume(
    http: &reqwest::Client,
    url: &str,
    blob_path: &str,
    token: Option<&str>,
) -> Result<()> {
    if let Some(parent) = Path::new(blob_path).parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| Error::io(parent.display().to_string(), e))?;
    }

    let mut file = tokio::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(blob_path)
        .await
        .map_err(|e| Error::io(blob_path.to_string(), e))?;

    let existing_size = file
        .metadata()
        .await
        .map_err(|e| Error::io(blob_path.to_string(), e))?
        .len();

    let mut request = http.get(url);
    if existing_size > 0 {
        request = request.header(RANGE, format!("bytes={existing_size}-"));
    }
    if let Some(token) = token {
        request = request.bearer_auth(token);
    }

    let response = request
        .send()
        .await
        .map_err(|e| Error::hub(url, format!("request failed: {e}")))?;

    match response.status() {
        // The file is already fully downloaded.
        StatusCode::RANGE_NOT_SATISFIABLE => return Ok(()),
        StatusCode::OK if existing_size > 0 => {
            // A 200 against a Range request means no resume support; starting
            // over would loop forever on large files.
            return Err(Error::hub_permanent(
                url,
                "server doesn't support resuming downloads",
            ));
        }
        StatusCode::OK | StatusCode::PARTIAL_CONTENT => {}
        status => {
            return Err(Error::hub(url, format!("unexpected status code: {status}")));
        }
    }

    file.seek(SeekFrom::Start(existing_size))
        .await
        .map_err(|e| Error::io(blob_path.to_string(), e))?;

    let mut stream = response.bytes_stream();
    while let Some(bytes) = stream
        .try_next()
        .await
        .map_err(|e| Error::hub(url, format!("read failed mid-stream: {e}")))?
    {
        file.write_all(&bytes)
            .await
            .map_err(|e| Error::io(blob_path.to_string(), e))?;
    }

    file.flush()
        .await
        .map_err(|e| Error::io(blob_path.to_string(), e))?;
    Ok(())
}

/// Hub endpoint from `HF_ENDPOINT`, defaulting to huggingface.co.
fn hf_endpoint() -> String {
    std::env::var("HF_ENDPOINT")
        .ok()
        .filter(|e| !e.is_empty())
        .unwrap_or_else(|| DEFAULT_HF_ENDPOINT.to_string())
}

/// Bearer token from `HF_TOKEN` or `HUGGING_FACE_HUB_TOKEN`.
fn hf_token() -> Option<String> {
    std::env::var("HF_TOKEN")
        .ok()
        .or_else(|| std::env::var("HUGGING_FACE_HUB_TOKEN").ok())
        .filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::http::{HeaderMap, StatusCode as AxumStatus};
    use axum::routing::get;
    use axum::Router;

    const CONTENT: &[u8] = b"0123456789abcdef";

    /// Serve CONTENT with byte-range support, like the hub's resolve endpoint.
    async fn resolve_with_ranges(headers: HeaderMap) -> (AxumStatus, HeaderMap, Vec<u8>) {
        let mut response_headers = HeaderMap::new();
        match range_offset(&headers) {
            None => (AxumStatus::OK, response_headers, CONTENT.to_vec()),
            Some(offset) if offset >= CONTENT.len() as u64 => {
                (AxumStatus::RANGE_NOT_SATISFIABLE, response_headers, Vec::new())
            }
            Some(offset) => {
                response_headers.insert(
                    "Content-Range",
                    format!("bytes {}-{}/{}", offset, CONTENT.len() - 1, CONTENT.len())
                        .parse()
                        .unwrap(),
                );
                (
                    AxumStatus::PARTIAL_CONTENT,
                    response_headers,
                    CONTENT[offset as usize..].to_vec(),
                )
            }
        }
    }

    /// Serve CONTENT ignoring Range headers entirely.
    async fn resolve_without_ranges() -> Vec<u8> {
        CONTENT.to_vec()
    }

    fn range_offset(headers: &HeaderMap) -> Option<u64> {
        headers
            .get("range")?
            .to_str()
            .ok()?
            .strip_prefix("bytes=")?
            .strip_suffix('-')?
            .parse()
            .ok()
    }

    async fn spawn_server(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn fresh_download_writes_whole_file() {
        let base = spawn_server(Router::new().route("/file.bin", get(resolve_with_ranges))).await;
        let dir = tempfile::TempDir::new().unwrap();
        let blob = dir.path().join("blobs").join("aaaa--0001");

        let client = reqwest::Client::new();
        download_with_resume(&client, &format!("{base}/file.bin"), blob.to_str().unwrap(), None)
            .await
            .unwrap();

        assert_eq!(tokio::fs::read(&blob).await.unwrap(), CONTENT);
    }

    #[tokio::test]
    async fn partial_file_resumes_to_full_length() {
        // A crash left the first 6 bytes on disk; the retry must send a Range
        // request and end with exactly the origin's bytes.
        let base = spawn_server(Router::new().route("/file.bin", get(resolve_with_ranges))).await;
        let dir = tempfile::TempDir::new().unwrap();
        let blob = dir.path().join("blobs").join("aaaa--0001");
        tokio::fs::create_dir_all(blob.parent().unwrap()).await.unwrap();
        tokio::fs::write(&blob, &CONTENT[..6]).await.unwrap();

        let client = reqwest::Client::new();
        download_with_resume(&client, &format!("{base}/file.bin"), blob.to_str().unwrap(), None)
            .await
            .unwrap();

        assert_eq!(tokio::fs::read(&blob).await.unwrap(), CONTENT);
    }

    #[tokio::test]
    async fn complete_file_is_left_alone() {
        // The whole file already on disk yields a 416, treated as success.
        let base = spawn_server(Router::new().route("/file.bin", get(resolve_with_ranges))).await;
        let dir = tempfile::TempDir::new().unwrap();
        let blob = dir.path().join("blobs").join("aaaa--0001");
        tokio::fs::create_dir_all(blob.parent().unwrap()).await.unwrap();
        tokio::fs::write(&blob, CONTENT).await.unwrap();

        let client = reqwest::Client::new();
        download_with_resume(&client, &format!("{base}/file.bin"), blob.to_str().unwrap(), None)
            .await
            .unwrap();

        assert_eq!(tokio::fs::read(&blob).await.unwrap(), CONTENT);
    }

    #[tokio::test]
    async fn origin_without_range_support_is_a_permanent_error() {
        let base =
            spawn_server(Router::new().route("/file.bin", get(resolve_without_ranges))).await;
        let dir = tempfile::TempDir::new().unwrap();
        let blob = dir.path().join("blobs").join("aaaa--0001");
        tokio::fs::create_dir_all(blob.parent().unwrap()).await.unwrap();
        tokio::fs::write(&blob, &CONTENT[..6]).await.unwrap();

        let client = reqwest::Client::new();
        let error =
            download_with_resume(&client, &format!("{base}/file.bin"), blob.to_str().unwrap(), None)
                .await
                .unwrap_err();
        assert!(!error.is_retryable());
        assert!(error.to_string().contains("resuming"));
    }
}
