//! Peer HTTP service
//!
//! One endpoint: `GET /sync?path=<blobPath>` streams the raw bytes of a local
//! file in 4 MiB reads. No authentication (intra-cluster network) and no
//! range support; peers re-request the whole chunk on failure.

use axum::body::Body;
use axum::extract::Query;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

/// Read buffer for streamed chunks.
const STREAM_BUF_SIZE: usize = 4 * 1024 * 1024;

/// Query parameters for `/sync`.
#[derive(Debug, Deserialize)]
pub struct SyncParams {
    /// Absolute path of the local file to stream.
    path: Option<String>,
}

/// Build the agent's HTTP router.
pub fn router() -> Router {
    Router::new().route("/sync", get(send_chunk))
}

/// Stream a local chunk file to a peer.
async fn send_chunk(Query(params): Query<SyncParams>) -> Response {
    let Some(path) = params.path else {
        return (StatusCode::BAD_REQUEST, "path is required").into_response();
    };

    let file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(error) => {
            warn!(path = %path, %error, "sync request for unreadable file");
            return (StatusCode::NOT_FOUND, "file not found").into_response();
        }
    };

    debug!(path = %path, "streaming chunk to peer");
    // A read error mid-stream aborts the body and drops the connection; the
    // requesting agent retries the whole chunk.
    let stream = ReaderStream::with_capacity(file, STREAM_BUF_SIZE);
    Body::from_stream(stream).into_response()
}
