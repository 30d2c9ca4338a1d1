//! Peer sync end to end: one agent serving a chunk, another pulling it
//!
//! Runs the real `/sync` server over a loopback listener and the real fetch
//! path against it, then checks the receiving side's on-disk layout.

use shoal_agent::handler::{create_symlink, peer, snapshot_path_for};
use shoal_agent::server;

async fn spawn_peer() -> (String, u16) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, server::router()).await.unwrap();
    });
    (addr.ip().to_string(), addr.port())
}

#[tokio::test]
async fn chunk_streams_between_peers() {
    // node1's workspace holds the blob.
    let peer_dir = tempfile::TempDir::new().unwrap();
    let peer_blob = peer_dir
        .path()
        .join("facebook--opt-125m/blobs/aaaa--0001");
    tokio::fs::create_dir_all(peer_blob.parent().unwrap())
        .await
        .unwrap();
    tokio::fs::write(&peer_blob, b"the chunk bytes").await.unwrap();

    let (ip, port) = spawn_peer().await;

    // node2 pulls it into its own workspace and links the snapshot.
    let local_dir = tempfile::TempDir::new().unwrap();
    let local_blob = local_dir
        .path()
        .join("facebook--opt-125m/blobs/aaaa--0001")
        .to_string_lossy()
        .into_owned();

    let http = reqwest::Client::new();
    peer::recv_chunk(&http, &ip, port, peer_blob.to_str().unwrap(), &local_blob)
        .await
        .unwrap();

    assert_eq!(
        tokio::fs::read(&local_blob).await.unwrap(),
        b"the chunk bytes"
    );

    let snapshot = snapshot_path_for(&local_blob, "main", "model.bin").unwrap();
    create_symlink(&local_blob, &snapshot).await.unwrap();
    assert_eq!(
        tokio::fs::read_link(&snapshot)
            .await
            .unwrap()
            .to_string_lossy(),
        "../../blobs/aaaa--0001"
    );
    assert_eq!(
        tokio::fs::read(&snapshot).await.unwrap(),
        b"the chunk bytes"
    );
}

#[tokio::test]
async fn missing_chunk_on_peer_is_an_error() {
    let (ip, port) = spawn_peer().await;
    let local_dir = tempfile::TempDir::new().unwrap();
    let local_blob = local_dir
        .path()
        .join("blobs/aaaa--0001")
        .to_string_lossy()
        .into_owned();

    let http = reqwest::Client::new();
    let error = peer::recv_chunk(&http, &ip, port, "/nowhere/blobs/aaaa--0001", &local_blob)
        .await
        .unwrap_err();
    assert!(error.to_string().contains("404"));

    // Nothing half-written locally.
    assert!(tokio::fs::metadata(&local_blob).await.is_err());
}
