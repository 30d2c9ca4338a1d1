//! Admission webhook integration tests
//!
//! Drives the webhook router with full AdmissionReview payloads, the same
//! JSON the API server sends, and asserts on the review responses.

use axum::body::Body;
use http_body_util::BodyExt;
use tower::ServiceExt;

use shoal_controller::webhook::webhook_router;

async fn post_review(uri: &str, body: serde_json::Value) -> serde_json::Value {
    let request = axum::http::Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();

    let response = webhook_router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), 200);

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn review(
    kind: &str,
    plural: &str,
    operation: &str,
    object: serde_json::Value,
    old_object: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut request = serde_json::json!({
        "uid": "705ab4f5-6393-4ec5-9a20-9f5e6b9e1d44",
        "kind": {"group": "shoal.dev", "version": "v1alpha1", "kind": kind},
        "resource": {"group": "shoal.dev", "version": "v1alpha1", "resource": plural},
        "name": object["metadata"]["name"],
        "operation": operation,
        "userInfo": {},
        "object": object,
        "dryRun": false,
    });
    if let Some(old) = old_object {
        request["oldObject"] = old;
    }

    serde_json::json!({
        "apiVersion": "admission.k8s.io/v1",
        "kind": "AdmissionReview",
        "request": request,
    })
}

fn torrent(spec: serde_json::Value) -> serde_json::Value {
    serde_json::json!({
        "apiVersion": "shoal.dev/v1alpha1",
        "kind": "Torrent",
        "metadata": {"name": "opt-125m"},
        "spec": spec,
    })
}

fn replication(spec: serde_json::Value) -> serde_json::Value {
    serde_json::json!({
        "apiVersion": "shoal.dev/v1alpha1",
        "kind": "Replication",
        "metadata": {"name": "aaaa--0001--ab12c"},
        "spec": spec,
    })
}

#[tokio::test]
async fn mutate_injects_torrent_defaults() {
    let body = review(
        "Torrent",
        "torrents",
        "CREATE",
        torrent(serde_json::json!({"hub": {"repoID": "facebook/opt-125m"}})),
        None,
    );

    let reply = post_review("/mutate-v1alpha1-torrent", body).await;
    let response = &reply["response"];
    assert_eq!(response["allowed"], true);
    assert_eq!(response["patchType"], "JSONPatch");
    assert!(!response["patch"].is_null());
}

#[tokio::test]
async fn mutate_leaves_complete_torrent_untouched() {
    let spec = serde_json::json!({
        "preheat": true,
        "replicas": 2,
        "reclaimPolicy": "Delete",
        "hub": {"name": "Huggingface", "repoID": "facebook/opt-125m", "revision": "main"},
    });
    let body = review("Torrent", "torrents", "CREATE", torrent(spec), None);

    let reply = post_review("/mutate-v1alpha1-torrent", body).await;
    let response = &reply["response"];
    assert_eq!(response["allowed"], true);
    assert!(response["patch"].is_null());
}

#[tokio::test]
async fn validate_rejects_torrent_without_hub() {
    let body = review("Torrent", "torrents", "CREATE", torrent(serde_json::json!({})), None);

    let reply = post_review("/validate-v1alpha1-torrent", body).await;
    let response = &reply["response"];
    assert_eq!(response["allowed"], false);
    let message = response["status"]["message"].as_str().unwrap_or_default();
    assert!(message.contains("hub"), "unexpected message: {message}");
}

#[tokio::test]
async fn validate_rejects_nonzero_ttl() {
    let spec = serde_json::json!({
        "hub": {"repoID": "facebook/opt-125m"},
        "ttlSecondsAfterReady": 300,
    });
    let body = review("Torrent", "torrents", "CREATE", torrent(spec), None);

    let reply = post_review("/validate-v1alpha1-torrent", body).await;
    assert_eq!(reply["response"]["allowed"], false);
}

#[tokio::test]
async fn validate_rejects_preheat_regression() {
    let old = torrent(serde_json::json!({
        "preheat": true,
        "hub": {"repoID": "facebook/opt-125m"},
    }));
    let new = torrent(serde_json::json!({
        "preheat": false,
        "hub": {"repoID": "facebook/opt-125m"},
    }));
    let body = review("Torrent", "torrents", "UPDATE", new, Some(old));

    let reply = post_review("/validate-v1alpha1-torrent", body).await;
    let response = &reply["response"];
    assert_eq!(response["allowed"], false);
    let message = response["status"]["message"].as_str().unwrap_or_default();
    assert!(message.contains("preheat"), "unexpected message: {message}");
}

#[tokio::test]
async fn validate_accepts_download_replication() {
    let spec = serde_json::json!({
        "nodeName": "node1",
        "chunkName": "aaaa--0001",
        "sizeBytes": 651,
        "source": {"hub": {"repoID": "facebook/opt-125m", "filename": "config.json"}},
        "destination": {"uri": "localhost:///workspace/models/facebook--opt-125m/blobs/aaaa--0001"},
    });
    let body = review("Replication", "replications", "CREATE", replication(spec), None);

    let reply = post_review("/validate-v1alpha1-replication", body).await;
    assert_eq!(reply["response"]["allowed"], true);
}

#[tokio::test]
async fn validate_rejects_download_without_destination() {
    let spec = serde_json::json!({
        "nodeName": "node1",
        "chunkName": "aaaa--0001",
        "sizeBytes": 651,
        "source": {"hub": {"repoID": "facebook/opt-125m"}},
    });
    let body = review("Replication", "replications", "CREATE", replication(spec), None);

    let reply = post_review("/validate-v1alpha1-replication", body).await;
    assert_eq!(reply["response"]["allowed"], false);
}

#[tokio::test]
async fn validate_rejects_deletion_with_destination() {
    let spec = serde_json::json!({
        "nodeName": "node1",
        "chunkName": "aaaa--0001",
        "sizeBytes": 651,
        "source": {"uri": "localhost:///workspace/models/x/snapshots/main/config.json"},
        "destination": {"uri": "localhost:///workspace/models/x/blobs/aaaa--0001"},
    });
    let body = review("Replication", "replications", "CREATE", replication(spec), None);

    let reply = post_review("/validate-v1alpha1-replication", body).await;
    assert_eq!(reply["response"]["allowed"], false);
}
