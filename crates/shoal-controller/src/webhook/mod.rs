//! Admission webhooks for Shoal CRDs
//!
//! Defaulting and static validation only: invalid declarations are rejected
//! before they ever reach a controller. TLS termination is left to the
//! deployment (the webhook Service fronts this router); the handlers speak
//! plain AdmissionReview JSON.

pub mod replication;
pub mod torrent;

use axum::{routing::post, Router};

/// Create the webhook router with all admission endpoints.
pub fn webhook_router() -> Router {
    Router::new()
        .route("/mutate-v1alpha1-torrent", post(torrent::mutate_handler))
        .route("/validate-v1alpha1-torrent", post(torrent::validate_handler))
        .route(
            "/validate-v1alpha1-replication",
            post(replication::validate_handler),
        )
}
