//! Replication admission: the source/destination matrix
//!
//! - `source.hub` set ⇒ destination must be a `localhost://` URI (downloads
//!   always land on the target node itself)
//! - `source.uri` = `remote://…` ⇒ destination must be a `localhost://` URI
//! - `source.uri` = `localhost://…` ⇒ destination must be nil (deletion)

use axum::Json;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview};
use kube::core::DynamicObject;
use tracing::error;

use shoal_common::crd::{parse_uri, Replication, Target, LOCALHOST_SCHEME, REMOTE_SCHEME};

/// Handle the validating review.
pub async fn validate_handler(
    Json(body): Json<AdmissionReview<Replication>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let request: AdmissionRequest<Replication> = match body.try_into() {
        Ok(request) => request,
        Err(e) => {
            error!(error = %e, "failed to parse replication validate request");
            return Json(AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };

    let response = AdmissionResponse::from(&request);
    let Some(replication) = &request.object else {
        return Json(response.into_review());
    };

    match validate(replication) {
        Ok(()) => Json(response.into_review()),
        Err(reason) => Json(response.deny(reason).into_review()),
    }
}

/// Static validation of the source/destination pair.
pub fn validate(replication: &Replication) -> Result<(), String> {
    let spec = &replication.spec;

    match &spec.source {
        Target::Hub { .. } => {
            let Some(destination) = &spec.destination else {
                return Err(
                    "spec.destination: destination.uri must not be nil once source.hub is set"
                        .to_string(),
                );
            };
            let Some(uri) = destination.uri() else {
                return Err(
                    "spec.destination.uri: destination must be a uri once source.hub is set"
                        .to_string(),
                );
            };
            expect_scheme(uri, LOCALHOST_SCHEME, "spec.destination.uri")?;
        }
        Target::Uri { uri } => {
            let (scheme, _) = parse_uri(uri).map_err(|e| format!("spec.source.uri: {e}"))?;
            match scheme {
                LOCALHOST_SCHEME => {
                    if spec.destination.is_some() {
                        return Err(
                            "spec.destination: destination must be nil once source is localhost"
                                .to_string(),
                        );
                    }
                }
                REMOTE_SCHEME => {
                    let Some(uri) = spec.destination.as_ref().and_then(|d| d.uri()) else {
                        return Err(
                            "spec.destination.uri: peer syncs must name a localhost destination"
                                .to_string(),
                        );
                    };
                    expect_scheme(uri, LOCALHOST_SCHEME, "spec.destination.uri")?;
                }
                other => {
                    return Err(format!("spec.source.uri: unknown scheme {other:?}"));
                }
            }
        }
    }

    Ok(())
}

fn expect_scheme(uri: &str, expected: &str, field: &str) -> Result<(), String> {
    let (scheme, _) = parse_uri(uri).map_err(|e| format!("{field}: {e}"))?;
    if scheme != expected {
        return Err(format!("{field}: must be a {expected}:// uri"));
    }
    Ok(())
}
