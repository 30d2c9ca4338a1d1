//! Torrent admission: defaulting and validation
//!
//! Defaults: `preheat=true`, `replicas=1`, `reclaimPolicy=Retain`, hub name
//! `Huggingface`, revision `main`.
//!
//! Validation: `hub` is required, `ttlSecondsAfterReady ∈ {nil, 0}`,
//! `replicas ∈ [1, 99]`; on update `preheat` may only go false→true and
//! `reclaimPolicy` is immutable.

use axum::Json;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
use kube::core::DynamicObject;
use tracing::error;

use shoal_common::crd::{Torrent, HUGGINGFACE_HUB};

/// Handle the mutating review: inject spec defaults as a JSON patch.
pub async fn mutate_handler(
    Json(body): Json<AdmissionReview<Torrent>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let request: AdmissionRequest<Torrent> = match body.try_into() {
        Ok(request) => request,
        Err(e) => {
            error!(error = %e, "failed to parse torrent mutate request");
            return Json(AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };

    let response = AdmissionResponse::from(&request);
    let Some(torrent) = &request.object else {
        return Json(response.into_review());
    };

    let patches = default_patches(torrent);
    if patches.is_empty() {
        return Json(response.into_review());
    }

    let patch: json_patch::Patch = match serde_json::from_value(serde_json::Value::Array(patches)) {
        Ok(patch) => patch,
        Err(e) => return Json(AdmissionResponse::invalid(e.to_string()).into_review()),
    };

    match response.with_patch(patch) {
        Ok(response) => Json(response.into_review()),
        Err(e) => Json(AdmissionResponse::invalid(e.to_string()).into_review()),
    }
}

/// Handle the validating review.
pub async fn validate_handler(
    Json(body): Json<AdmissionReview<Torrent>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let request: AdmissionRequest<Torrent> = match body.try_into() {
        Ok(request) => request,
        Err(e) => {
            error!(error = %e, "failed to parse torrent validate request");
            return Json(AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };

    let response = AdmissionResponse::from(&request);
    let Some(torrent) = &request.object else {
        return Json(response.into_review());
    };

    let result = match request.operation {
        Operation::Update => match &request.old_object {
            Some(old) => validate_update(old, torrent),
            None => validate(torrent),
        },
        _ => validate(torrent),
    };

    match result {
        Ok(()) => Json(response.into_review()),
        Err(reason) => Json(response.deny(reason).into_review()),
    }
}

/// JSON patch operations filling in unset defaulted fields.
fn default_patches(torrent: &Torrent) -> Vec<serde_json::Value> {
    let mut patches = Vec::new();
    let add = |path: &str, value: serde_json::Value| {
        serde_json::json!({"op": "add", "path": path, "value": value})
    };

    if torrent.spec.preheat.is_none() {
        patches.push(add("/spec/preheat", serde_json::json!(true)));
    }
    if torrent.spec.replicas.is_none() {
        patches.push(add("/spec/replicas", serde_json::json!(1)));
    }
    if torrent.spec.reclaim_policy.is_none() {
        patches.push(add("/spec/reclaimPolicy", serde_json::json!("Retain")));
    }
    if let Some(hub) = &torrent.spec.hub {
        if hub.name.is_none() {
            patches.push(add("/spec/hub/name", serde_json::json!(HUGGINGFACE_HUB)));
        }
        if hub.revision.is_none() {
            patches.push(add("/spec/hub/revision", serde_json::json!("main")));
        }
    }

    patches
}

/// Static validation applied on create and update.
fn validate(torrent: &Torrent) -> Result<(), String> {
    let Some(hub) = &torrent.spec.hub else {
        return Err("spec.hub: hub can't be null".to_string());
    };

    if let Some(name) = &hub.name {
        if name != HUGGINGFACE_HUB {
            return Err(format!(
                "spec.hub.name: unsupported hub {name:?}, only {HUGGINGFACE_HUB} is supported"
            ));
        }
    }

    if let Some(ttl) = torrent.spec.ttl_seconds_after_ready {
        if ttl != 0 {
            return Err(
                "spec.ttlSecondsAfterReady: only nil and 0 are supported right now".to_string(),
            );
        }
    }

    if let Some(replicas) = torrent.spec.replicas {
        if !(1..=99).contains(&replicas) {
            return Err("spec.replicas: must be between 1 and 99".to_string());
        }
    }

    Ok(())
}

/// Update-only invariants on top of [`validate`].
fn validate_update(old: &Torrent, new: &Torrent) -> Result<(), String> {
    if old.preheat() && !new.preheat() {
        return Err("spec.preheat: preheat can only be transitioned from false to true".to_string());
    }

    if old.reclaim_policy() != new.reclaim_policy() {
        return Err("spec.reclaimPolicy: field is immutable".to_string());
    }

    validate(new)
}
