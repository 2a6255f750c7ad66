//! HTTP handlers.
//!
//! Every handler follows the same shape: validate the JSON body, hand the
//! images to the engine thread, then compare or return the embedding.

use crate::error::{EncodeError, ServiceError, VerifyError};
use crate::server::AppState;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use facecheck_core::{compare, Embedding, Verdict};
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Deserialize)]
pub struct VerifyFaceRequest {
    pub image1: Option<String>,
    pub image2: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EncodeFaceRequest {
    pub image: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct VerifyEncodingRequest {
    pub encoding: Option<Vec<f32>>,
    pub image: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct EncodeFaceResponse {
    pub encoding: Embedding,
}

/// Treat blank strings like absent fields.
fn non_empty(field: Option<String>) -> Option<String> {
    field.filter(|s| !s.trim().is_empty())
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ServiceError> {
    payload.map(|Json(req)| req).map_err(|rejection| {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ServiceError::PayloadTooLarge
        } else {
            ServiceError::InvalidBody(rejection.body_text())
        }
    })
}

/// POST /verify-face: compare the first face of two images.
pub async fn verify_face(
    State(state): State<AppState>,
    payload: Result<Json<VerifyFaceRequest>, JsonRejection>,
) -> Result<Json<Verdict>, VerifyError> {
    let req = body(payload)?;
    let (Some(image1), Some(image2)) = (non_empty(req.image1), non_empty(req.image2)) else {
        return Err(ServiceError::Missing("Both images required").into());
    };

    let embeddings = state
        .engine
        .encode(vec![image1, image2])
        .await
        .map_err(|e| {
            ServiceError::from_engine(e, &["image1", "image2"], "No face detected in one or both images")
        })?;

    let verdict = compare(&embeddings[0], &embeddings[1]).map_err(ServiceError::from)?;
    tracing::info!(matched = verdict.matched, distance = verdict.distance, "verify-face");
    Ok(Json(verdict))
}

/// POST /encode-face: return the first face embedding of an image.
pub async fn encode_face(
    State(state): State<AppState>,
    payload: Result<Json<EncodeFaceRequest>, JsonRejection>,
) -> Result<Json<EncodeFaceResponse>, EncodeError> {
    let req = body(payload)?;
    let Some(image) = non_empty(req.image) else {
        return Err(ServiceError::Missing("Image required").into());
    };

    let encoding = state
        .engine
        .encode_one(image)
        .await
        .map_err(|e| ServiceError::from_engine(e, &["image"], "No face detected"))?;

    tracing::info!(dim = encoding.len(), "encode-face");
    Ok(Json(EncodeFaceResponse { encoding }))
}

/// POST /verify-encoding: compare a stored embedding against the first face of an image.
pub async fn verify_encoding(
    State(state): State<AppState>,
    payload: Result<Json<VerifyEncodingRequest>, JsonRejection>,
) -> Result<Json<Verdict>, VerifyError> {
    let req = body(payload)?;
    let (Some(encoding), Some(image)) = (req.encoding.filter(|e| !e.is_empty()), non_empty(req.image))
    else {
        return Err(ServiceError::Missing("Encoding and image required").into());
    };
    if encoding.iter().any(|v| !v.is_finite()) {
        return Err(ServiceError::InvalidBody("encoding contains non-finite values".into()).into());
    }

    let candidate = state
        .engine
        .encode_one(image)
        .await
        .map_err(|e| ServiceError::from_engine(e, &["image"], "No face detected in image"))?;

    let verdict = compare(&Embedding::new(encoding), &candidate).map_err(ServiceError::from)?;
    tracing::info!(matched = verdict.matched, distance = verdict.distance, "verify-encoding");
    Ok(Json(verdict))
}

/// GET /health: models are loaded before the listener starts, so the only
/// runtime failure left to report is a dead engine thread (503).
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let alive = state.engine.is_alive();
    let status = if alive {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = Json(json!({
        "status": if alive { "ok" } else { "unavailable" },
        "engine": if alive { "running" } else { "stopped" },
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.started.elapsed().as_secs(),
        "models": state.models.as_ref(),
    }));
    (status, body)
}

pub async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, Json(json!({ "error": "not found" })))
}
