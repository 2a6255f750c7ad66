use crate::engine::EngineError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use facecheck_core::CompareError;
use serde_json::json;

/// Request-scoped failure, before it is shaped for a particular endpoint.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Required field(s) absent or empty; carries the client-facing reason.
    #[error("{0}")]
    Missing(&'static str),

    /// Body is not JSON or fields have the wrong type.
    #[error("invalid request body: {0}")]
    InvalidBody(String),

    #[error("request body too large")]
    PayloadTooLarge,

    /// Payload could not be turned into an image.
    #[error("{field} could not be decoded: {detail}")]
    Decode { field: &'static str, detail: String },

    /// The encoder found no face; carries the client-facing reason.
    #[error("{0}")]
    NoFace(&'static str),

    #[error(transparent)]
    Compare(#[from] CompareError),

    #[error("face engine failure: {0}")]
    Engine(EngineError),
}

impl ServiceError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::Missing(_)
            | ServiceError::InvalidBody(_)
            | ServiceError::Decode { .. }
            | ServiceError::NoFace(_)
            | ServiceError::Compare(_) => StatusCode::BAD_REQUEST,
            ServiceError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ServiceError::Engine(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Translate an engine failure, naming the request field by image index.
    pub fn from_engine(err: EngineError, fields: &[&'static str], no_face: &'static str) -> Self {
        match err {
            EngineError::Decode { index, source } => ServiceError::Decode {
                field: fields.get(index).copied().unwrap_or("image"),
                detail: source.to_string(),
            },
            EngineError::NoFaceDetected { .. } => ServiceError::NoFace(no_face),
            other => ServiceError::Engine(other),
        }
    }

    fn log(&self) {
        match self.status_code() {
            s if s.is_server_error() => tracing::error!(error = %self, "request failed"),
            _ => tracing::debug!(error = %self, "request rejected"),
        }
    }
}

/// Error body for the verify endpoints: `{"match": false, "reason": ...}`.
#[derive(Debug)]
pub struct VerifyError(pub ServiceError);

impl From<ServiceError> for VerifyError {
    fn from(err: ServiceError) -> Self {
        VerifyError(err)
    }
}

impl IntoResponse for VerifyError {
    fn into_response(self) -> Response {
        self.0.log();
        let body = Json(json!({ "match": false, "reason": self.0.to_string() }));
        (self.0.status_code(), body).into_response()
    }
}

/// Error body for the encode endpoint: `{"error": ...}`.
#[derive(Debug)]
pub struct EncodeError(pub ServiceError);

impl From<ServiceError> for EncodeError {
    fn from(err: ServiceError) -> Self {
        EncodeError(err)
    }
}

impl IntoResponse for EncodeError {
    fn into_response(self) -> Response {
        self.0.log();
        let body = Json(json!({ "error": self.0.to_string() }));
        (self.0.status_code(), body).into_response()
    }
}
