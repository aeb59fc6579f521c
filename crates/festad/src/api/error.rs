use crate::engine::EngineError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// User-visible errors from the HTTP surface. The Display strings of the
/// 400 variants are the exact response bodies.
#[derive(Error, Debug)]
pub enum ApiError {
    /// Wrong extension or missing/unusable form part.
    #[error("Invalid file format.")]
    InvalidUpload,
    /// The uploaded selfie contained no detectable face.
    #[error("No face detected in selfie.")]
    NoFaceDetected,
    #[error("not found")]
    NotFound,
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::NoFaceDetected => ApiError::NoFaceDetected,
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::InvalidUpload | ApiError::NoFaceDetected => {
                (StatusCode::BAD_REQUEST, self.to_string()).into_response()
            }
            ApiError::NotFound => StatusCode::NOT_FOUND.into_response(),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error").into_response()
            }
        }
    }
}
