use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::services::upload::UploadBatchFailure;
use crate::utils::validation::ValidationError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Bad Request: {0}")]
    BadRequest(String),

    #[error("Payload Too Large: {0}")]
    PayloadTooLarge(String),

    #[error(transparent)]
    UploadFailed(#[from] UploadBatchFailure),
}

impl From<ValidationError> for AppError {
    fn from(e: ValidationError) -> Self {
        match e.code {
            "FILE_TOO_LARGE" => AppError::PayloadTooLarge(e.message),
            _ => AppError::BadRequest(e.message),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::PayloadTooLarge(msg) => (StatusCode::PAYLOAD_TOO_LARGE, msg),
            AppError::UploadFailed(e) => {
                for failure in e.failures() {
                    tracing::error!(
                        index = failure.index,
                        "Upload worker error: {:#}",
                        failure.source
                    );
                }
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!(
                        "Image upload failed: asset #{} could not be stored",
                        e.first_failure().index
                    ),
                )
            }
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}
