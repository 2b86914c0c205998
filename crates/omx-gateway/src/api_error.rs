//! JSON error envelope returned by every failing handler.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use omx_jobs::JobError;
use serde_json::json;
use tracing::error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl GatewayApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, code, message)
    }

    pub fn payload_too_large(message: impl Into<String>) -> Self {
        Self::new(StatusCode::PAYLOAD_TOO_LARGE, "upload_too_large", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
    }
}

impl From<JobError> for GatewayApiError {
    fn from(error: JobError) -> Self {
        let status = match &error {
            JobError::Validation(_) => StatusCode::BAD_REQUEST,
            JobError::Conflict(_) => StatusCode::CONFLICT,
            JobError::RecoveryMiss(_) | JobError::UnknownJob(_) => StatusCode::NOT_FOUND,
            JobError::ProcessTimeout { .. } => StatusCode::REQUEST_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, error.kind().as_str(), error.to_string())
    }
}

impl IntoResponse for GatewayApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(code = self.code, message = self.message.as_str(), "request failed");
        }
        (
            self.status,
            Json(json!({
                "error": {
                    "code": self.code,
                    "message": self.message,
                }
            })),
        )
            .into_response()
    }
}
