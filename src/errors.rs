use crate::services::{
    blob_store::BlobStoreError, local_store::LocalStoreError, upload_service::UploadError,
};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// HTTP-facing error: a status plus a message, rendered as
/// `{"error": "...", "status": 400}`.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = self.status.as_u16(), error = %self.message, "request failed");
        } else {
            tracing::debug!(status = self.status.as_u16(), error = %self.message, "request rejected");
        }

        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<UploadError> for AppError {
    fn from(err: UploadError) -> Self {
        let status = match &err {
            UploadError::Validation(_) | UploadError::Integrity { .. } => StatusCode::BAD_REQUEST,
            UploadError::PartCount(_) | UploadError::TooLarge { .. } => {
                StatusCode::PAYLOAD_TOO_LARGE
            }
            UploadError::Store(BlobStoreError::NoSuchUpload { .. }) => StatusCode::NOT_FOUND,
            UploadError::Store(BlobStoreError::Operation { .. }) => StatusCode::BAD_GATEWAY,
        };
        AppError::new(status, err.to_string())
    }
}

impl From<LocalStoreError> for AppError {
    fn from(err: LocalStoreError) -> Self {
        let status = match &err {
            LocalStoreError::SignatureMismatch | LocalStoreError::Expired => StatusCode::FORBIDDEN,
            LocalStoreError::NoSuchUpload { .. } | LocalStoreError::NoSuchKey(_) => {
                StatusCode::NOT_FOUND
            }
            LocalStoreError::InvalidPart { .. } | LocalStoreError::InvalidUrl(_) => {
                StatusCode::BAD_REQUEST
            }
            LocalStoreError::SigningKey(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        AppError::new(status, err.to_string())
    }
}
