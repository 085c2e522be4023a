//! Error types for the upload pipeline

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

/// Message shown when the form is submitted without a usable file.
pub const EMPTY_UPLOAD_MESSAGE: &str = "Please select a valid image file.";

/// Failure to turn the uploaded bytes into a bitmap
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Unsupported image format")]
    UnsupportedFormat,

    #[error("Failed to decode image: {0}")]
    DecodeFailed(String),
}

/// Failure to encode the annotated bitmap
#[derive(Debug, Error)]
#[error("Failed to encode image: {0}")]
pub struct EncodeError(pub String);

/// Failure reported by, or while talking to, the external analyzer
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("Analyzer request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Analyzer returned {status}: {code}: {message}")]
    Service {
        status: u16,
        code: String,
        message: String,
    },

    #[error("Analyzer response could not be read: {0}")]
    MalformedResponse(String),

    #[error("Analyzer did not answer within {0:?}")]
    Timeout(Duration),
}

/// Everything that can end an upload request early
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    #[error(transparent)]
    Encode(#[from] EncodeError),
}

impl UploadError {
    pub fn empty_upload() -> Self {
        UploadError::Validation(EMPTY_UPLOAD_MESSAGE.to_string())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            UploadError::Validation(_) | UploadError::Decode(_) => StatusCode::BAD_REQUEST,
            UploadError::Analysis(AnalysisError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
            UploadError::Analysis(_) => StatusCode::BAD_GATEWAY,
            UploadError::Encode(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for UploadError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Startup configuration problems
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid analyzer endpoint {0:?}: {1}")]
    InvalidEndpoint(String, String),

    #[error("Analyzer key is empty")]
    EmptyKey,

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}
