use axum::{Json, http::StatusCode, response::IntoResponse};
use thiserror::Error;

use super::models::ErrorResponse;
use super::thumbnail::ThumbnailError;
use super::validation::RequestValidationError;
use crate::extractor::ExtractorError;
use crate::jobs::JobError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    InvalidPayload(String),
    #[error("payload exceeds {0} bytes")]
    PayloadTooLarge(usize),
    #[error("Too many requests, please try again later.")]
    RateLimited,
    #[error(transparent)]
    Extractor(#[from] ExtractorError),
    #[error(transparent)]
    Job(#[from] JobError),
    #[error("Failed to fetch thumbnail")]
    Thumbnail(#[from] ThumbnailError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidPayload(_) => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Extractor(e) => match e {
                ExtractorError::InvalidInput(_) | ExtractorError::ExtractionFailed(_) => {
                    StatusCode::BAD_REQUEST
                }
                ExtractorError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
                ExtractorError::DownloadFailed(_) => StatusCode::BAD_GATEWAY,
                ExtractorError::SpawnFailure { .. }
                | ExtractorError::MalformedMetadata(_)
                | ExtractorError::NoOutputProduced
                | ExtractorError::OutputMissing(_)
                | ExtractorError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Job(e) => match e {
                JobError::NotFound(_) | JobError::ArtifactMissing(_) => StatusCode::NOT_FOUND,
                JobError::NotReady(_) => StatusCode::BAD_REQUEST,
                JobError::InvalidTransition { .. } => StatusCode::CONFLICT,
                JobError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Thumbnail(ThumbnailError::InvalidUrl(_)) => StatusCode::BAD_REQUEST,
            ApiError::Thumbnail(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidPayload(_) => "INVALID_PAYLOAD",
            ApiError::PayloadTooLarge(_) => "PAYLOAD_TOO_LARGE",
            ApiError::RateLimited => "RATE_LIMITED",
            ApiError::Extractor(e) => e.code(),
            ApiError::Job(e) => match e {
                JobError::NotFound(_) => "JOB_NOT_FOUND",
                JobError::NotReady(_) => "JOB_NOT_READY",
                JobError::ArtifactMissing(_) => "FILE_NOT_FOUND",
                JobError::InvalidTransition { .. } => "INVALID_TRANSITION",
                JobError::Io(_) => "IO_ERROR",
            },
            ApiError::Thumbnail(_) => "THUMBNAIL_FAILED",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::Job(JobError::NotFound(_)) => "Download job not found".to_string(),
            ApiError::Job(JobError::NotReady(status)) => {
                format!("Download is {status}. Cannot retrieve file.")
            }
            ApiError::Job(JobError::ArtifactMissing(_)) => "File not found".to_string(),
            ApiError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "Request failed");
        }

        let body = ErrorResponse {
            success: false,
            code: self.code(),
            error: self.message(),
        };

        (status, Json(body)).into_response()
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(value: serde_json::Error) -> Self {
        ApiError::InvalidPayload(value.to_string())
    }
}

impl From<RequestValidationError> for ApiError {
    fn from(value: RequestValidationError) -> Self {
        ApiError::InvalidPayload(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::JobStatus;
    use std::time::Duration;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError::from(JobError::NotReady(JobStatus::Processing)).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(JobError::NotFound(uuid::Uuid::nil())).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(ExtractorError::ExtractionFailed("ERROR: private".into())).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(ExtractorError::Timeout(Duration::from_secs(60))).status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(ApiError::RateLimited.status_code(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn test_not_ready_message_names_status() {
        let err = ApiError::from(JobError::NotReady(JobStatus::Processing));
        assert_eq!(err.message(), "Download is processing. Cannot retrieve file.");
        assert_eq!(err.code(), "JOB_NOT_READY");
    }
}
