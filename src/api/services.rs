use std::collections::HashMap;

use axum::{
    Json,
    body::Body,
    extract::{Path, Query, State, rejection::QueryRejection},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::IntoResponse,
};
use bytes::Bytes;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use super::{
    error::ApiError,
    models::{
        ApiResponse, DownloadAccepted, DownloadBody, HealthResponse, PlatformsResponse,
        ProgressResponse, ThumbnailQuery, UrlRequest, ValidateUrlResponse, VideoInfoResponse,
    },
    state::AppState,
    utils::{content_disposition, content_type_for, require_json},
    validation::{require_url, validate_download},
};
use crate::jobs::{JobError, JobId, JobStatus};
use crate::platform::Platform;

const JOB_ID_HEADER: &str = "x-job-id";
const THUMBNAIL_CACHE_CONTROL: &str = "public, max-age=3600";

/// Health check (GET /health, GET /api/health)
///
/// Always 200 while the process serves requests; job counts and counters
/// are included for operators.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let mut components = HashMap::new();
    components.insert("api".to_string(), "healthy".to_string());
    components.insert("job_table".to_string(), "healthy".to_string());
    components.insert("extractor".to_string(), state.config.extractor.program.clone());

    let response = HealthResponse {
        status: "healthy".to_string(),
        components,
        version: env!("CARGO_PKG_VERSION").to_string(),
        jobs: state.orchestrator.counts().await,
        metrics: state.metrics.snapshot(),
    };

    (StatusCode::OK, Json(response))
}

/// GET /api/platforms
pub async fn platforms() -> impl IntoResponse {
    Json(ApiResponse::ok(PlatformsResponse::supported()))
}

/// POST /api/validate-url
pub async fn validate_url(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Body,
) -> Result<impl IntoResponse, ApiError> {
    let request: UrlRequest = read_json(&state, &headers, body).await?;
    let url = require_url(request.url.as_deref())?;

    Ok(Json(ApiResponse::ok(ValidateUrlResponse {
        valid: true,
        platform: Platform::detect(url.as_str()),
        url: url.into(),
    })))
}

/// Video metadata (POST /api/video/info)
///
/// Runs one metadata query per request; nothing is cached.
pub async fn video_info(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Body,
) -> Result<impl IntoResponse, ApiError> {
    let request: UrlRequest = read_json(&state, &headers, body).await?;
    let url = require_url(request.url.as_deref())?;

    state.metrics.metadata_query();
    let info = state.extractor.fetch(url.as_str()).await?;

    Ok(Json(ApiResponse::ok(VideoInfoResponse::from(info))))
}

/// Starts a background download (POST /api/download)
///
/// Returns 202 with the job id as soon as the job is registered; progress is
/// polled via `GET /api/download/progress/{jobId}`.
pub async fn start_download(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Body,
) -> Result<impl IntoResponse, ApiError> {
    let body: DownloadBody = read_json(&state, &headers, body).await?;
    let request = validate_download(&body)?;

    let job_id = state.orchestrator.create_job(request).await?;

    let response = DownloadAccepted {
        job_id,
        status: JobStatus::Processing,
        message: "Download initiated. Use the jobId to check progress.".to_string(),
    };

    Ok((StatusCode::ACCEPTED, Json(ApiResponse::ok(response))))
}

/// GET /api/download/progress/{jobId}
pub async fn download_progress(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let job_id = parse_job_id(&job_id)?;
    let job = state
        .orchestrator
        .get_job(&job_id)
        .await
        .ok_or(JobError::NotFound(job_id))?;

    Ok(Json(ApiResponse::ok(ProgressResponse::from(&job))))
}

/// One-time file retrieval (GET /api/download/file/{jobId})
///
/// The job and its directory are removed once the body has been sent or the
/// client goes away.
pub async fn download_file(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let job_id = parse_job_id(&job_id)?;
    let artifact = state.orchestrator.retrieve(&job_id).await?;

    let headers = file_headers(&artifact.filename, artifact.size);
    Ok((headers, Body::from_stream(artifact.into_stream())))
}

/// HEAD /api/download/file/{jobId}
///
/// Answers with the headers a GET would send and leaves the job retrievable.
pub async fn download_file_head(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let job_id = parse_job_id(&job_id)?;
    let info = state.orchestrator.inspect(&job_id).await?;

    Ok(file_headers(&info.filename, info.size))
}

fn file_headers(filename: &str, size: u64) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(content_type_for(filename)),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(size));
    headers.insert(header::CONTENT_DISPOSITION, content_disposition(filename));
    headers
}

/// Streams the tool's output straight to the client (GET /api/download/stream)
///
/// The job is tracked like any other, but its bytes never touch the disk.
/// Headers go out before the tool reports a title, so the attachment is
/// named `download.<format>`.
pub async fn stream_download(
    State(state): State<AppState>,
    query: Result<Query<DownloadBody>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(params) = query.map_err(|rejection| ApiError::InvalidPayload(rejection.body_text()))?;
    let request = validate_download(&params)?;
    let filename = request.fallback_filename();

    let (job_id, rx) = state.orchestrator.create_stream_job(request).await?;
    debug!(job_id = %job_id, filename = %filename, "Streaming response started");

    let chunks = futures_util::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|chunk| (chunk, rx))
    });

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(content_type_for(&filename)),
    );
    headers.insert(header::CONTENT_DISPOSITION, content_disposition(&filename));
    if let Ok(value) = HeaderValue::from_str(&job_id.to_string()) {
        headers.insert(JOB_ID_HEADER, value);
    }

    Ok((headers, Body::from_stream(chunks)))
}

/// Thumbnail proxy (GET /api/thumbnail?url=...)
pub async fn thumbnail(
    State(state): State<AppState>,
    query: Result<Query<ThumbnailQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(params) = query.map_err(|rejection| ApiError::InvalidPayload(rejection.body_text()))?;
    let url = params
        .url
        .filter(|url| !url.trim().is_empty())
        .ok_or_else(|| ApiError::InvalidPayload("URL parameter required".to_string()))?;

    let image = state.thumbnails.fetch(&url).await?;

    let content_type = HeaderValue::from_str(&image.content_type)
        .unwrap_or_else(|_| HeaderValue::from_static("image/jpeg"));
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, content_type);
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static(THUMBNAIL_CACHE_CONTROL),
    );

    Ok((headers, image.body))
}

/// Malformed ids can never name a job, so they read as "not found"
fn parse_job_id(raw: &str) -> Result<JobId, ApiError> {
    JobId::parse_str(raw).map_err(|_| {
        info!(job_id = raw, "Rejected malformed job id");
        ApiError::Job(JobError::NotFound(JobId::nil()))
    })
}

/// Checks the content type, then reads at most `max_payload_bytes` and parses JSON.
///
/// Decompression is handled by `RequestDecompressionLayer`, so the limit
/// applies to the decoded body.
async fn read_json<T: DeserializeOwned>(
    state: &AppState,
    headers: &HeaderMap,
    body: Body,
) -> Result<T, ApiError> {
    require_json(headers)?;
    let data = read_body(body, state.config.server.max_payload_bytes.as_usize()).await?;
    Ok(serde_json::from_slice(&data)?)
}

async fn read_body(body: Body, limit: usize) -> Result<Bytes, ApiError> {
    let collected = Limited::new(body, limit).collect().await.map_err(|err| {
        if err.downcast_ref::<LengthLimitError>().is_some() {
            ApiError::PayloadTooLarge(limit)
        } else {
            ApiError::Internal(err.to_string())
        }
    })?;

    Ok(collected.to_bytes())
}
