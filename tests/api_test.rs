use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt; // for `oneshot`

use vidvault::api::{AppState, router};
use vidvault::config::{ByteSize, Config};
use vidvault::extractor::{DownloadRequest, MediaKind};
use vidvault::jobs::{Job, JobStatus};

/// Defaults with scratch storage and a tool that cannot be launched
fn create_test_config(temp_dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.storage.temp_dir = temp_dir.path().join("downloads");
    config.extractor.program = temp_dir
        .path()
        .join("no-such-tool")
        .to_string_lossy()
        .into_owned();
    config
}

async fn build_test_app(config: Config) -> (Router, AppState) {
    let state = AppState::new(config).expect("Failed to build app state");
    (router(state.clone()), state)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health_endpoint() {
    let temp_dir = TempDir::new().unwrap();
    let (app, _) = build_test_app(create_test_config(&temp_dir)).await;

    for uri in ["/health", "/api/health"] {
        let response = app.clone().oneshot(get(uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
        assert_eq!(body["jobs"]["processing"], 0);
        assert_eq!(body["components"]["api"], "healthy");
    }
}

#[tokio::test]
async fn test_platforms_listed_in_order() {
    let temp_dir = TempDir::new().unwrap();
    let (app, _) = build_test_app(create_test_config(&temp_dir)).await;

    let response = app.oneshot(get("/api/platforms")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    let platforms = body["data"]["platforms"].as_array().unwrap();
    assert_eq!(platforms.len(), 7);
    assert_eq!(platforms[0], json!({"id": "youtube", "name": "YouTube"}));
    assert_eq!(platforms[4]["name"], "Twitter/X");
}

#[tokio::test]
async fn test_validate_url() {
    let temp_dir = TempDir::new().unwrap();
    let (app, _) = build_test_app(create_test_config(&temp_dir)).await;

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/validate-url",
            json!({"url": "https://www.tiktok.com/@user/video/1"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"]["valid"], true);
    assert_eq!(body["data"]["platform"], "tiktok");

    let response = app
        .oneshot(post_json("/api/validate-url", json!({"url": "not a url"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "Invalid URL format");
}

#[tokio::test]
async fn test_video_info_requires_url() {
    let temp_dir = TempDir::new().unwrap();
    let (app, _) = build_test_app(create_test_config(&temp_dir)).await;

    let response = app
        .oneshot(post_json("/api/video/info", json!({})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"], "URL is required");
}

#[tokio::test]
async fn test_download_missing_parameters() {
    let temp_dir = TempDir::new().unwrap();
    let (app, state) = build_test_app(create_test_config(&temp_dir)).await;

    let response = app
        .oneshot(post_json(
            "/api/download",
            json!({"url": "https://youtu.be/abc", "type": "video"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"], "Missing required parameters: quality, format");
    assert_eq!(state.orchestrator.counts().await.total(), 0);
}

#[tokio::test]
async fn test_download_invalid_content_type() {
    let temp_dir = TempDir::new().unwrap();
    let (app, _) = build_test_app(create_test_config(&temp_dir)).await;

    let request = Request::builder()
        .method("POST")
        .uri("/api/download")
        .header(header::CONTENT_TYPE, "text/plain")
        .body(Body::from("{}"))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["code"], "INVALID_PAYLOAD");
}

#[tokio::test]
async fn test_payload_too_large() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = create_test_config(&temp_dir);
    config.server.max_payload_bytes = ByteSize(64);
    let (app, _) = build_test_app(config).await;

    let padding = "x".repeat(256);
    let response = app
        .oneshot(post_json(
            "/api/video/info",
            json!({"url": "https://youtu.be/abc", "padding": padding}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn test_progress_unknown_job() {
    let temp_dir = TempDir::new().unwrap();
    let (app, _) = build_test_app(create_test_config(&temp_dir)).await;

    for id in ["0190a8e0-0000-7000-8000-000000000000", "not-a-uuid"] {
        let response = app
            .clone()
            .oneshot(get(&format!("/api/download/progress/{id}")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_json(response).await;
        assert_eq!(body["error"], "Download job not found");
    }
}

#[tokio::test]
async fn test_file_of_processing_job_is_not_ready() {
    let temp_dir = TempDir::new().unwrap();
    let (app, state) = build_test_app(create_test_config(&temp_dir)).await;

    let request =
        DownloadRequest::new("https://youtu.be/abc", MediaKind::Video, "720p", Some("mp4")).unwrap();
    let table = state.orchestrator.table();
    let job_id = table.insert(Job::new(&request, None)).await;
    table.update(&job_id, |job| job.start()).await.unwrap();

    let response = app
        .clone()
        .oneshot(get(&format!("/api/download/file/{job_id}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"], "Download is processing. Cannot retrieve file.");

    // the record survives a rejected retrieval
    let response = app
        .oneshot(get(&format!("/api/download/progress/{job_id}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"]["status"], "processing");
    assert_eq!(body["data"]["type"], "video");
}

#[tokio::test]
async fn test_download_with_unlaunchable_tool_fails_job() {
    let temp_dir = TempDir::new().unwrap();
    let (app, _) = build_test_app(create_test_config(&temp_dir)).await;

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/download",
            json!({"url": "https://youtu.be/abc", "type": "audio", "quality": "128kbps", "format": "mp3"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = body_json(response).await;
    assert_eq!(body["data"]["status"], "processing");
    let job_id = body["data"]["jobId"].as_str().unwrap().to_string();

    let mut status = Value::Null;
    for _ in 0..50 {
        let response = app
            .clone()
            .oneshot(get(&format!("/api/download/progress/{job_id}")))
            .await
            .unwrap();
        let body = body_json(response).await;
        status = body["data"].clone();
        if status["status"] != "processing" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert_eq!(status["status"], JobStatus::Failed.as_str());
    assert!(status["error"].as_str().is_some_and(|e| !e.is_empty()));
    assert!(!temp_dir.path().join("downloads").join(&job_id).exists());
}

#[tokio::test]
async fn test_rate_limit() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = create_test_config(&temp_dir);
    config.rate_limit.max_requests = 2;
    let (app, _) = build_test_app(config).await;

    for _ in 0..2 {
        let response = app.clone().oneshot(get("/api/platforms")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = app.clone().oneshot(get("/api/platforms")).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let body = body_json(response).await;
    assert_eq!(body["error"], "Too many requests, please try again later.");

    // health checks are never limited
    let response = app.oneshot(get("/api/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_thumbnail_requires_url() {
    let temp_dir = TempDir::new().unwrap();
    let (app, _) = build_test_app(create_test_config(&temp_dir)).await;

    let response = app.oneshot(get("/api/thumbnail")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"], "URL parameter required");
}
