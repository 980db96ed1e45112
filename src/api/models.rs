//! Request and response bodies of the HTTP API.
//!
//! Every JSON response carries a `success` flag; payloads sit under `data`,
//! failures under `error` (see [`ErrorResponse`]). Field names are camelCase.
//!
//! ```json
//! POST /api/download
//! { "url": "https://youtu.be/abc", "type": "audio", "quality": "192kbps", "format": "mp3" }
//!
//! 202 Accepted
//! { "success": true, "data": { "jobId": "0190…", "status": "processing", "message": "…" } }
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::extractor::{MediaKind, VideoInfo};
use crate::humanize::format_count;
use crate::jobs::{Job, JobCounts, JobId, JobStatus};
use crate::observability::MetricsSnapshot;
use crate::platform::Platform;

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub code: &'static str,
    pub error: String,
}

/// Body of `POST /api/video/info` and `POST /api/validate-url`
#[derive(Debug, Default, Deserialize)]
pub struct UrlRequest {
    #[serde(default)]
    pub url: Option<String>,
}

/// Body of `POST /api/download` and query of `GET /api/download/stream`
#[derive(Debug, Default, Deserialize)]
pub struct DownloadBody {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: Option<MediaKind>,
    #[serde(default)]
    pub quality: Option<String>,
    #[serde(default)]
    pub format: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ThumbnailQuery {
    pub url: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Creator {
    pub username: String,
    pub display_name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub views: u64,
    pub likes: u64,
    pub views_formatted: String,
    pub likes_formatted: String,
}

#[derive(Debug, Serialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

/// VideoInfo plus presentation helpers for the client
#[derive(Debug, Serialize)]
pub struct VideoInfoResponse {
    #[serde(flatten)]
    pub info: VideoInfo,
    pub creator: Creator,
    pub stats: Stats,
    pub dimensions: Dimensions,
}

impl From<VideoInfo> for VideoInfoResponse {
    fn from(info: VideoInfo) -> Self {
        Self {
            creator: Creator {
                username: info.uploader.clone(),
                display_name: info.uploader.clone(),
            },
            stats: Stats {
                views: info.view_count,
                likes: info.like_count,
                views_formatted: format_count(info.view_count),
                likes_formatted: format_count(info.like_count),
            },
            dimensions: Dimensions {
                width: info.width,
                height: info.height,
            },
            info,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadAccepted {
    pub job_id: JobId,
    pub status: JobStatus,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressResponse {
    pub job_id: JobId,
    pub status: JobStatus,
    pub progress: u8,
    #[serde(rename = "type")]
    pub kind: MediaKind,
    pub format: String,
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

impl From<&Job> for ProgressResponse {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id,
            status: job.status(),
            progress: job.progress(),
            kind: job.media_kind,
            format: job.format.clone(),
            error: job.failure_reason().map(str::to_owned),
            filename: job.output().and_then(|output| output.filename()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ValidateUrlResponse {
    pub valid: bool,
    pub platform: Platform,
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct PlatformEntry {
    pub id: &'static str,
    pub name: &'static str,
}

#[derive(Debug, Serialize)]
pub struct PlatformsResponse {
    pub platforms: Vec<PlatformEntry>,
}

impl PlatformsResponse {
    pub fn supported() -> Self {
        Self {
            platforms: Platform::SUPPORTED
                .iter()
                .map(|p| PlatformEntry {
                    id: p.id(),
                    name: p.display_name(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub components: HashMap<String, String>,
    pub version: String,
    pub jobs: JobCounts,
    pub metrics: MetricsSnapshot,
}
