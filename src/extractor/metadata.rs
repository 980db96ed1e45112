//! Metadata queries: run the tool in dump-JSON mode and normalize its record

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::io::AsyncReadExt;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

use super::error::{ExtractorError, Result};
use super::formats::{FormatOption, RawFormat, select_audio_formats, select_video_formats};
use super::process::{self, ToolCommand};
use crate::config::ExtractorConfig;
use crate::humanize::format_duration;
use crate::platform::Platform;

const DEFAULT_WIDTH: u32 = 1920;
const DEFAULT_HEIGHT: u32 = 1080;

/// Fields that some extractors use instead of `thumbnail` (Instagram, TikTok, ...)
const PLATFORM_THUMBNAIL_FIELDS: [&str; 6] = [
    "display_url",
    "thumbnail_url",
    "thumbnail_src",
    "cover",
    "origin_cover",
    "dynamic_cover",
];

/// The tool's metadata record; everything is optional because extractors differ wildly
#[derive(Debug, Default, Deserialize)]
pub struct RawMetadata {
    pub id: Option<String>,
    #[serde(rename = "_type")]
    pub kind: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub thumbnail: Option<String>,
    pub thumbnails: Option<Vec<RawThumbnail>>,
    pub duration: Option<f64>,
    pub uploader: Option<String>,
    pub channel: Option<String>,
    pub upload_date: Option<String>,
    pub view_count: Option<f64>,
    pub like_count: Option<f64>,
    pub width: Option<f64>,
    pub height: Option<f64>,
    pub formats: Option<Vec<RawFormat>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawThumbnail {
    pub url: Option<String>,
    pub width: Option<f64>,
    pub height: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvailableFormats {
    pub video: Vec<FormatOption>,
    pub audio: Vec<FormatOption>,
}

/// Normalized metadata returned to clients; built fresh for every query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoInfo {
    pub id: String,
    pub platform: Platform,
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub description: String,
    pub thumbnail: String,
    pub duration: u64,
    pub duration_formatted: String,
    pub uploader: String,
    pub upload_date: String,
    pub view_count: u64,
    pub like_count: u64,
    pub width: u32,
    pub height: u32,
    pub original_url: String,
    pub available_formats: AvailableFormats,
}

/// Parses the tool's standard output into a metadata record.
///
/// The tool prints one JSON object; when it prints several (playlists) the
/// first line is used.
pub fn parse_metadata(stdout: &[u8]) -> Result<RawMetadata> {
    let text = String::from_utf8_lossy(stdout);
    let text = text.trim();
    if text.is_empty() {
        return Err(ExtractorError::MalformedMetadata("empty output".to_string()));
    }

    match serde_json::from_str::<RawMetadata>(text) {
        Ok(raw) => Ok(raw),
        Err(whole_err) => {
            let first = text.lines().next().unwrap_or_default();
            serde_json::from_str::<RawMetadata>(first)
                .map_err(|_| ExtractorError::MalformedMetadata(whole_err.to_string()))
        }
    }
}

fn count(value: Option<f64>) -> u64 {
    value
        .filter(|v| v.is_finite() && *v > 0.0)
        .map_or(0, |v| v as u64)
}

fn dimension(value: Option<f64>, default: u32) -> u32 {
    value
        .filter(|v| v.is_finite() && *v >= 1.0)
        .map_or(default, |v| v.round() as u32)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

/// Applies defaults and builds the client-facing format lists
pub fn normalize(raw: RawMetadata, source_url: &str) -> VideoInfo {
    let thumbnail = resolve_thumbnail(&raw);
    let formats = raw.formats.unwrap_or_default();
    let duration = count(raw.duration);

    VideoInfo {
        id: non_empty(raw.id).unwrap_or_else(|| "unknown".to_string()),
        platform: Platform::detect(source_url),
        kind: non_empty(raw.kind).unwrap_or_else(|| "video".to_string()),
        title: non_empty(raw.title).unwrap_or_else(|| "Untitled".to_string()),
        description: raw.description.unwrap_or_default(),
        thumbnail,
        duration,
        duration_formatted: format_duration(duration),
        uploader: non_empty(raw.uploader)
            .or(non_empty(raw.channel))
            .unwrap_or_else(|| "Unknown".to_string()),
        upload_date: raw.upload_date.unwrap_or_default(),
        view_count: count(raw.view_count),
        like_count: count(raw.like_count),
        width: dimension(raw.width, DEFAULT_WIDTH),
        height: dimension(raw.height, DEFAULT_HEIGHT),
        original_url: source_url.to_string(),
        available_formats: AvailableFormats {
            video: select_video_formats(&formats),
            audio: select_audio_formats(&formats),
        },
    }
}

/// Thumbnail lookup order: `thumbnail`, the largest `thumbnails` entry,
/// platform-specific fields, then generic `image`/`images` fields.
pub fn resolve_thumbnail(raw: &RawMetadata) -> String {
    if let Some(direct) = raw.thumbnail.as_deref().filter(|s| !s.is_empty()) {
        return direct.to_string();
    }

    if let Some(largest) = raw.thumbnails.as_deref().and_then(largest_thumbnail) {
        return largest;
    }

    for field in PLATFORM_THUMBNAIL_FIELDS {
        if let Some(url) = raw.extra.get(field).and_then(image_url) {
            return url;
        }
    }

    if let Some(url) = raw.extra.get("image").and_then(image_url) {
        return url;
    }
    if let Some(url) = raw
        .extra
        .get("images")
        .and_then(Value::as_array)
        .and_then(|images| images.iter().find_map(image_url))
    {
        return url;
    }

    String::new()
}

fn largest_thumbnail(thumbnails: &[RawThumbnail]) -> Option<String> {
    // The tool lists thumbnails by ascending preference, so ties go to the later entry
    thumbnails
        .iter()
        .enumerate()
        .filter(|(_, t)| t.url.as_deref().is_some_and(|u| !u.is_empty()))
        .max_by(|(ia, a), (ib, b)| {
            let area = |t: &RawThumbnail| t.width.unwrap_or(0.0) * t.height.unwrap_or(0.0);
            area(a).total_cmp(&area(b)).then(ia.cmp(ib))
        })
        .and_then(|(_, t)| t.url.clone())
}

/// Accepts either a URL string or an object carrying a `url` field
fn image_url(value: &Value) -> Option<String> {
    match value {
        Value::String(url) if !url.is_empty() => Some(url.clone()),
        Value::Object(obj) => obj
            .get("url")
            .and_then(Value::as_str)
            .filter(|u| !u.is_empty())
            .map(String::from),
        Value::Array(items) => items.iter().find_map(image_url),
        _ => None,
    }
}

/// Extraction Invoker: one tool process per query, no state kept between calls
#[derive(Debug, Clone)]
pub struct MetadataInvoker {
    tool: ToolCommand,
    socket_timeout: Duration,
    timeout: Duration,
}

impl MetadataInvoker {
    pub fn new(tool: ToolCommand, socket_timeout: Duration, timeout: Duration) -> Self {
        Self {
            tool,
            socket_timeout,
            timeout,
        }
    }

    pub fn from_config(config: &ExtractorConfig) -> Self {
        Self::new(
            ToolCommand::from_config(config),
            config.socket_timeout(),
            config.metadata_timeout(),
        )
    }

    /// Runs the tool in metadata mode and returns the normalized record
    pub async fn fetch(&self, url: &str) -> Result<VideoInfo> {
        info!(url, "Fetching video info");

        let socket_timeout = self.socket_timeout.as_secs().max(1).to_string();
        let mut child = self.tool.spawn([
            "--dump-json",
            "--no-warnings",
            "--no-playlist",
            "--socket-timeout",
            socket_timeout.as_str(),
            url,
        ])?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| ExtractorError::Io(std::io::Error::other("stdout not captured")))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ExtractorError::Io(std::io::Error::other("stderr not captured")))?;

        let run = async {
            let mut output = Vec::new();
            let (read_out, read_err) = tokio::join!(
                stdout.read_to_end(&mut output),
                process::read_lines(stderr, |line| trace!(line, "extractor stderr")),
            );
            read_out?;
            let diagnostics = read_err?;
            let status = child.wait().await?;
            Ok::<_, ExtractorError>((status, output, diagnostics))
        };

        let (status, output, diagnostics) = match timeout(self.timeout, run).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(url, timeout_secs = self.timeout.as_secs(), "Metadata query timed out");
                process::terminate(&mut child).await;
                return Err(ExtractorError::Timeout(self.timeout));
            }
        };

        if !status.success() {
            warn!(url, ?status, "Metadata query failed");
            return Err(ExtractorError::ExtractionFailed(process::failure_message(
                &diagnostics,
                status,
            )));
        }

        let raw = parse_metadata(&output)?;
        let info = normalize(raw, url);
        debug!(
            url,
            id = %info.id,
            video_formats = info.available_formats.video.len(),
            audio_formats = info.available_formats.audio.len(),
            "Video info normalized"
        );
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw_from(value: Value) -> RawMetadata {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_normalize_applies_defaults() {
        let info = normalize(raw_from(json!({})), "https://vimeo.com/1");

        assert_eq!(info.title, "Untitled");
        assert_eq!(info.uploader, "Unknown");
        assert_eq!(info.duration, 0);
        assert_eq!(info.duration_formatted, "0:00");
        assert_eq!(info.view_count, 0);
        assert_eq!(info.like_count, 0);
        assert_eq!((info.width, info.height), (1920, 1080));
        assert_eq!(info.thumbnail, "");
        assert_eq!(info.platform, Platform::Vimeo);
        assert!(info.available_formats.video.is_empty());
        assert_eq!(info.available_formats.audio, vec![FormatOption::unknown_audio()]);
    }

    #[test]
    fn test_normalize_tolerates_nulls_and_floats() {
        let raw = raw_from(json!({
            "id": "abc",
            "title": null,
            "duration": 212.6,
            "view_count": 1500.0,
            "channel": "Some Channel",
            "uploader": null,
            "formats": null,
            "thumbnails": null
        }));

        let info = normalize(raw, "https://youtu.be/abc");

        assert_eq!(info.id, "abc");
        assert_eq!(info.title, "Untitled");
        assert_eq!(info.duration, 212);
        assert_eq!(info.view_count, 1500);
        assert_eq!(info.uploader, "Some Channel");
    }

    #[test]
    fn test_thumbnail_prefers_direct_field() {
        let raw = raw_from(json!({
            "thumbnail": "https://img/direct.jpg",
            "thumbnails": [{"url": "https://img/big.jpg", "width": 1280, "height": 720}]
        }));
        assert_eq!(resolve_thumbnail(&raw), "https://img/direct.jpg");
    }

    #[test]
    fn test_thumbnail_picks_largest_from_list() {
        let raw = raw_from(json!({
            "thumbnails": [
                {"url": "https://img/small.jpg", "width": 120, "height": 90},
                {"url": "https://img/big.jpg", "width": 1280, "height": 720},
                {"url": "https://img/mid.jpg", "width": 640, "height": 480},
                {"width": 4000, "height": 4000}
            ]
        }));
        assert_eq!(resolve_thumbnail(&raw), "https://img/big.jpg");
    }

    #[test]
    fn test_thumbnail_platform_then_generic_fields() {
        let raw = raw_from(json!({ "display_url": "https://ig/display.jpg" }));
        assert_eq!(resolve_thumbnail(&raw), "https://ig/display.jpg");

        let raw = raw_from(json!({ "images": [{"url": "https://gen/1.jpg"}] }));
        assert_eq!(resolve_thumbnail(&raw), "https://gen/1.jpg");

        let raw = raw_from(json!({ "image": "https://gen/single.jpg" }));
        assert_eq!(resolve_thumbnail(&raw), "https://gen/single.jpg");
    }

    #[test]
    fn test_parse_metadata_errors() {
        assert!(matches!(
            parse_metadata(b""),
            Err(ExtractorError::MalformedMetadata(_))
        ));
        assert!(matches!(
            parse_metadata(b"<html>blocked</html>"),
            Err(ExtractorError::MalformedMetadata(_))
        ));
        assert!(matches!(
            parse_metadata(b"\"just a string\""),
            Err(ExtractorError::MalformedMetadata(_))
        ));
    }

    #[test]
    fn test_parse_metadata_takes_first_of_many() {
        let raw = parse_metadata(b"{\"id\": \"one\"}\n{\"id\": \"two\"}\n").unwrap();
        assert_eq!(raw.id.as_deref(), Some("one"));
    }

    #[cfg(unix)]
    mod with_fake_tool {
        use super::*;
        use std::os::unix::fs::PermissionsExt;
        use std::path::Path;
        use std::time::Instant;

        fn fake_tool(dir: &Path, body: &str) -> ToolCommand {
            let path = dir.join("fake-tool.sh");
            std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            ToolCommand::new(path.to_string_lossy(), Vec::new())
        }

        fn invoker(tool: ToolCommand, limit: Duration) -> MetadataInvoker {
            MetadataInvoker::new(tool, Duration::from_secs(5), limit)
        }

        #[tokio::test]
        async fn test_fetch_normalizes_tool_output() {
            let scratch = tempfile::tempdir().unwrap();
            let body = r#"
case " $* " in *" --dump-json "*) ;; *) exit 2 ;; esac
cat <<'JSON'
{"id": "abc", "title": "Clip", "duration": 75, "uploader": "Someone",
 "formats": [{"format_id": "22", "ext": "mp4", "vcodec": "avc1", "acodec": "mp4a", "height": 720, "filesize": 1000}]}
JSON
"#;
            let tool = fake_tool(scratch.path(), body);

            let info = invoker(tool, Duration::from_secs(5))
                .fetch("https://youtu.be/abc")
                .await
                .unwrap();

            assert_eq!(info.id, "abc");
            assert_eq!(info.title, "Clip");
            assert_eq!(info.duration_formatted, "1:15");
            assert_eq!(info.platform, Platform::Youtube);
            assert_eq!(info.original_url, "https://youtu.be/abc");
            assert_eq!(info.available_formats.video.len(), 1);
            assert_eq!(info.available_formats.video[0].quality, "720p");
        }

        #[tokio::test]
        async fn test_fetch_reports_tool_error_line() {
            let scratch = tempfile::tempdir().unwrap();
            let tool = fake_tool(
                scratch.path(),
                "echo 'WARNING: retrying' >&2\necho 'ERROR: [youtube] abc: Private video' >&2\nexit 1",
            );

            let err = invoker(tool, Duration::from_secs(5))
                .fetch("https://youtu.be/abc")
                .await
                .unwrap_err();

            match err {
                ExtractorError::ExtractionFailed(message) => {
                    assert!(message.contains("Private video"), "{message}")
                }
                other => panic!("unexpected error: {other:?}"),
            }
        }

        #[tokio::test]
        async fn test_fetch_rejects_non_json_output() {
            let scratch = tempfile::tempdir().unwrap();
            let tool = fake_tool(scratch.path(), "echo '<html>captcha</html>'");

            let err = invoker(tool, Duration::from_secs(5))
                .fetch("https://youtu.be/abc")
                .await
                .unwrap_err();

            assert!(matches!(err, ExtractorError::MalformedMetadata(_)));
        }

        #[tokio::test]
        async fn test_fetch_times_out() {
            let scratch = tempfile::tempdir().unwrap();
            let tool = fake_tool(scratch.path(), "sleep 5\necho '{}'");

            let limit = Duration::from_millis(500);
            let started = Instant::now();
            let err = invoker(tool, limit)
                .fetch("https://youtu.be/abc")
                .await
                .unwrap_err();
            let elapsed = started.elapsed();

            assert!(matches!(err, ExtractorError::Timeout(_)));
            assert!(elapsed >= limit);
            assert!(elapsed < limit + Duration::from_secs(2));
        }
    }
}
