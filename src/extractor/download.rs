//! Download Invoker: drives the tool in download mode into a directory or a byte sink

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

use super::error::{ExtractorError, Result};
use super::formats::DEFAULT_AUDIO_FORMAT;
use super::process::{self, ToolCommand};
use super::progress::{OutputPatterns, ProgressTracker};
use crate::config::ExtractorConfig;

/// Containers that imply an audio-only download regardless of the requested kind
pub const AUDIO_FORMATS: [&str; 7] = ["mp3", "m4a", "wav", "opus", "aac", "flac", "ogg"];
pub const DEFAULT_VIDEO_FORMAT: &str = "mp4";

const AUDIO_BITRATES_KBPS: [u32; 7] = [64, 96, 128, 160, 192, 256, 320];
const DEFAULT_AUDIO_BITRATE: &str = "192K";
const STREAM_CHUNK_BYTES: usize = 64 * 1024;
const MAX_FORMAT_LEN: usize = 8;

/// Quality labels that name no particular encoding
const GENERIC_QUALITIES: [&str; 4] = ["best", "highest", "auto", "unknown"];

/// Output template used in directory mode; the tool substitutes title and extension
const OUTPUT_TEMPLATE: &str = "%(title)s.%(ext)s";

/// Bytes flowing out of stream mode; an `Err` item aborts the receiving transfer
pub type ByteSink = mpsc::Sender<std::io::Result<Bytes>>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    #[default]
    Video,
    Audio,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
        }
    }
}

/// Receives in-flight progress percentages (0..=99) during a download
pub trait ProgressSink: Send + Sync {
    fn report(&self, percent: u8);
}

impl ProgressSink for mpsc::UnboundedSender<u8> {
    fn report(&self, percent: u8) {
        let _ = self.send(percent);
    }
}

/// Resolution constraint carried by a quality label such as `1080p` or `640w`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dimension {
    Height(u32),
    Width(u32),
}

impl Dimension {
    fn parse(quality: &str) -> Option<Self> {
        let quality = quality.trim().to_ascii_lowercase();
        let (digits, constructor): (&str, fn(u32) -> Dimension) =
            if let Some(d) = quality.strip_suffix('p') {
                (d, Dimension::Height)
            } else if let Some(d) = quality.strip_suffix('w') {
                (d, Dimension::Width)
            } else {
                return None;
            };

        digits.parse().ok().filter(|v| *v > 0).map(constructor)
    }

    fn field(&self) -> (&'static str, u32) {
        match *self {
            Dimension::Height(v) => ("height", v),
            Dimension::Width(v) => ("width", v),
        }
    }
}

/// Where the tool writes the media
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination<'a> {
    /// Output path template inside the job directory
    Template(&'a str),
    Stdout,
}

/// Validated inputs of one download
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub url: String,
    pub media_kind: MediaKind,
    pub quality: String,
    pub format: String,
}

impl DownloadRequest {
    /// Normalizes the container name and rejects anything that is not a short
    /// alphanumeric extension, since it ends up in filenames and tool arguments.
    pub fn new(
        url: impl Into<String>,
        media_kind: MediaKind,
        quality: impl Into<String>,
        format: Option<&str>,
    ) -> Result<Self> {
        let format = match format.map(str::trim).filter(|f| !f.is_empty()) {
            Some(f) => f.to_ascii_lowercase(),
            None if media_kind == MediaKind::Audio => DEFAULT_AUDIO_FORMAT.to_string(),
            None => DEFAULT_VIDEO_FORMAT.to_string(),
        };

        if format.len() > MAX_FORMAT_LEN || !format.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(ExtractorError::InvalidInput(format!(
                "unsupported format '{format}'"
            )));
        }

        Ok(Self {
            url: url.into(),
            media_kind,
            quality: quality.into().trim().to_string(),
            format,
        })
    }

    pub fn is_audio(&self) -> bool {
        self.media_kind == MediaKind::Audio || AUDIO_FORMATS.contains(&self.format.as_str())
    }

    /// Filename used when the tool does not reveal one
    pub fn fallback_filename(&self) -> String {
        format!("download.{}", self.format)
    }

    /// Format-selection expression. Video requests fall back from an exact
    /// resolution match, through the best at-or-below it, to unconstrained best.
    pub fn format_selector(&self) -> String {
        if self.is_audio() {
            return "bestaudio/best".to_string();
        }

        let compatible_audio = match self.format.as_str() {
            "mp4" => Some(("mp4", "m4a")),
            "webm" => Some(("webm", "webm")),
            _ => None,
        };

        let mut chain = Vec::new();
        if let Some(dimension) = Dimension::parse(&self.quality) {
            let (field, value) = dimension.field();
            if let Some((video_ext, audio_ext)) = compatible_audio {
                chain.push(format!(
                    "bestvideo[{field}={value}][ext={video_ext}]+bestaudio[ext={audio_ext}]"
                ));
            }
            chain.push(format!("bestvideo[{field}={value}]+bestaudio"));
            if let Some((video_ext, audio_ext)) = compatible_audio {
                chain.push(format!(
                    "bestvideo[{field}<={value}][ext={video_ext}]+bestaudio[ext={audio_ext}]"
                ));
            }
            chain.push(format!("bestvideo[{field}<={value}]+bestaudio"));
            chain.push(format!("best[{field}<={value}]"));
        } else {
            // an offered format identifier such as `hls-1080` or `137`
            if !GENERIC_QUALITIES.contains(&self.quality.to_ascii_lowercase().as_str())
                && !self.quality.is_empty()
            {
                chain.push(format!("{}+bestaudio", self.quality));
                chain.push(self.quality.clone());
            }
            if let Some((video_ext, audio_ext)) = compatible_audio {
                chain.push(format!("bestvideo[ext={video_ext}]+bestaudio[ext={audio_ext}]"));
            }
        }
        chain.push("bestvideo+bestaudio".to_string());
        chain.push("best".to_string());

        chain.join("/")
    }

    /// Re-encode bitrate for audio downloads: the first number in the quality
    /// label rounded down to a supported rate, `192K` when there is none.
    pub fn audio_bitrate(&self) -> String {
        let requested: Option<u32> = self
            .quality
            .split(|c: char| !c.is_ascii_digit())
            .find(|part| !part.is_empty())
            .and_then(|digits| digits.parse().ok());

        match requested {
            Some(kbps) => {
                let rate = AUDIO_BITRATES_KBPS
                    .iter()
                    .rev()
                    .find(|rate| **rate <= kbps)
                    .unwrap_or(&AUDIO_BITRATES_KBPS[0]);
                format!("{rate}K")
            }
            None => DEFAULT_AUDIO_BITRATE.to_string(),
        }
    }

    /// Full argument list for one invocation writing to `destination`.
    ///
    /// Audio is re-encoded only when writing to disk: the tool cannot run its
    /// post-processors on standard output, so streamed audio is the source
    /// track, in the requested container when the source offers one.
    pub fn tool_args(&self, destination: Destination<'_>, socket_timeout: Duration) -> Vec<String> {
        let (output, selector) = match destination {
            Destination::Template(template) => (template, self.format_selector()),
            Destination::Stdout if self.is_audio() => {
                ("-", format!("bestaudio[ext={}]/bestaudio/best", self.format))
            }
            Destination::Stdout => ("-", self.format_selector()),
        };

        let mut args: Vec<String> = vec![
            "--newline".into(),
            "--no-warnings".into(),
            "--no-playlist".into(),
            "--socket-timeout".into(),
            socket_timeout.as_secs().max(1).to_string(),
            "-f".into(),
            selector,
            "-o".into(),
            output.into(),
        ];

        match destination {
            Destination::Template(_) if self.is_audio() => args.extend([
                "--extract-audio".into(),
                "--audio-format".into(),
                self.format.clone(),
                "--audio-quality".into(),
                self.audio_bitrate(),
            ]),
            Destination::Stdout if self.is_audio() => {}
            _ => args.extend(["--merge-output-format".into(), self.format.clone()]),
        }

        args.push("--".into());
        args.push(self.url.clone());
        args
    }
}

#[derive(Debug, Clone)]
pub struct DownloadInvoker {
    tool: ToolCommand,
    patterns: OutputPatterns,
    socket_timeout: Duration,
    timeout: Duration,
}

impl DownloadInvoker {
    pub fn new(
        tool: ToolCommand,
        patterns: OutputPatterns,
        socket_timeout: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            tool,
            patterns,
            socket_timeout,
            timeout,
        }
    }

    pub fn from_config(config: &ExtractorConfig) -> Result<Self> {
        Ok(Self::new(
            ToolCommand::from_config(config),
            OutputPatterns::from_config(config)?,
            config.socket_timeout(),
            config.download_timeout(),
        ))
    }

    fn forward_progress(&self, line: &str, tracker: &ProgressTracker, sink: Option<&dyn ProgressSink>) {
        if let Some(percent) = self.patterns.progress(line).and_then(|p| tracker.advance(p)) {
            trace!(percent, "download progress");
            if let Some(sink) = sink {
                sink.report(percent);
            }
        }
    }

    /// Directory mode: the tool writes into `dir` (created if needed) and the
    /// newest complete file there is returned. On timeout the directory and
    /// anything partially written into it are removed.
    pub async fn download_to_dir(
        &self,
        request: &DownloadRequest,
        dir: &Path,
        progress: Option<&dyn ProgressSink>,
    ) -> Result<PathBuf> {
        info!(url = %request.url, dir = %dir.display(), "Starting download");

        tokio::fs::create_dir_all(dir).await?;
        let template = dir.join(OUTPUT_TEMPLATE);
        let mut child = self
            .tool
            .spawn(request.tool_args(
                Destination::Template(&template.to_string_lossy()),
                self.socket_timeout,
            ))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ExtractorError::Io(std::io::Error::other("stdout not captured")))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ExtractorError::Io(std::io::Error::other("stderr not captured")))?;

        let tracker = ProgressTracker::default();
        let on_line = |line: &str| {
            trace!(line, "extractor output");
            self.forward_progress(line, &tracker, progress);
        };

        let run = async {
            let (_, diagnostics) = tokio::try_join!(
                process::read_lines(stdout, &on_line),
                process::read_lines(stderr, &on_line),
            )?;
            let status = child.wait().await?;
            Ok::<_, ExtractorError>((status, diagnostics))
        };

        let (status, diagnostics) = match timeout(self.timeout, run).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(url = %request.url, timeout_secs = self.timeout.as_secs(), "Download timed out");
                process::terminate(&mut child).await;
                remove_partial_output(dir).await;
                return Err(ExtractorError::Timeout(self.timeout));
            }
        };

        if !status.success() {
            warn!(url = %request.url, ?status, "Download failed");
            return Err(ExtractorError::DownloadFailed(process::failure_message(
                &diagnostics,
                status,
            )));
        }

        let path = newest_file(dir, &request.format).await?;
        info!(url = %request.url, path = %path.display(), "Download finished");
        Ok(path)
    }

    /// Stream mode: the tool's stdout is forwarded chunk by chunk into `sink`.
    ///
    /// Returns the suggested filename (recovered from diagnostics, extension
    /// forced to the requested format). On failure an error item is pushed
    /// into the sink so the receiver never sees a clean end of stream.
    pub async fn download_to_stream(
        &self,
        request: &DownloadRequest,
        sink: ByteSink,
        progress: Option<&dyn ProgressSink>,
    ) -> Result<String> {
        info!(url = %request.url, "Starting streamed download");

        let outcome = self.stream_inner(request, &sink, progress).await;
        match outcome {
            Ok(filename) => {
                if let Some(progress) = progress {
                    progress.report(100);
                }
                Ok(filename)
            }
            Err(e) => {
                let _ = sink.send(Err(std::io::Error::other(e.to_string()))).await;
                Err(e)
            }
        }
    }

    async fn stream_inner(
        &self,
        request: &DownloadRequest,
        sink: &ByteSink,
        progress: Option<&dyn ProgressSink>,
    ) -> Result<String> {
        let mut child = self.tool.spawn(request.tool_args(Destination::Stdout, self.socket_timeout))?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| ExtractorError::Io(std::io::Error::other("stdout not captured")))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ExtractorError::Io(std::io::Error::other("stderr not captured")))?;

        let tracker = ProgressTracker::default();
        let mut recovered: Option<String> = None;

        let pump = async {
            let mut buf = vec![0u8; STREAM_CHUNK_BYTES];
            let mut total = 0u64;
            loop {
                let n = stdout.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                sink.send(Ok(Bytes::copy_from_slice(&buf[..n])))
                    .await
                    .map_err(|_| ExtractorError::DownloadFailed("receiver went away".to_string()))?;
                total += n as u64;
            }
            Ok::<_, ExtractorError>(total)
        };

        let diagnostics = async {
            process::read_lines(stderr, |line| {
                trace!(line, "extractor stderr");
                self.forward_progress(line, &tracker, progress);
                if let Some(name) = self.patterns.filename(line) {
                    recovered = Some(name);
                }
            })
            .await
            .map_err(ExtractorError::from)
        };

        let run = async {
            let (bytes, diagnostics) = tokio::try_join!(pump, diagnostics)?;
            let status = child.wait().await?;
            Ok::<_, ExtractorError>((status, bytes, diagnostics))
        };

        let (status, bytes, diagnostics) = match timeout(self.timeout, run).await {
            Ok(Ok(done)) => done,
            Ok(Err(e)) => {
                process::terminate(&mut child).await;
                return Err(e);
            }
            Err(_) => {
                warn!(url = %request.url, timeout_secs = self.timeout.as_secs(), "Streamed download timed out");
                process::terminate(&mut child).await;
                return Err(ExtractorError::Timeout(self.timeout));
            }
        };

        if !status.success() {
            warn!(url = %request.url, ?status, "Streamed download failed");
            return Err(ExtractorError::DownloadFailed(process::failure_message(
                &diagnostics,
                status,
            )));
        }

        let filename = stream_filename(recovered.as_deref(), request);
        debug!(url = %request.url, bytes, filename = %filename, "Streamed download finished");
        Ok(filename)
    }
}

/// Bare filename with its extension replaced by the requested format
fn stream_filename(recovered: Option<&str>, request: &DownloadRequest) -> String {
    recovered
        .and_then(|name| Path::new(name).file_name())
        .map(|name| Path::new(name).with_extension(&request.format))
        .map(|path| path.to_string_lossy().into_owned())
        .filter(|name| !name.starts_with('.'))
        .unwrap_or_else(|| request.fallback_filename())
}

fn is_partial(path: &Path) -> bool {
    let name = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
    name.ends_with(".part")
        || name.ends_with(".ytdl")
        || name.ends_with(".temp")
        || name.contains(".part-Frag")
}

/// Most recently modified finished file in `dir`, preferring files whose
/// extension matches the requested format (post-processing may leave the
/// pre-conversion original behind).
async fn newest_file(dir: &Path, format: &str) -> Result<PathBuf> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut newest: Option<((bool, SystemTime), PathBuf)> = None;

    while let Some(entry) = entries.next_entry().await? {
        let metadata = entry.metadata().await?;
        let path = entry.path();
        if !metadata.is_file() || is_partial(&path) {
            continue;
        }

        let matches_format = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case(format));
        let rank = (
            matches_format,
            metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
        );
        if newest.as_ref().is_none_or(|(best, _)| rank >= *best) {
            newest = Some((rank, path));
        }
    }

    let (_, path) = newest.ok_or(ExtractorError::NoOutputProduced)?;
    if !tokio::fs::try_exists(&path).await? {
        return Err(ExtractorError::OutputMissing(path));
    }
    Ok(path)
}

async fn remove_partial_output(dir: &Path) {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => debug!(dir = %dir.display(), "Removed partial download"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(dir = %dir.display(), error = %e, "Failed to remove partial download"),
    }
}
