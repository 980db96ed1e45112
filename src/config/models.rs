use crate::humanize::ByteSize;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub extractor: ExtractorConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub thumbnail: ThumbnailConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    /// Upper bound for JSON request bodies
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: ByteSize,
    /// Origins allowed by the CORS layer
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            max_payload_bytes: default_max_payload_bytes(),
            cors_origins: default_cors_origins(),
        }
    }
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 5000))
}

fn default_max_payload_bytes() -> ByteSize {
    ByteSize(1024 * 1024) // 1 MB
}

fn default_cors_origins() -> Vec<String> {
    [
        "http://localhost:3000",
        "http://localhost:3001",
        "http://localhost:3002",
        "http://127.0.0.1:3000",
        "http://127.0.0.1:3001",
        "http://127.0.0.1:3002",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// External extraction tool settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExtractorConfig {
    /// Executable to launch (`yt-dlp`, or `python` together with `base_args = ["-m", "yt_dlp"]`)
    #[serde(default = "default_program")]
    pub program: String,
    /// Arguments placed before every invocation's own flags
    #[serde(default)]
    pub base_args: Vec<String>,
    #[serde(default = "default_socket_timeout_secs")]
    pub socket_timeout_secs: u64,
    #[serde(default = "default_metadata_timeout_secs")]
    pub metadata_timeout_secs: u64,
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,
    /// Regex with one capture group holding the percentage (e.g. `42.7`)
    #[serde(default = "default_progress_pattern")]
    pub progress_pattern: String,
    /// Regex with one capture group holding a quoted output filename
    #[serde(default = "default_filename_pattern")]
    pub filename_pattern: String,
    /// 0 disables the bound
    #[serde(default)]
    pub max_concurrent_downloads: usize,
}

impl ExtractorConfig {
    pub fn socket_timeout(&self) -> Duration {
        Duration::from_secs(self.socket_timeout_secs)
    }

    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_secs(self.metadata_timeout_secs)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            base_args: Vec::new(),
            socket_timeout_secs: default_socket_timeout_secs(),
            metadata_timeout_secs: default_metadata_timeout_secs(),
            download_timeout_secs: default_download_timeout_secs(),
            progress_pattern: default_progress_pattern(),
            filename_pattern: default_filename_pattern(),
            max_concurrent_downloads: 0,
        }
    }
}

fn default_program() -> String {
    "yt-dlp".to_string()
}

fn default_socket_timeout_secs() -> u64 {
    30
}

fn default_metadata_timeout_secs() -> u64 {
    60
}

fn default_download_timeout_secs() -> u64 {
    600
}

pub(crate) fn default_progress_pattern() -> String {
    r"\[download\]\s+(\d{1,3}(?:\.\d+)?)%".to_string()
}

pub(crate) fn default_filename_pattern() -> String {
    r#""([^"\r\n]+\.[A-Za-z0-9]{2,5})""#.to_string()
}

/// Scratch storage for in-flight and completed downloads
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            temp_dir: default_temp_dir(),
        }
    }
}

fn default_temp_dir() -> PathBuf {
    PathBuf::from("./temp")
}

/// Retention of finished jobs and their files
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetentionConfig {
    #[serde(default = "default_file_expiry_secs")]
    pub file_expiry_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl RetentionConfig {
    pub fn file_expiry(&self) -> Duration {
        Duration::from_secs(self.file_expiry_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            file_expiry_secs: default_file_expiry_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

fn default_file_expiry_secs() -> u64 {
    3600
}

fn default_sweep_interval_secs() -> u64 {
    600
}

/// Sliding-window request limit per client address
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
    #[serde(default = "default_max_requests")]
    pub max_requests: usize,
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_ms: default_window_ms(),
            max_requests: default_max_requests(),
        }
    }
}

fn default_window_ms() -> u64 {
    60_000
}

fn default_max_requests() -> usize {
    100
}

/// Thumbnail proxy client
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ThumbnailConfig {
    #[serde(default = "default_thumbnail_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_referer")]
    pub referer: String,
}

impl ThumbnailConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_thumbnail_timeout_secs(),
            user_agent: default_user_agent(),
            referer: default_referer(),
        }
    }
}

fn default_thumbnail_timeout_secs() -> u64 {
    5
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36".to_string()
}

fn default_referer() -> String {
    "https://www.instagram.com/".to_string()
}
