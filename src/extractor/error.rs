use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failures of the external extraction tool, from launch to post-conditions
#[derive(Debug, Error)]
pub enum ExtractorError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("failed to launch {program}: {source}")]
    SpawnFailure {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("extraction tool did not finish within {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("failed to fetch video info: {0}")]
    ExtractionFailed(String),

    #[error("download failed: {0}")]
    DownloadFailed(String),

    #[error("failed to parse video info: {0}")]
    MalformedMetadata(String),

    #[error("no files were downloaded")]
    NoOutputProduced,

    #[error("downloaded file does not exist: {}", .0.display())]
    OutputMissing(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExtractorError {
    /// Stable machine-readable code, also used in job failure reasons
    pub fn code(&self) -> &'static str {
        match self {
            ExtractorError::InvalidInput(_) => "INVALID_INPUT",
            ExtractorError::SpawnFailure { .. } => "SPAWN_FAILURE",
            ExtractorError::Timeout(_) => "TIMEOUT",
            ExtractorError::ExtractionFailed(_) => "EXTRACTION_FAILED",
            ExtractorError::DownloadFailed(_) => "DOWNLOAD_FAILED",
            ExtractorError::MalformedMetadata(_) => "MALFORMED_METADATA",
            ExtractorError::NoOutputProduced => "NO_OUTPUT_PRODUCED",
            ExtractorError::OutputMissing(_) => "OUTPUT_MISSING",
            ExtractorError::Io(_) => "IO_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, ExtractorError>;
