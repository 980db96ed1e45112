use thiserror::Error;
use url::Url;

use super::models::DownloadBody;
use crate::extractor::{DownloadRequest, ExtractorError};
use crate::platform::{UrlError, validate_url};

const MAX_QUALITY_LEN: usize = 32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequestValidationError {
    #[error("{0}")]
    Url(#[from] UrlError),
    #[error("Missing required parameters: {0}")]
    MissingParameters(String),
    #[error("quality must be at most {MAX_QUALITY_LEN} letters, digits, '.', '-' or '_'")]
    InvalidQuality,
    #[error("{0}")]
    InvalidFormat(String),
}

pub fn require_url(url: Option<&str>) -> Result<Url, RequestValidationError> {
    Ok(validate_url(url.unwrap_or_default())?)
}

/// Checks a download request; all of url, type, quality and format are required
pub fn validate_download(body: &DownloadBody) -> Result<DownloadRequest, RequestValidationError> {
    let missing: Vec<&str> = [
        ("url", body.url.as_deref().is_none_or(|v| v.trim().is_empty())),
        ("type", body.kind.is_none()),
        ("quality", body.quality.as_deref().is_none_or(|v| v.trim().is_empty())),
        ("format", body.format.as_deref().is_none_or(|v| v.trim().is_empty())),
    ]
    .into_iter()
    .filter_map(|(name, absent)| absent.then_some(name))
    .collect();

    if !missing.is_empty() {
        return Err(RequestValidationError::MissingParameters(missing.join(", ")));
    }

    let url = require_url(body.url.as_deref())?;

    let quality = body.quality.as_deref().unwrap_or_default().trim();
    if quality.len() > MAX_QUALITY_LEN
        || !quality
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
    {
        return Err(RequestValidationError::InvalidQuality);
    }

    DownloadRequest::new(
        url.as_str(),
        body.kind.unwrap_or_default(),
        quality,
        body.format.as_deref(),
    )
    .map_err(|e| match e {
        ExtractorError::InvalidInput(message) => RequestValidationError::InvalidFormat(message),
        other => RequestValidationError::InvalidFormat(other.to_string()),
    })
}
