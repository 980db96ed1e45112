//! Thumbnail proxy client
//!
//! Some platforms refuse hot-linked thumbnails, so the image is fetched
//! server-side with browser-like headers and relayed to the client.

use bytes::Bytes;
use reqwest::{Client, header};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::ThumbnailConfig;

#[derive(Debug, Error)]
pub enum ThumbnailError {
    #[error("Thumbnail request failed: {0}")]
    RequestFailed(String),

    #[error("Thumbnail fetch timeout")]
    Timeout,

    #[error("Invalid thumbnail URL: {0}")]
    InvalidUrl(String),
}

pub type Result<T> = std::result::Result<T, ThumbnailError>;

const DEFAULT_CONTENT_TYPE: &str = "image/jpeg";

/// Fetched image plus the content type to relay
#[derive(Debug)]
pub struct Thumbnail {
    pub content_type: String,
    pub body: Bytes,
}

pub struct ThumbnailClient {
    client: Client,
    referer: String,
}

impl ThumbnailClient {
    pub fn new(config: &ThumbnailConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.timeout())
            .timeout(config.timeout())
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| ThumbnailError::RequestFailed(e.to_string()))?;

        Ok(Self {
            client,
            referer: config.referer.clone(),
        })
    }

    pub async fn fetch(&self, url: &str) -> Result<Thumbnail> {
        let url = crate::platform::validate_url(url)
            .map_err(|e| ThumbnailError::InvalidUrl(e.to_string()))?;
        debug!(url = %url, "Fetching thumbnail");

        let response = self
            .client
            .get(url.as_str())
            .header(header::REFERER, &self.referer)
            .header(header::ACCEPT, "image/*")
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ThumbnailError::Timeout
                } else {
                    ThumbnailError::RequestFailed(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!(url = %url, status = status.as_u16(), "Thumbnail upstream refused");
            return Err(ThumbnailError::RequestFailed(format!(
                "HTTP {}: {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown")
            )));
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or(DEFAULT_CONTENT_TYPE)
            .to_string();

        let body = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                ThumbnailError::Timeout
            } else {
                ThumbnailError::RequestFailed(format!("Failed to read body: {e}"))
            }
        })?;

        debug!(url = %url, size = body.len(), content_type = %content_type, "Thumbnail fetched");
        Ok(Thumbnail { content_type, body })
    }
}
