//! Source URL validation and platform detection

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UrlError {
    #[error("URL is required")]
    Missing,
    #[error("Invalid URL format")]
    Malformed,
    #[error("only http and https URLs are supported")]
    UnsupportedScheme,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Youtube,
    Instagram,
    Tiktok,
    Facebook,
    Twitter,
    Vimeo,
    Dailymotion,
    Unknown,
}

impl Platform {
    /// Platforms advertised to clients, in display order
    pub const SUPPORTED: [Platform; 7] = [
        Platform::Youtube,
        Platform::Instagram,
        Platform::Tiktok,
        Platform::Facebook,
        Platform::Twitter,
        Platform::Vimeo,
        Platform::Dailymotion,
    ];

    /// Substring match on the lowercased URL
    pub fn detect(url: &str) -> Self {
        let url = url.to_lowercase();

        if url.contains("youtube.com") || url.contains("youtu.be") {
            Platform::Youtube
        } else if url.contains("instagram.com") {
            Platform::Instagram
        } else if url.contains("tiktok.com") {
            Platform::Tiktok
        } else if url.contains("facebook.com") {
            Platform::Facebook
        } else if url.contains("twitter.com") || url.contains("x.com") {
            Platform::Twitter
        } else if url.contains("vimeo.com") {
            Platform::Vimeo
        } else if url.contains("dailymotion.com") {
            Platform::Dailymotion
        } else {
            Platform::Unknown
        }
    }

    pub fn id(&self) -> &'static str {
        match self {
            Platform::Youtube => "youtube",
            Platform::Instagram => "instagram",
            Platform::Tiktok => "tiktok",
            Platform::Facebook => "facebook",
            Platform::Twitter => "twitter",
            Platform::Vimeo => "vimeo",
            Platform::Dailymotion => "dailymotion",
            Platform::Unknown => "unknown",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Platform::Youtube => "YouTube",
            Platform::Instagram => "Instagram",
            Platform::Tiktok => "TikTok",
            Platform::Facebook => "Facebook",
            Platform::Twitter => "Twitter/X",
            Platform::Vimeo => "Vimeo",
            Platform::Dailymotion => "Dailymotion",
            Platform::Unknown => "Unknown",
        }
    }
}

/// Parses a client-supplied source URL, accepting only absolute http(s) URLs with a host
pub fn validate_url(raw: &str) -> Result<Url, UrlError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(UrlError::Missing);
    }

    let url = Url::parse(raw).map_err(|_| UrlError::Malformed)?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(UrlError::UnsupportedScheme);
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(UrlError::Malformed);
    }

    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_platforms() {
        assert_eq!(Platform::detect("https://www.youtube.com/watch?v=abc"), Platform::Youtube);
        assert_eq!(Platform::detect("https://youtu.be/abc"), Platform::Youtube);
        assert_eq!(Platform::detect("https://www.Instagram.com/p/xyz/"), Platform::Instagram);
        assert_eq!(Platform::detect("https://x.com/user/status/1"), Platform::Twitter);
        assert_eq!(Platform::detect("https://vimeo.com/123"), Platform::Vimeo);
        assert_eq!(Platform::detect("https://example.org/video.mp4"), Platform::Unknown);
    }

    #[test]
    fn test_validate_url() {
        assert!(validate_url("https://www.youtube.com/watch?v=abc").is_ok());
        assert_eq!(validate_url("   "), Err(UrlError::Missing));
        assert_eq!(validate_url("not a url"), Err(UrlError::Malformed));
        assert_eq!(
            validate_url("ftp://example.com/file"),
            Err(UrlError::UnsupportedScheme)
        );
    }
}
