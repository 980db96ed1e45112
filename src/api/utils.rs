//! API utility functions
//!
//! Pure, stateless helpers for HTTP request processing, kept apart from the
//! handlers so they can be unit tested.

use axum::http::{HeaderMap, HeaderValue, header};

use crate::api::error::ApiError;

/// Requires a `Content-Type` of `application/json`, parameters allowed
///
/// Rejects `application/jsonp`, `application/json-patch+json`, `text/json`
/// and malformed media types.
pub fn require_json(headers: &HeaderMap) -> Result<mime::Mime, ApiError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::InvalidPayload("missing Content-Type header".into()))?;

    let media_type: mime::Mime = content_type
        .parse()
        .map_err(|_| ApiError::InvalidPayload(format!("invalid Content-Type: {content_type}")))?;

    if media_type.type_() != mime::APPLICATION || media_type.subtype() != mime::JSON {
        return Err(ApiError::InvalidPayload(format!(
            "Content-Type must be application/json, got: {}/{}",
            media_type.type_(),
            media_type.subtype()
        )));
    }

    Ok(media_type)
}

/// `attachment` disposition with an ASCII fallback name and the UTF-8 original
pub fn content_disposition(filename: &str) -> HeaderValue {
    let fallback: String = filename
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii() && !c.is_ascii_control() => c,
            _ => '_',
        })
        .collect();

    let encoded = urlencoding::encode(filename);

    let value = format!("attachment; filename=\"{fallback}\"; filename*=UTF-8''{encoded}");
    HeaderValue::from_str(&value).unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}

/// Best-effort content type from a file extension
pub fn content_type_for(filename: &str) -> &'static str {
    let ext = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "mp4" | "m4v" => "video/mp4",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "mov" => "video/quicktime",
        "mp3" => "audio/mpeg",
        "m4a" | "aac" => "audio/mp4",
        "opus" | "ogg" => "audio/ogg",
        "wav" => "audio/wav",
        "flac" => "audio/flac",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(content_type: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_str(content_type).unwrap());
        headers
    }

    #[test]
    fn test_require_json_valid() {
        assert!(require_json(&headers("application/json")).is_ok());
        assert!(require_json(&headers("application/json; charset=utf-8")).is_ok());
    }

    #[test]
    fn test_require_json_invalid() {
        assert!(require_json(&HeaderMap::new()).is_err());
        assert!(require_json(&headers("application/jsonp")).is_err());
        assert!(require_json(&headers("application/json-patch+json")).is_err());
        assert!(require_json(&headers("text/json")).is_err());
        assert!(require_json(&headers("invalid")).is_err());
    }

    #[test]
    fn test_content_disposition_escapes_names() {
        let value = content_disposition("My \"Clip\" é.mp4");
        assert_eq!(
            value.to_str().unwrap(),
            "attachment; filename=\"My _Clip_ _.mp4\"; filename*=UTF-8''My%20%22Clip%22%20%C3%A9.mp4"
        );
    }

    #[test]
    fn test_content_type_for() {
        assert_eq!(content_type_for("song.MP3"), "audio/mpeg");
        assert_eq!(content_type_for("clip.mp4"), "video/mp4");
        assert_eq!(content_type_for("noext"), "application/octet-stream");
    }
}
