use super::models::Config;
use regex::Regex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("extractor.program must not be empty")]
    EmptyProgram,

    #[error("Timeout must be positive: {field}")]
    ZeroTimeout { field: &'static str },

    #[error("Pattern '{field}' does not compile: {reason}")]
    InvalidPattern { field: &'static str, reason: String },

    #[error("Pattern '{field}' needs exactly one capture group")]
    MissingCaptureGroup { field: &'static str },

    #[error("Retention interval must be positive: {field}")]
    InvalidRetention { field: &'static str },

    #[error("Rate limit must allow at least one request per non-empty window")]
    InvalidRateLimit,

    #[error("max_payload_bytes must be positive")]
    InvalidPayloadLimit,
}

/// Validate the entire configuration
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    validate_extractor(config)?;
    validate_retention(config)?;
    validate_server(config)?;
    Ok(())
}

fn validate_extractor(config: &Config) -> Result<(), ValidationError> {
    let extractor = &config.extractor;

    if extractor.program.trim().is_empty() {
        return Err(ValidationError::EmptyProgram);
    }

    let timeouts = [
        ("extractor.socket_timeout_secs", extractor.socket_timeout_secs),
        ("extractor.metadata_timeout_secs", extractor.metadata_timeout_secs),
        ("extractor.download_timeout_secs", extractor.download_timeout_secs),
        ("thumbnail.timeout_secs", config.thumbnail.timeout_secs),
    ];
    for (field, value) in timeouts {
        if value == 0 {
            return Err(ValidationError::ZeroTimeout { field });
        }
    }

    validate_pattern("extractor.progress_pattern", &extractor.progress_pattern)?;
    validate_pattern("extractor.filename_pattern", &extractor.filename_pattern)?;

    Ok(())
}

fn validate_pattern(field: &'static str, pattern: &str) -> Result<(), ValidationError> {
    let regex = Regex::new(pattern).map_err(|e| ValidationError::InvalidPattern {
        field,
        reason: e.to_string(),
    })?;

    // captures_len counts the implicit whole-match group
    if regex.captures_len() != 2 {
        return Err(ValidationError::MissingCaptureGroup { field });
    }

    Ok(())
}

fn validate_retention(config: &Config) -> Result<(), ValidationError> {
    if config.retention.file_expiry_secs == 0 {
        return Err(ValidationError::InvalidRetention {
            field: "retention.file_expiry_secs",
        });
    }
    if config.retention.sweep_interval_secs == 0 {
        return Err(ValidationError::InvalidRetention {
            field: "retention.sweep_interval_secs",
        });
    }
    Ok(())
}

fn validate_server(config: &Config) -> Result<(), ValidationError> {
    if config.rate_limit.max_requests == 0 || config.rate_limit.window_ms == 0 {
        return Err(ValidationError::InvalidRateLimit);
    }
    if config.server.max_payload_bytes.as_u64() == 0 {
        return Err(ValidationError::InvalidPayloadLimit);
    }
    Ok(())
}
