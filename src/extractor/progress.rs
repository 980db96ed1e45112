//! Recognizing progress and output filenames in the tool's free-text diagnostics
//!
//! The extraction tool's text format is outside our control, so both patterns
//! are configurable; the defaults match yt-dlp's `[download]  42.7%` lines and
//! quoted destination names such as `Merging formats into "clip.mp4"`.

use std::sync::atomic::{AtomicI16, Ordering};

use once_cell::sync::Lazy;
use regex::Regex;

use super::error::{ExtractorError, Result};
use crate::config::{ExtractorConfig, default_filename_pattern, default_progress_pattern};

/// Highest percentage reported while the tool is still running; 100 is reserved
/// for confirmed completion.
pub const MAX_IN_FLIGHT_PERCENT: u8 = 99;

static DEFAULT_PROGRESS: Lazy<Regex> =
    Lazy::new(|| Regex::new(&default_progress_pattern()).expect("default progress regex"));
static DEFAULT_FILENAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(&default_filename_pattern()).expect("default filename regex"));

#[derive(Debug, Clone)]
pub struct OutputPatterns {
    progress: Regex,
    filename: Regex,
}

impl Default for OutputPatterns {
    fn default() -> Self {
        Self {
            progress: DEFAULT_PROGRESS.clone(),
            filename: DEFAULT_FILENAME.clone(),
        }
    }
}

impl OutputPatterns {
    pub fn new(progress: &str, filename: &str) -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| {
                ExtractorError::InvalidInput(format!("bad pattern '{pattern}': {e}"))
            })
        };

        Ok(Self {
            progress: compile(progress)?,
            filename: compile(filename)?,
        })
    }

    pub fn from_config(config: &ExtractorConfig) -> Result<Self> {
        Self::new(&config.progress_pattern, &config.filename_pattern)
    }

    /// Percentage carried by a progress line, rounded and capped at 99
    pub fn progress(&self, line: &str) -> Option<u8> {
        let raw = self.progress.captures(line)?.get(1)?.as_str();
        let value: f64 = raw.parse().ok()?;
        if !value.is_finite() {
            return None;
        }

        let rounded = value.round().clamp(0.0, f64::from(MAX_IN_FLIGHT_PERCENT));
        Some(rounded as u8)
    }

    /// Last quoted filename mentioned on the line, if any
    pub fn filename(&self, line: &str) -> Option<String> {
        self.filename
            .captures_iter(line)
            .filter_map(|caps| caps.get(1))
            .last()
            .map(|m| m.as_str().to_string())
    }
}

/// Forwards only increases so the sink sees a non-decreasing sequence even when
/// the tool restarts its counter for a second stream (video then audio).
///
/// Shared by the stdout and stderr readers of one invocation.
#[derive(Debug)]
pub struct ProgressTracker {
    last: AtomicI16,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self {
            last: AtomicI16::new(-1),
        }
    }
}

impl ProgressTracker {
    pub fn advance(&self, percent: u8) -> Option<u8> {
        let previous = self.last.fetch_max(i16::from(percent), Ordering::AcqRel);
        (i16::from(percent) > previous).then_some(percent)
    }
}
