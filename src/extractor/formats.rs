//! Turning the tool's raw encoding list into the options offered to clients

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::humanize::format_file_size;

/// Audio options are grouped into buckets of this width so near-identical
/// bitrates (e.g. 129 and 134 kbps) collapse into one entry.
const AUDIO_BUCKET_KBPS: f64 = 32.0;
const MAX_AUDIO_OPTIONS: usize = 2;

/// Container that audio-only downloads are re-encoded into unless the client asks otherwise
pub const DEFAULT_AUDIO_FORMAT: &str = "mp3";
pub const UNKNOWN_AUDIO_QUALITY: &str = "unknown";

/// One entry of the tool's `formats` array; only the fields we rank on
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawFormat {
    pub format_id: Option<String>,
    pub ext: Option<String>,
    pub vcodec: Option<String>,
    pub acodec: Option<String>,
    pub width: Option<f64>,
    pub height: Option<f64>,
    pub filesize: Option<f64>,
    pub filesize_approx: Option<f64>,
    pub abr: Option<f64>,
    pub tbr: Option<f64>,
}

impl RawFormat {
    fn has_video(&self) -> bool {
        match self.vcodec.as_deref() {
            Some(codec) => codec != "none" && !codec.is_empty(),
            None => self.height.is_some_and(|h| h > 0.0),
        }
    }

    fn is_audio_only(&self) -> bool {
        let has_audio = self
            .acodec
            .as_deref()
            .is_some_and(|codec| codec != "none" && !codec.is_empty());
        let no_video = self.vcodec.as_deref().is_none_or(|codec| codec == "none");
        has_audio && no_video
    }

    /// Exact size when known, the tool's estimate otherwise
    fn estimated_size(&self) -> u64 {
        self.filesize
            .or(self.filesize_approx)
            .filter(|size| size.is_finite() && *size > 0.0)
            .map_or(0, |size| size as u64)
    }

    fn bitrate(&self) -> f64 {
        self.abr.or(self.tbr).filter(|b| b.is_finite()).unwrap_or(0.0)
    }

    fn quality_key(&self) -> QualityKey {
        if let Some(height) = positive(self.height) {
            QualityKey::Height(height)
        } else if let Some(width) = positive(self.width) {
            QualityKey::Width(width)
        } else {
            QualityKey::Raw(self.format_id.clone().unwrap_or_else(|| "unknown".to_string()))
        }
    }
}

fn positive(value: Option<f64>) -> Option<u32> {
    value
        .filter(|v| v.is_finite() && *v >= 1.0)
        .map(|v| v.round() as u32)
}

/// Dedup and sort key of a video encoding: a resolution class when the tool
/// reports one, the raw format identifier otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum QualityKey {
    Height(u32),
    Width(u32),
    Raw(String),
}

impl QualityKey {
    fn label(&self) -> String {
        match self {
            QualityKey::Height(h) => format!("{h}p"),
            QualityKey::Width(w) => format!("{w}w"),
            QualityKey::Raw(id) => id.clone(),
        }
    }

    /// Heights first, then widths, then raw identifiers
    fn axis(&self) -> u8 {
        match self {
            QualityKey::Height(_) => 0,
            QualityKey::Width(_) => 1,
            QualityKey::Raw(_) => 2,
        }
    }

    fn value(&self) -> u32 {
        match self {
            QualityKey::Height(v) | QualityKey::Width(v) => *v,
            QualityKey::Raw(_) => 0,
        }
    }
}

/// A downloadable encoding as presented to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormatOption {
    pub quality: String,
    pub format: String,
    /// Combined estimate in bytes, `None` when the tool reported no size at all
    pub file_size: Option<u64>,
    pub file_size_formatted: String,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format_id: Option<String>,
}

impl FormatOption {
    fn new(quality: String, format: String, size: Option<u64>, format_id: Option<String>) -> Self {
        let file_size_formatted = size.map_or_else(|| "Unknown".to_string(), format_file_size);
        let label = format!("{} · {} · {}", quality, format.to_uppercase(), file_size_formatted);
        Self {
            quality,
            format,
            file_size: size,
            file_size_formatted,
            label,
            format_id,
        }
    }

    /// Placeholder offered when the source lists no audio-only stream
    pub fn unknown_audio() -> Self {
        Self::new(
            UNKNOWN_AUDIO_QUALITY.to_string(),
            DEFAULT_AUDIO_FORMAT.to_string(),
            None,
            None,
        )
    }
}

fn best_audio(formats: &[RawFormat]) -> Option<&RawFormat> {
    formats
        .iter()
        .filter(|f| f.is_audio_only())
        .max_by(|a, b| {
            a.bitrate()
                .total_cmp(&b.bitrate())
                .then(a.estimated_size().cmp(&b.estimated_size()))
        })
}

/// One option per quality key, keeping the variant with the largest combined
/// (video + best audio) size. Heights sort descending, then widths; raw
/// identifiers follow in the order the tool listed them.
pub fn select_video_formats(formats: &[RawFormat]) -> Vec<FormatOption> {
    let audio_size = best_audio(formats).map_or(0, RawFormat::estimated_size);

    let mut order: Vec<QualityKey> = Vec::new();
    let mut best: HashMap<QualityKey, (u64, &RawFormat)> = HashMap::new();

    for format in formats.iter().filter(|f| f.has_video()) {
        let key = format.quality_key();
        let combined = format.estimated_size() + audio_size;

        match best.get_mut(&key) {
            Some(entry) if combined > entry.0 => *entry = (combined, format),
            Some(_) => {}
            None => {
                order.push(key.clone());
                best.insert(key, (combined, format));
            }
        }
    }

    // stable sort keeps raw identifiers in encounter order
    order.sort_by(|a, b| a.axis().cmp(&b.axis()).then(b.value().cmp(&a.value())));

    order
        .into_iter()
        .filter_map(|key| {
            let (combined, format) = best.remove(&key)?;
            Some(FormatOption::new(
                key.label(),
                format.ext.clone().unwrap_or_else(|| "mp4".to_string()),
                (combined > 0).then_some(combined),
                format.format_id.clone(),
            ))
        })
        .collect()
}

/// Up to two audio options from distinct 32 kbps buckets, highest bitrate first.
/// Falls back to a single [`FormatOption::unknown_audio`] entry.
pub fn select_audio_formats(formats: &[RawFormat]) -> Vec<FormatOption> {
    let mut buckets: HashMap<u32, &RawFormat> = HashMap::new();

    for format in formats.iter().filter(|f| f.is_audio_only()) {
        let bucket = ((format.bitrate() / AUDIO_BUCKET_KBPS).round() * AUDIO_BUCKET_KBPS) as u32;
        let replace = buckets.get(&bucket).is_none_or(|current| {
            format
                .bitrate()
                .total_cmp(&current.bitrate())
                .then(format.estimated_size().cmp(&current.estimated_size()))
                .is_gt()
        });
        if replace {
            buckets.insert(bucket, format);
        }
    }

    if buckets.is_empty() {
        return vec![FormatOption::unknown_audio()];
    }

    let mut ranked: Vec<(u32, &RawFormat)> = buckets.into_iter().collect();
    ranked.sort_by(|a, b| b.0.cmp(&a.0));

    ranked
        .into_iter()
        .take(MAX_AUDIO_OPTIONS)
        .map(|(bucket, format)| {
            let quality = if bucket == 0 {
                "audio".to_string()
            } else {
                format!("{bucket}kbps")
            };
            let size = format.estimated_size();
            FormatOption::new(
                quality,
                DEFAULT_AUDIO_FORMAT.to_string(),
                (size > 0).then_some(size),
                format.format_id.clone(),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video(id: &str, height: f64, size: f64) -> RawFormat {
        RawFormat {
            format_id: Some(id.to_string()),
            ext: Some("mp4".to_string()),
            vcodec: Some("avc1.640028".to_string()),
            acodec: Some("none".to_string()),
            height: Some(height),
            width: Some(height * 16.0 / 9.0),
            filesize: Some(size),
            ..Default::default()
        }
    }

    fn audio(id: &str, abr: f64, size: f64) -> RawFormat {
        RawFormat {
            format_id: Some(id.to_string()),
            ext: Some("m4a".to_string()),
            vcodec: Some("none".to_string()),
            acodec: Some("mp4a.40.2".to_string()),
            abr: Some(abr),
            filesize: Some(size),
            ..Default::default()
        }
    }

    #[test]
    fn test_duplicate_quality_keeps_larger_variant() {
        let formats = vec![
            video("137", 1080.0, 50_000_000.0),
            video("248", 1080.0, 80_000_000.0),
            video("136", 720.0, 20_000_000.0),
            audio("140", 128.0, 3_000_000.0),
        ];

        let options = select_video_formats(&formats);
        let full_hd: Vec<_> = options.iter().filter(|o| o.quality == "1080p").collect();

        assert_eq!(full_hd.len(), 1);
        assert_eq!(full_hd[0].format_id.as_deref(), Some("248"));
        assert_eq!(full_hd[0].file_size, Some(83_000_000));
    }

    #[test]
    fn test_video_sorted_by_height_then_width_then_raw() {
        let mut no_dims = video("hls-a", 0.0, 1.0);
        no_dims.height = None;
        no_dims.width = None;
        let mut no_dims_b = no_dims.clone();
        no_dims_b.format_id = Some("hls-b".to_string());
        let mut width_only = video("w", 0.0, 1.0);
        width_only.height = None;
        width_only.width = Some(640.0);

        let formats = vec![
            no_dims,
            video("360", 360.0, 1.0),
            no_dims_b,
            video("1440", 1440.0, 1.0),
            width_only,
        ];

        let qualities: Vec<String> = select_video_formats(&formats)
            .into_iter()
            .map(|o| o.quality)
            .collect();

        assert_eq!(qualities, vec!["1440p", "360p", "640w", "hls-a", "hls-b"]);
    }

    #[test]
    fn test_video_without_sizes_reports_unknown() {
        let mut format = video("18", 360.0, 0.0);
        format.filesize = None;

        let options = select_video_formats(&[format]);

        assert_eq!(options[0].file_size, None);
        assert_eq!(options[0].file_size_formatted, "Unknown");
    }

    #[test]
    fn test_filesize_approx_is_used() {
        let mut format = video("22", 720.0, 0.0);
        format.filesize = None;
        format.filesize_approx = Some(2048.0);

        let options = select_video_formats(&[format]);
        assert_eq!(options[0].file_size, Some(2048));
    }

    #[test]
    fn test_no_audio_streams_yields_sentinel() {
        let formats = vec![video("137", 1080.0, 1.0)];

        let options = select_audio_formats(&formats);

        assert_eq!(options.len(), 1);
        assert_eq!(options[0].quality, UNKNOWN_AUDIO_QUALITY);
        assert_eq!(options[0].file_size, None);
    }

    #[test]
    fn test_audio_buckets_and_cap() {
        let formats = vec![
            audio("139", 48.0, 1_000.0),
            audio("140", 129.0, 3_000.0),
            audio("251", 134.0, 3_500.0),
            audio("250", 70.0, 1_800.0),
            audio("hi", 256.0, 6_000.0),
        ];

        let options = select_audio_formats(&formats);

        assert_eq!(options.len(), 2);
        assert_eq!(options[0].quality, "256kbps");
        assert_eq!(options[1].quality, "128kbps");
        // 134 kbps wins its bucket over 129 kbps
        assert_eq!(options[1].format_id.as_deref(), Some("251"));
        assert_eq!(options[1].format, DEFAULT_AUDIO_FORMAT);
    }
}
