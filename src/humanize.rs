//! Human-readable sizes, durations and counts

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Invalid size format: {0}")]
    InvalidFormat(String),

    #[error("Invalid number: {0}")]
    InvalidNumber(#[from] std::num::ParseIntError),

    #[error("Invalid unit: {0}")]
    InvalidUnit(String),
}

const KIB: u64 = 1024;
const MIB: u64 = KIB * 1024;
const GIB: u64 = MIB * 1024;

/// Byte size wrapper accepting `"5MB"`-style strings or plain integers in config
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct ByteSize(pub u64);

impl ByteSize {
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn as_usize(&self) -> usize {
        usize::try_from(self.0).unwrap_or(usize::MAX)
    }
}

impl<'de> Deserialize<'de> for ByteSize {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct ByteSizeVisitor;

        impl serde::de::Visitor<'_> for ByteSizeVisitor {
            type Value = ByteSize;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a byte size as string (e.g., \"1MB\") or integer")
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(ByteSize(v))
            }

            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                u64::try_from(v)
                    .map(ByteSize)
                    .map_err(|_| serde::de::Error::custom("byte size must not be negative"))
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                v.parse::<ByteSize>().map_err(serde::de::Error::custom)
            }
        }

        deserializer.deserialize_any(ByteSizeVisitor)
    }
}

impl FromStr for ByteSize {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_uppercase();

        if let Ok(num) = s.parse::<u64>() {
            return Ok(ByteSize(num));
        }

        let (num_str, unit) = match s.find(|c: char| !c.is_ascii_digit()) {
            Some(0) | None => return Err(ParseError::InvalidFormat(s.to_string())),
            Some(pos) => (&s[..pos], &s[pos..]),
        };

        let num: u64 = num_str.parse()?;

        let multiplier = match unit.trim() {
            "B" => 1,
            "K" | "KB" | "KIB" => KIB,
            "M" | "MB" | "MIB" => MIB,
            "G" | "GB" | "GIB" => GIB,
            _ => return Err(ParseError::InvalidUnit(unit.to_string())),
        };

        Ok(ByteSize(num * multiplier))
    }
}

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_file_size(self.0))
    }
}

/// Formats a byte count for display next to a format option, e.g. `"45.3 MB"`.
///
/// Two decimals at most, trailing zeros dropped. Zero renders as `"0 B"`.
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: [(&str, u64); 4] = [("GB", GIB), ("MB", MIB), ("KB", KIB), ("B", 1)];

    for (unit, divisor) in UNITS {
        if bytes >= divisor {
            let value = (bytes as f64 / divisor as f64 * 100.0).round() / 100.0;
            return format!("{value} {unit}");
        }
    }

    "0 B".to_string()
}

/// `M:SS` below an hour, `H:MM:SS` otherwise
pub fn format_duration(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;

    if hours > 0 {
        format!("{hours}:{minutes:02}:{secs:02}")
    } else {
        format!("{minutes}:{secs:02}")
    }
}

/// Compact view/like counts: `1.2M` style rounding to whole units
pub fn format_count(count: u64) -> String {
    if count >= 1_000_000 {
        format!("{}M", (count as f64 / 1_000_000.0).round() as u64)
    } else if count >= 1_000 {
        format!("{}K", (count as f64 / 1_000.0).round() as u64)
    } else {
        count.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sizes() {
        assert_eq!("1024".parse::<ByteSize>().unwrap().as_u64(), 1024);
        assert_eq!("1KB".parse::<ByteSize>().unwrap().as_u64(), 1024);
        assert_eq!("5MiB".parse::<ByteSize>().unwrap().as_u64(), 5 * 1024 * 1024);
        assert_eq!("2G".parse::<ByteSize>().unwrap().as_u64(), 2 * 1024 * 1024 * 1024);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("MB".parse::<ByteSize>().is_err());
        assert!("10XB".parse::<ByteSize>().is_err());
        assert!("".parse::<ByteSize>().is_err());
    }

    #[test]
    fn test_deserialize_string_and_number() {
        #[derive(Deserialize)]
        struct TestStruct {
            size: ByteSize,
        }

        let parsed: TestStruct = serde_json::from_str(r#"{"size": "10MB"}"#).unwrap();
        assert_eq!(parsed.size.as_u64(), 10 * 1024 * 1024);

        let parsed: TestStruct = serde_json::from_str(r#"{"size": 1024}"#).unwrap();
        assert_eq!(parsed.size.as_u64(), 1024);
    }

    #[test]
    fn test_format_file_size() {
        assert_eq!(format_file_size(0), "0 B");
        assert_eq!(format_file_size(512), "512 B");
        assert_eq!(format_file_size(1536), "1.5 KB");
        assert_eq!(format_file_size(5 * 1024 * 1024), "5 MB");
        assert_eq!(format_file_size(3 * GIB + GIB / 4), "3.25 GB");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0), "0:00");
        assert_eq!(format_duration(75), "1:15");
        assert_eq!(format_duration(3725), "1:02:05");
    }

    #[test]
    fn test_format_count() {
        assert_eq!(format_count(999), "999");
        assert_eq!(format_count(1_500), "2K");
        assert_eq!(format_count(2_400_000), "2M");
    }
}
