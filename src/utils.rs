//! Utility functions for time keys, string manipulation, and file system checks.
//!
//! - Calendar keys (`YYYY-MM-DD`, `YYYY-MM`) in the configured timezone
//! - Character-safe truncation for logs and stored titles
//! - JSON error detection for handling truncated LLM responses
//! - File system validation for the data directory

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, Utc};
use chrono_tz::Tz;
use std::error::Error;
use std::fs as stdfs;
use std::path::Path;
use tokio::fs;
use tracing::{info, instrument};

/// Current time in `tz`, as a fixed-offset timestamp suitable for storage.
pub fn now_in(tz: Tz) -> DateTime<FixedOffset> {
    Utc::now().with_timezone(&tz).fixed_offset()
}

pub fn date_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// `YYYY-MM` partition key of a timestamp, in the timestamp's own offset.
pub fn month_key(ts: &DateTime<FixedOffset>) -> String {
    ts.format("%Y-%m").to_string()
}

/// `YYYY-MM` of the month before `date`.
pub fn previous_month_key(date: NaiveDate) -> Option<String> {
    let last_of_previous = date.with_day(1)?.pred_opt()?;
    Some(last_of_previous.format("%Y-%m").to_string())
}

/// Parse a `YYYY-MM-DD` date key.
pub fn parse_date_key(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}

/// Clamp `value` into `[min, max]`.
pub fn clamp(value: i32, min: i32, max: i32) -> i32 {
    value.max(min).min(max)
}

/// Keep at most `max` characters.
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

/// Truncate a string for logging purposes.
///
/// Long strings are cut to `max` characters with an ellipsis and a count of
/// the omitted bytes appended.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(truncate_for_log("short", 100), "short");
/// assert_eq!(truncate_for_log(&"a".repeat(500), 10), "aaaaaaaaaa…(+490 bytes)");
/// ```
pub fn truncate_for_log(s: &str, max: usize) -> String {
    let head = truncate_chars(s, max);
    if head.len() == s.len() {
        head
    } else {
        format!("{}…(+{} bytes)", head, s.len() - head.len())
    }
}

/// Detect if a serde_json error indicates truncated/incomplete JSON.
///
/// When the LLM response is cut off (e.g., due to token limits) the JSON
/// fails with an EOF error, which is worth one re-ask.
pub fn looks_truncated(e: &serde_json::Error) -> bool {
    use serde_json::error::Category;
    matches!(e.classify(), Category::Eof)
}

/// Ensure a directory exists and is writable.
///
/// Creates the directory if needed, then creates and removes a probe file.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn ensure_writable_dir(path: &Path) -> Result<(), Box<dyn Error>> {
    fs::create_dir_all(path).await?;
    // Try a small sync write using std fs (simpler error surface)
    let probe_path = path.join("..__probe_write__");
    stdfs::File::create(&probe_path)?;
    let _ = stdfs::remove_file(&probe_path);
    info!("Data directory is writable");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_truncate_for_log_short_string() {
        let s = "Hello, world!";
        assert_eq!(truncate_for_log(s, 100), "Hello, world!");
    }

    #[test]
    fn test_truncate_for_log_long_string() {
        let s = "a".repeat(500);
        let result = truncate_for_log(&s, 100);
        assert!(result.starts_with(&"a".repeat(100)));
        assert!(result.contains("…(+400 bytes)"));
    }

    #[test]
    fn test_truncate_chars_respects_char_boundaries() {
        assert_eq!(truncate_chars("人事データ分析", 2), "人事");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }

    #[test]
    fn test_clamp() {
        assert_eq!(clamp(110, 0, 100), 100);
        assert_eq!(clamp(-5, 0, 100), 0);
        assert_eq!(clamp(42, 0, 100), 42);
    }

    #[test]
    fn test_keys_use_the_timestamp_offset() {
        let tokyo: Tz = "Asia/Tokyo".parse().unwrap();
        // 2024-01-31 20:00 UTC is already February 1st in Tokyo.
        let ts = tokyo
            .from_utc_datetime(&NaiveDate::from_ymd_opt(2024, 1, 31).unwrap().and_hms_opt(20, 0, 0).unwrap())
            .fixed_offset();
        assert_eq!(month_key(&ts), "2024-02");
        assert_eq!(date_key(ts.date_naive()), "2024-02-01");
    }

    #[test]
    fn test_previous_month_key() {
        let d = |y, m, day| NaiveDate::from_ymd_opt(y, m, day).unwrap();
        assert_eq!(previous_month_key(d(2024, 3, 31)).as_deref(), Some("2024-02"));
        assert_eq!(previous_month_key(d(2024, 1, 1)).as_deref(), Some("2023-12"));
    }

    #[test]
    fn test_parse_date_key() {
        assert!(parse_date_key("2024-01-15").is_some());
        assert!(parse_date_key("2024-13-01").is_none());
        assert!(parse_date_key("yesterday").is_none());
    }

    #[test]
    fn test_looks_truncated() {
        let json_eof = r#"{"field": "value"#;
        let result: Result<serde_json::Value, _> = serde_json::from_str(json_eof);
        assert!(looks_truncated(&result.unwrap_err()));

        let not_eof: Result<serde_json::Value, _> = serde_json::from_str("{]");
        assert!(!looks_truncated(&not_eof.unwrap_err()));
    }
}
