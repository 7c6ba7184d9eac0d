//! Markdown rendering for the daily discussion.
//!
//! The thread body is written once, when the thread is created. List
//! sections are re-rendered on every run and start with their marker line so
//! the reconciler can find and overwrite them.

use crate::models::{MAX_REPORTED_ERRORS, Record, RunStats, SourceGroup};
use crate::utils::{date_key, truncate_chars};
use chrono::NaiveDate;
use std::fmt::Write;

const SUMMARY_MAX_CHARS: usize = 500;

/// Title of the daily discussion thread.
pub fn thread_title(date: NaiveDate) -> String {
    format!("[EIC][Daily] {} (JST)", date_key(date))
}

/// Hidden marker identifying the list section of `group` for `date`.
pub fn list_marker(group: SourceGroup, date: NaiveDate) -> String {
    format!("<!-- EIC:LIST:{}:{} -->", group.list_type(), date_key(date))
}

/// 🟢 at 70 and above, 🟡 at 50 and above, 🔴 below.
pub fn reliability_indicator(score: i32) -> &'static str {
    if score >= 70 {
        "🟢"
    } else if score >= 50 {
        "🟡"
    } else {
        "🔴"
    }
}

fn group_emoji(group: SourceGroup) -> &'static str {
    match group {
        SourceGroup::High => "🏛️",
        SourceGroup::Trend => "📈",
    }
}

/// Body of a newly created thread: run counts, errors and the data location.
pub fn thread_body(date: NaiveDate, stats: &RunStats) -> String {
    let day = date_key(date);
    let mut md = String::new();

    let _ = writeln!(md, "# EIC Daily Insights - {day}\n");
    let _ = writeln!(md, "External HR-related articles collected automatically.\n");
    let _ = writeln!(md, "## Collection summary\n");
    let _ = writeln!(md, "- **High Trust**: {}", stats.high_count);
    let _ = writeln!(md, "- **Trend**: {}", stats.trend_count);
    let _ = writeln!(md, "- **Duplicates skipped**: {}", stats.duplicates);

    if !stats.errors.is_empty() {
        let _ = writeln!(md, "\n## Errors\n");
        for error in stats.errors.iter().take(MAX_REPORTED_ERRORS) {
            let _ = writeln!(md, "- {error}");
        }
    }

    let _ = writeln!(md, "\n---\n");
    let _ = writeln!(md, "**HIGH TRUST**: ministries, research institutes and major media\n");
    let _ = writeln!(md, "**TREND**: trend-oriented tech and community media\n");
    let _ = writeln!(md, "---\n");
    let _ = write!(md, "📁 Data: `data/items/{}.jsonl`", date.format("%Y-%m"));
    md
}

/// Body of the list section for one group; starts with [`list_marker`].
pub fn list_section_body(group: SourceGroup, date: NaiveDate, records: &[Record]) -> String {
    let mut md = String::new();
    let _ = writeln!(md, "{}\n", list_marker(group, date));
    let _ = writeln!(md, "## {} Sources\n", group.display_name());

    if records.is_empty() {
        let _ = write!(md, "_No items collected_");
        return md;
    }

    let emoji = group_emoji(group);
    for (i, record) in records.iter().enumerate() {
        let _ = writeln!(md, "### {}. [{}]({})\n", i + 1, record.title, record.url);
        let _ = writeln!(
            md,
            "**{emoji} {}** | `{}` | {} {}\n",
            record.source_name,
            record.source_type,
            reliability_indicator(record.reliability_score),
            record.reliability_score
        );

        if !record.themes.is_empty() {
            let _ = writeln!(md, "**Themes**: {}\n", record.themes.join(", "));
        }
        if !record.summary.is_empty() {
            let _ = writeln!(md, "{}\n", truncate_chars(&record.summary, SUMMARY_MAX_CHARS));
        }
        if !record.key_points.is_empty() {
            let _ = writeln!(md, "**Key points:**");
            for point in record.key_points.iter().take(3) {
                let _ = writeln!(md, "- {point}");
            }
            md.push('\n');
        }
        let _ = writeln!(md, "---\n");
    }
    md
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::{jst, record};

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()
    }

    #[test]
    fn test_title_and_marker() {
        assert_eq!(thread_title(day()), "[EIC][Daily] 2024-01-15 (JST)");
        assert_eq!(list_marker(SourceGroup::High, day()), "<!-- EIC:LIST:HIGH:2024-01-15 -->");
        assert_eq!(list_marker(SourceGroup::Trend, day()), "<!-- EIC:LIST:TREND:2024-01-15 -->");
    }

    #[test]
    fn test_reliability_indicator_thresholds() {
        assert_eq!(reliability_indicator(70), "🟢");
        assert_eq!(reliability_indicator(69), "🟡");
        assert_eq!(reliability_indicator(50), "🟡");
        assert_eq!(reliability_indicator(49), "🔴");
    }

    #[test]
    fn test_thread_body_caps_errors() {
        let stats = RunStats {
            high_count: 3,
            trend_count: 4,
            duplicates: 5,
            errors: (0..15).map(|i| format!("err {i}")).collect(),
        };
        let body = thread_body(day(), &stats);
        assert!(body.contains("- **High Trust**: 3"));
        assert!(body.contains("- **Trend**: 4"));
        assert!(body.contains("- **Duplicates skipped**: 5"));
        assert!(body.contains("- err 9"));
        assert!(!body.contains("- err 10"));
        assert!(body.contains("`data/items/2024-01.jsonl`"));
    }

    #[test]
    fn test_thread_body_without_errors() {
        let body = thread_body(day(), &RunStats::default());
        assert!(!body.contains("## Errors"));
    }

    #[test]
    fn test_list_section_starts_with_marker() {
        let records = vec![
            record("https://a.example/1", SourceGroup::High, jst(2024, 1, 15, 9)),
            record("https://a.example/2", SourceGroup::High, jst(2024, 1, 15, 10)),
        ];
        let body = list_section_body(SourceGroup::High, day(), &records);
        assert!(body.starts_with("<!-- EIC:LIST:HIGH:2024-01-15 -->"));
        assert!(body.contains("## High Trust Sources"));
        assert!(body.contains("### 1. [Normalized title](https://a.example/1)"));
        assert!(body.contains("### 2. "));
        assert!(body.contains("🟡 60"));
        assert!(body.contains("- point 3"));
    }

    #[test]
    fn test_empty_list_section() {
        let body = list_section_body(SourceGroup::Trend, day(), &[]);
        assert!(body.contains(&list_marker(SourceGroup::Trend, day())));
        assert!(body.ends_with("_No items collected_"));
    }
}
