//! Data models shared across the pipeline.
//!
//! - [`SourceGroup`]: the fixed classification of feed origin
//! - [`Candidate`]: one feed entry before any processing
//! - [`Enrichment`]: the structured result of the LLM analysis
//! - [`Record`]: the immutable, fully enriched entry persisted to the store
//! - [`IndexEntry`]: first-seen metadata kept in the deduplication index
//! - [`GroupStats`] / [`RunStats`]: counters reported at the end of a run
//!
//! Record field names match the JSON lines already present in the monthly
//! partitions, so the structs are plain snake_case serde models.

use crate::identity::ItemId;
use crate::utils::{clamp, truncate_chars};
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Version stamped on every record to track schema changes.
pub const INGEST_VERSION: &str = "1.0.0";

/// Index titles are truncated to this many characters.
pub const INDEX_TITLE_MAX_CHARS: usize = 100;

/// Number of key points every record carries.
pub const KEY_POINT_COUNT: usize = 3;

/// Placeholder used when the model returns fewer than three key points.
pub const MISSING_KEY_POINT: &str = "(no key point)";

/// Base score for source types without an explicit entry.
pub const DEFAULT_BASE_RELIABILITY: i32 = 40;

/// Base reliability score derived from the source type.
pub fn base_reliability(source_type: &str) -> i32 {
    match source_type {
        "ministry" | "intl_org" => 80,
        "consulting" | "paper" => 70,
        "news" => 60,
        "tech" | "blog" => 50,
        _ => DEFAULT_BASE_RELIABILITY,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceGroup {
    /// Ministries, research institutes and major media.
    High,
    /// Trend-oriented community and tech media.
    Trend,
}

impl SourceGroup {
    pub const ALL: [SourceGroup; 2] = [SourceGroup::High, SourceGroup::Trend];

    /// Key used in config file names (`sources_high.yaml`).
    pub fn key(self) -> &'static str {
        match self {
            SourceGroup::High => "high",
            SourceGroup::Trend => "trend",
        }
    }

    /// List type used in section markers (`EIC:LIST:HIGH:…`).
    pub fn list_type(self) -> &'static str {
        match self {
            SourceGroup::High => "HIGH",
            SourceGroup::Trend => "TREND",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            SourceGroup::High => "High Trust",
            SourceGroup::Trend => "Trend",
        }
    }
}

impl fmt::Display for SourceGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// A candidate article as delivered by a feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub url: String,
    pub title: String,
    /// Publication timestamp from the feed (RFC 3339), if known.
    pub pub_date: Option<String>,
    pub source_key: String,
    pub source_name: String,
    pub source_type: String,
    pub publisher: String,
    pub language: String,
}

/// Structured result of the article analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Enrichment {
    pub title: String,
    pub summary: String,
    pub key_points: Vec<String>,
    pub themes: Vec<String>,
    pub tags: Vec<String>,
    pub language: String,
    pub published_at: Option<String>,
    pub reliability_score_delta: i32,
    pub reliability_reason: String,
}

/// One accepted, enriched article. Created once and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    // Identification
    pub item_id: ItemId,
    pub url: String,
    pub url_normalized: String,
    // Source metadata
    pub source_group: SourceGroup,
    pub source_key: String,
    pub source_name: String,
    pub source_type: String,
    pub publisher: String,
    // Original feed data
    pub rss_title: String,
    pub rss_pub_date: Option<String>,
    // Enriched data
    pub title: String,
    pub summary: String,
    pub key_points: Vec<String>,
    pub themes: Vec<String>,
    pub tags: Vec<String>,
    pub language: String,
    pub published_at: Option<String>,
    // Reliability
    pub reliability_score: i32,
    pub reliability_base: i32,
    pub reliability_delta: i32,
    pub reliability_reason: String,
    // Metadata
    pub content_length: usize,
    pub observed_at: DateTime<FixedOffset>,
    pub retrieved_at: DateTime<FixedOffset>,
    pub ingest_version: String,
}

/// Everything needed to build a [`Record`] besides the enrichment.
#[derive(Debug, Clone)]
pub struct RecordContext<'a> {
    pub item_id: ItemId,
    pub url_normalized: String,
    pub source_group: SourceGroup,
    pub candidate: &'a Candidate,
    pub content_length: usize,
    pub retrieved_at: DateTime<FixedOffset>,
    pub observed_at: DateTime<FixedOffset>,
}

impl Record {
    /// Assemble a record, fixing the key point count and the final score.
    pub fn build(ctx: RecordContext<'_>, enrichment: Enrichment) -> Record {
        let base = base_reliability(&ctx.candidate.source_type);
        let score = clamp(base.saturating_add(enrichment.reliability_score_delta), 0, 100);

        let mut key_points = enrichment.key_points;
        key_points.truncate(KEY_POINT_COUNT);
        while key_points.len() < KEY_POINT_COUNT {
            key_points.push(MISSING_KEY_POINT.to_string());
        }

        Record {
            item_id: ctx.item_id,
            url: ctx.candidate.url.clone(),
            url_normalized: ctx.url_normalized,
            source_group: ctx.source_group,
            source_key: ctx.candidate.source_key.clone(),
            source_name: ctx.candidate.source_name.clone(),
            source_type: ctx.candidate.source_type.clone(),
            publisher: ctx.candidate.publisher.clone(),
            rss_title: ctx.candidate.title.clone(),
            rss_pub_date: ctx.candidate.pub_date.clone(),
            title: enrichment.title,
            summary: enrichment.summary,
            key_points,
            themes: enrichment.themes,
            tags: enrichment.tags,
            language: enrichment.language,
            published_at: enrichment.published_at,
            reliability_score: score,
            reliability_base: base,
            reliability_delta: enrichment.reliability_score_delta,
            reliability_reason: enrichment.reliability_reason,
            content_length: ctx.content_length,
            observed_at: ctx.observed_at,
            retrieved_at: ctx.retrieved_at,
            ingest_version: INGEST_VERSION.to_string(),
        }
    }

    /// The index entry recorded when this record is admitted.
    pub fn index_entry(&self) -> IndexEntry {
        IndexEntry {
            first_seen: self.observed_at,
            source: self.source_name.clone(),
            title: truncate_chars(&self.title, INDEX_TITLE_MAX_CHARS),
        }
    }
}

/// First-seen metadata for an admitted item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub first_seen: DateTime<FixedOffset>,
    pub source: String,
    pub title: String,
}

/// Outcome of processing one source group.
#[derive(Debug, Default)]
pub struct GroupStats {
    pub processed: Vec<Record>,
    pub duplicates: usize,
    pub errors: Vec<String>,
}

/// Counters published in the discussion body and the final log line.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunStats {
    pub high_count: usize,
    pub trend_count: usize,
    pub duplicates: usize,
    pub errors: Vec<String>,
}

/// Errors shown in summaries are capped to this many entries.
pub const MAX_REPORTED_ERRORS: usize = 10;

impl RunStats {
    pub fn from_groups(high: &GroupStats, trend: &GroupStats) -> Self {
        RunStats {
            high_count: high.processed.len(),
            trend_count: trend.processed.len(),
            duplicates: high.duplicates + trend.duplicates,
            errors: high
                .errors
                .iter()
                .chain(trend.errors.iter())
                .take(MAX_REPORTED_ERRORS)
                .cloned()
                .collect(),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    fn build(source_type: &str, delta: i32, key_points: usize) -> Record {
        let cand = candidate("https://example.com/a", source_type);
        let at = jst(2024, 1, 15, 9);
        Record::build(
            RecordContext {
                item_id: crate::identity::identify(&cand.url),
                url_normalized: crate::identity::normalize(&cand.url),
                source_group: SourceGroup::High,
                candidate: &cand,
                content_length: 500,
                retrieved_at: at,
                observed_at: at,
            },
            enrichment(delta, key_points),
        )
    }

    #[test]
    fn test_key_points_always_three() {
        for n in [0, 1, 3, 5] {
            let record = build("news", 0, n);
            assert_eq!(record.key_points.len(), 3, "input had {n} key points");
        }
        let padded = build("news", 0, 1);
        assert_eq!(padded.key_points[0], "point 1");
        assert_eq!(padded.key_points[2], MISSING_KEY_POINT);
        let cut = build("news", 0, 5);
        assert_eq!(cut.key_points[2], "point 3");
    }

    #[test]
    fn test_reliability_score_clamped() {
        assert_eq!(build("ministry", 10, 3).reliability_score, 90);
        assert_eq!(build("other", -10, 3).reliability_score, 30);
        assert_eq!(build("ministry", 30, 3).reliability_score, 100);
        assert_eq!(build("other", -80, 3).reliability_score, 0);
    }

    #[test]
    fn test_base_reliability_by_source_type() {
        assert_eq!(base_reliability("intl_org"), 80);
        assert_eq!(base_reliability("paper"), 70);
        assert_eq!(base_reliability("news"), 60);
        assert_eq!(base_reliability("blog"), 50);
        assert_eq!(base_reliability("podcast"), DEFAULT_BASE_RELIABILITY);
    }

    #[test]
    fn test_record_copies_source_and_feed_fields() {
        let record = build("consulting", 0, 3);
        assert_eq!(record.reliability_base, 70);
        assert_eq!(record.rss_title, "Original feed title");
        assert_eq!(record.source_key, "mhlw");
        assert_eq!(record.ingest_version, INGEST_VERSION);
    }

    #[test]
    fn test_record_serializes_group_lowercase() {
        let json = serde_json::to_value(build("news", 0, 3)).unwrap();
        assert_eq!(json["source_group"], "high");
        assert_eq!(json["observed_at"], "2024-01-15T09:00:00+09:00");
    }

    #[test]
    fn test_index_entry_title_truncated() {
        let mut record = build("news", 0, 3);
        record.title = "x".repeat(250);
        let entry = record.index_entry();
        assert_eq!(entry.title.chars().count(), INDEX_TITLE_MAX_CHARS);
        assert_eq!(entry.source, "Ministry of Health");
        assert_eq!(entry.first_seen, record.observed_at);
    }

    #[test]
    fn test_run_stats_caps_errors() {
        let high = GroupStats {
            errors: (0..8).map(|i| format!("high {i}")).collect(),
            duplicates: 2,
            ..Default::default()
        };
        let trend = GroupStats {
            errors: (0..8).map(|i| format!("trend {i}")).collect(),
            duplicates: 1,
            ..Default::default()
        };
        let stats = RunStats::from_groups(&high, &trend);
        assert_eq!(stats.duplicates, 3);
        assert_eq!(stats.errors.len(), MAX_REPORTED_ERRORS);
        assert_eq!(stats.errors[8], "trend 0");
    }
}
