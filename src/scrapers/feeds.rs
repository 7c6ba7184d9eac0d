//! RSS/Atom candidate collection.
//!
//! Each source group has a YAML list of feeds (`sources_high.yaml`,
//! `sources_trend.yaml`). Every feed is downloaded and parsed on its own; a
//! feed that fails is logged and skipped so one broken source never empties
//! the whole group. The combined list is returned newest-first, undated
//! entries last.

use crate::config::{FEED_ENTRY_LIMIT, FEED_RETRY, HTTP_TIMEOUT, SourceConfig, load_sources};
use crate::error::{EicError, Result};
use crate::models::{Candidate, SourceGroup};
use chrono::{DateTime, Utc};
use feed_rs::model::Feed;
use futures::stream::{self, StreamExt};
use std::path::PathBuf;
use tracing::{debug, error, info, instrument, warn};

/// Title used for entries that carry none.
pub const UNTITLED: &str = "(No Title)";

/// Something that can list candidate articles for a source group.
pub trait FeedSource {
    /// Candidates sorted newest-first.
    async fn list_candidates(&self, group: SourceGroup) -> Result<Vec<Candidate>>;
}

#[derive(Debug, Clone)]
pub struct RssFeedSource {
    http: reqwest::Client,
    config_dir: PathBuf,
}

impl RssFeedSource {
    pub fn new(config_dir: impl Into<PathBuf>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent(concat!("eic_digest/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            config_dir: config_dir.into(),
        })
    }

    async fn fetch_feed_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.http.get(url).send().await?;
        if !response.status().is_success() {
            return Err(EicError::from_response(response).await);
        }
        Ok(response.bytes().await?.to_vec())
    }

    /// Collect candidates from a single feed.
    #[instrument(level = "info", skip_all, fields(source = %source.key))]
    async fn collect_from_source(&self, source: &SourceConfig) -> Vec<(Option<DateTime<Utc>>, Candidate)> {
        if source.url.is_empty() {
            warn!("Source has no URL");
            return Vec::new();
        }

        let url = source.url.as_str();
        let bytes = match FEED_RETRY.run("feed", || self.fetch_feed_bytes(url)).await {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(error = %e, %url, "Feed download failed");
                return Vec::new();
            }
        };

        match parse_feed(&bytes, source) {
            Ok(candidates) => {
                info!(count = candidates.len(), name = %source.name, "Collected candidates");
                candidates
            }
            Err(e) => {
                warn!(error = %e, name = %source.name, "Failed to parse feed");
                Vec::new()
            }
        }
    }
}

impl FeedSource for RssFeedSource {
    #[instrument(level = "info", skip(self))]
    async fn list_candidates(&self, group: SourceGroup) -> Result<Vec<Candidate>> {
        let sources = load_sources(&self.config_dir, group)?;
        info!(count = sources.len(), "Collecting from sources");

        let collected: Vec<(Option<DateTime<Utc>>, Candidate)> = stream::iter(sources.iter())
            .then(|source| self.collect_from_source(source))
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .flatten()
            .collect();

        let candidates = sort_newest_first(collected);
        info!(total = candidates.len(), "Collected group candidates");
        Ok(candidates)
    }
}

/// Parse a feed document into candidates, keeping the parsed publish time
/// for sorting.
pub fn parse_feed(
    bytes: &[u8],
    source: &SourceConfig,
) -> Result<Vec<(Option<DateTime<Utc>>, Candidate)>> {
    let feed: Feed =
        feed_rs::parser::parse(bytes).map_err(|e| EicError::Malformed(e.to_string()))?;

    let candidates = feed
        .entries
        .iter()
        .take(FEED_ENTRY_LIMIT)
        .filter_map(|entry| {
            let link = entry
                .links
                .iter()
                .map(|l| l.href.trim())
                .find(|href| !href.is_empty());
            let Some(link) = link else {
                debug!(entry_id = %entry.id, "Entry without link; skipping");
                return None;
            };

            let title = entry
                .title
                .as_ref()
                .map(|t| t.content.trim().to_string())
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| UNTITLED.to_string());

            let published = entry.published.or(entry.updated);

            Some((
                published,
                Candidate {
                    url: link.to_string(),
                    title,
                    pub_date: published.map(|dt| dt.to_rfc3339()),
                    source_key: source.key.clone(),
                    source_name: source.name.clone(),
                    source_type: source.source_type.clone(),
                    publisher: source.publisher.clone(),
                    language: source.language.clone(),
                },
            ))
        })
        .collect();

    Ok(candidates)
}

/// Newest first; entries without a date keep their relative order at the end.
pub fn sort_newest_first(mut collected: Vec<(Option<DateTime<Utc>>, Candidate)>) -> Vec<Candidate> {
    collected.sort_by(|a, b| b.0.cmp(&a.0));
    collected.into_iter().map(|(_, c)| c).collect()
}
