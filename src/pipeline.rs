//! The per-group collection loop and the end-of-run publishing step.
//!
//! ```text
//! COLLECT -> for each candidate:
//!     CHECK_DEDUP -> SKIP (duplicate)
//!                 -> FETCH -> ENRICH -> COMMIT (append, then admit)
//! ```
//!
//! A candidate is only ever admitted to the index after its record is on
//! disk. Failures for single candidates are recorded as error strings and the
//! loop moves on; nothing in here aborts a run.

use crate::api::{Enricher, SourceContext};
use crate::index::DedupIndex;
use crate::identity::{identify, normalize};
use crate::models::{GroupStats, Record, RecordContext, RunStats, SourceGroup};
use crate::outputs::slack::{MAX_HIGHLIGHTS, Notification, Notifier};
use crate::reconcile::{DiscussionApi, Reconciler};
use crate::scrapers::content::ContentFetcher;
use crate::scrapers::feeds::FeedSource;
use crate::store::RecordStore;
use crate::utils::{date_key, now_in, truncate_chars, truncate_for_log};
use chrono::NaiveDate;
use chrono_tz::Tz;
use std::cmp::Reverse;
use tracing::{debug, error, info, instrument, warn};

const ERROR_URL_CHARS: usize = 60;

pub struct Pipeline<F, C, E> {
    pub feeds: F,
    pub fetcher: C,
    pub enricher: E,
    pub store: RecordStore,
    pub timezone: Tz,
}

impl<F: FeedSource, C: ContentFetcher, E: Enricher> Pipeline<F, C, E> {
    /// Process up to `max_items` new candidates of one group.
    ///
    /// Candidates already in `index` are counted as duplicates and skipped.
    /// Each new one is fetched, enriched, appended to the store and only then
    /// admitted to `index`, so a failed append leaves it eligible for the next
    /// run.
    ///
    /// # Arguments
    ///
    /// * `group` - Which source list to collect from
    /// * `max_items` - Cap on newly processed records; duplicates do not count
    /// * `index` - The run's dedup index, mutated in place
    ///
    /// # Returns
    ///
    /// The committed records, the duplicate count and one bounded error
    /// string per failed candidate. Never fails as a whole.
    #[instrument(level = "info", skip(self, index))]
    pub async fn process_source_group(
        &self,
        group: SourceGroup,
        max_items: usize,
        index: &mut DedupIndex,
    ) -> GroupStats {
        let mut stats = GroupStats::default();

        let candidates = match self.feeds.list_candidates(group).await {
            Ok(candidates) => candidates,
            Err(e) => {
                error!(error = %e, "Feed collection failed");
                stats.errors.push(format!("{group}: feed collection failed: {e}"));
                return stats;
            }
        };
        info!(count = candidates.len(), "Collected candidates");

        for candidate in &candidates {
            if stats.processed.len() >= max_items {
                info!(max_items, "Reached item cap");
                break;
            }

            let url = candidate.url.as_str();
            let item_id = identify(url);
            if index.contains(&item_id) {
                stats.duplicates += 1;
                debug!(url = %truncate_for_log(url, 60), %item_id, "Skipping duplicate");
                continue;
            }

            let text = self.fetcher.fetch_and_extract(url).await.unwrap_or_else(|| {
                warn!(url = %truncate_for_log(url, 60), "No content extracted; enriching from title");
                String::new()
            });
            let retrieved_at = now_in(self.timezone);

            let ctx = SourceContext {
                source_name: &candidate.source_name,
                source_type: &candidate.source_type,
                publisher: &candidate.publisher,
                original_title: Some(candidate.title.as_str()),
                language: &candidate.language,
            };
            let enrichment = match self.enricher.analyze(&text, &ctx).await {
                Ok(enrichment) => enrichment,
                Err(e) => {
                    let msg = format!("Enrichment failed: {}: {e}", truncate_chars(url, ERROR_URL_CHARS));
                    warn!("{msg}");
                    stats.errors.push(msg);
                    continue;
                }
            };

            let record = Record::build(
                RecordContext {
                    item_id: item_id.clone(),
                    url_normalized: normalize(url),
                    source_group: group,
                    candidate,
                    content_length: text.chars().count(),
                    retrieved_at,
                    observed_at: now_in(self.timezone),
                },
                enrichment,
            );

            if let Err(e) = self.store.append(&record).await {
                let msg = format!("Store failed: {}: {e}", truncate_chars(url, ERROR_URL_CHARS));
                error!("{msg}");
                stats.errors.push(msg);
                continue;
            }
            index.admit(item_id, record.index_entry());

            info!(
                item_id = record.item_id.as_str(),
                title = %truncate_for_log(&record.title, 50),
                score = record.reliability_score,
                "Processed"
            );
            stats.processed.push(record);
        }

        info!(
            processed = stats.processed.len(),
            duplicates = stats.duplicates,
            errors = stats.errors.len(),
            "Group finished"
        );
        stats
    }
}

/// Pick up to `max` records by reliability, taking at most `ceil(max / 2)`
/// from either group while the other still has candidates, then filling any
/// remaining slots from whatever is left.
pub fn select_highlights(high: &[Record], trend: &[Record], max: usize) -> Vec<Record> {
    let per_group = max.div_ceil(2);

    let mut sorted: Vec<&Record> = high.iter().chain(trend.iter()).collect();
    sorted.sort_by_key(|r| Reverse(r.reliability_score));

    let mut picked = vec![false; sorted.len()];
    let (mut high_taken, mut trend_taken, mut total) = (0, 0, 0);
    for (i, record) in sorted.iter().enumerate() {
        if total == max {
            break;
        }
        let taken = match record.source_group {
            SourceGroup::High => &mut high_taken,
            SourceGroup::Trend => &mut trend_taken,
        };
        if *taken < per_group {
            *taken += 1;
            total += 1;
            picked[i] = true;
        }
    }
    for flag in picked.iter_mut() {
        if total == max {
            break;
        }
        if !*flag {
            *flag = true;
            total += 1;
        }
    }

    sorted
        .into_iter()
        .zip(picked)
        .filter_map(|(record, keep)| keep.then(|| record.clone()))
        .collect()
}

/// Result of the publishing step.
#[derive(Debug, Default)]
pub struct PublishOutcome {
    pub discussion_url: Option<String>,
    pub notified: bool,
    /// Soft errors (`Discussions: …`).
    pub errors: Vec<String>,
}

/// Publish the day's records to the discussion and send the notification.
///
/// With no records for `date` the discussion is left alone and a "no
/// updates" notification is sent instead. A discussion failure is recorded
/// and the notification links to `repository_url`.
#[instrument(level = "info", skip_all, fields(date = %date, high = high.len(), trend = trend.len()))]
pub async fn publish_and_notify<A: DiscussionApi, N: Notifier>(
    api: &A,
    notifier: &N,
    date: NaiveDate,
    stats: &RunStats,
    high: &[Record],
    trend: &[Record],
    repository_url: &str,
) -> PublishOutcome {
    let mut outcome = PublishOutcome::default();
    let day = date_key(date);

    if high.is_empty() && trend.is_empty() {
        info!("No items for date; skipping discussion");
        outcome.notified = send(notifier, &Notification::NoUpdates { date: day }).await;
        return outcome;
    }

    match Reconciler::new(api).publish(date, stats, high, trend).await {
        Ok(thread) => {
            info!(url = %thread.url, "Discussion updated");
            outcome.discussion_url = Some(thread.url);
        }
        Err(e) => {
            error!(error = %e, "GitHub Discussions error");
            outcome.errors.push(format!("Discussions: {e}"));
        }
    }

    let notification = Notification::Daily {
        date: day,
        url: outcome
            .discussion_url
            .clone()
            .unwrap_or_else(|| repository_url.to_string()),
        high_count: high.len(),
        trend_count: trend.len(),
        highlights: select_highlights(high, trend, MAX_HIGHLIGHTS),
        discussion_failed: outcome.discussion_url.is_none(),
    };
    outcome.notified = send(notifier, &notification).await;
    outcome
}

/// Notification failures are logged and never fail the run.
async fn send<N: Notifier>(notifier: &N, notification: &Notification) -> bool {
    match notifier.notify(notification).await {
        Ok(sent) => sent,
        Err(e) => {
            error!(error = %e, "Slack notification error");
            false
        }
    }
}
