//! # EIC Digest
//!
//! A daily collector for external HR and labour-market articles. It reads
//! RSS/Atom feeds, drops everything it has already seen, extracts article
//! text, has an LLM summarize and score it, stores the result, and publishes
//! the day's list to GitHub Discussions with a Slack summary.
//!
//! ## Usage
//!
//! ```sh
//! eic_digest                      # today, in EIC_TIMEZONE
//! eic_digest --date 2024-01-15    # re-publish an earlier day
//! ```
//!
//! ## Architecture
//!
//! 1. **Collect**: candidates from `config/sources_{high,trend}.yaml`
//! 2. **Deduplicate**: canonical URL -> SHA-256 id -> `data/index.json`
//! 3. **Fetch & enrich**: article text, then structured LLM analysis
//! 4. **Commit**: append to `data/items/YYYY-MM.jsonl`, then admit to the index
//! 5. **Publish**: find-or-create the daily discussion, upsert list sections
//! 6. **Notify**: Slack summary with highlights
//!
//! Single-item failures never stop a run; they are counted and reported.

use chrono::NaiveDate;
use clap::Parser;
use std::error::Error;
use std::process::ExitCode;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod api;
mod cli;
mod config;
mod error;
mod identity;
mod index;
mod models;
mod outputs;
mod pipeline;
mod reconcile;
mod retry;
mod scrapers;
mod store;
mod utils;

use api::OpenAiEnricher;
use cli::Cli;
use config::{Settings, load_themes};
use index::DedupIndex;
use models::{RunStats, SourceGroup};
use outputs::github::GitHubDiscussions;
use outputs::slack::{Notification, Notifier, SlackNotifier};
use pipeline::{Pipeline, publish_and_notify};
use scrapers::content::HtmlContentFetcher;
use scrapers::feeds::RssFeedSource;
use store::RecordStore;
use utils::{date_key, ensure_writable_dir, month_key, now_in, previous_month_key};

#[tokio::main]
async fn main() -> ExitCode {
    // A missing .env is normal in CI
    let _ = dotenvy::dotenv();

    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = Instant::now();
    info!(version = env!("CARGO_PKG_VERSION"), "eic_digest starting up");

    let args = Cli::parse();
    debug!(data_dir = %args.data_dir, config_dir = %args.config_dir, "Parsed CLI arguments");

    let settings = match Settings::from_cli(args) {
        Ok(settings) => settings,
        Err(errors) => {
            for e in &errors {
                error!(error = %e, "Config error");
            }
            return ExitCode::FAILURE;
        }
    };

    let date = settings
        .date_override
        .unwrap_or_else(|| now_in(settings.timezone).date_naive());
    info!(date = %date_key(date), tz = %settings.timezone, "Processing date");

    let notifier = match SlackNotifier::new(settings.slack_webhook_url.clone()) {
        Ok(notifier) => notifier,
        Err(e) => {
            error!(error = %e, "Failed to build Slack client");
            return ExitCode::FAILURE;
        }
    };

    let code = match run(&settings, date, &notifier).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "Run failed");
            let notification = Notification::Error {
                date: date_key(date),
                message: e.to_string(),
            };
            if let Err(e) = notifier.notify(&notification).await {
                warn!(error = %e, "Failed to send error notification");
            }
            ExitCode::FAILURE
        }
    };

    info!(
        elapsed_ms = start_time.elapsed().as_millis(),
        "eic_digest finished"
    );
    code
}

/// Admit records from the current and previous month that a crashed run
/// stored without saving the index.
async fn backfill_index(index: &mut DedupIndex, store: &RecordStore, settings: &Settings) {
    let now = now_in(settings.timezone);
    let months = [previous_month_key(now.date_naive()), Some(month_key(&now))];

    for month in months.into_iter().flatten() {
        match store.load_partition(&month).await {
            Ok(records) => {
                let added = index.backfill(&records);
                debug!(%month, added, "Backfill checked partition");
            }
            Err(e) => warn!(%month, error = %e, "Could not read partition for backfill"),
        }
    }
}

/// Collect, commit and publish. `Err` means the run could not proceed at all.
async fn run(
    settings: &Settings,
    date: NaiveDate,
    notifier: &SlackNotifier,
) -> Result<ExitCode, Box<dyn Error>> {
    // Early check: the data directory must be writable before anything is fetched
    if let Err(e) = ensure_writable_dir(&settings.data_dir).await {
        error!(
            path = %settings.data_dir.display(),
            error = %e,
            "Data directory is not writable (fix perms or choose a different path)"
        );
        return Err(e);
    }

    let store = RecordStore::new(settings.items_dir());
    let mut index = DedupIndex::load(settings.index_path()).await;
    info!(entries = index.len(), "Loaded index");
    backfill_index(&mut index, &store, settings).await;

    let themes = load_themes(&settings.config_dir)?;
    info!(count = themes.len(), "Loaded themes");

    let enricher = OpenAiEnricher::new(settings.openai.clone(), &themes)?;
    info!(model = enricher.model(), "LLM client initialized");

    let pipeline = Pipeline {
        feeds: RssFeedSource::new(settings.config_dir.clone())?,
        fetcher: HtmlContentFetcher::new()?,
        enricher,
        store,
        timezone: settings.timezone,
    };

    // ---- Collect: high first, then trend ----
    let high = pipeline
        .process_source_group(SourceGroup::High, settings.max_items(SourceGroup::High), &mut index)
        .await;
    let trend = pipeline
        .process_source_group(SourceGroup::Trend, settings.max_items(SourceGroup::Trend), &mut index)
        .await;

    let mut code = ExitCode::SUCCESS;
    if let Err(e) = index.save().await {
        error!(path = %index.path().display(), error = %e, "Failed to save index");
        code = ExitCode::FAILURE;
    }

    let stats = RunStats::from_groups(&high, &trend);

    // Everything committed on this date, including earlier runs
    let (day_high, day_trend) = match pipeline.store.records_observed_on(date).await {
        Ok(split) => split,
        Err(e) => {
            warn!(error = %e, "Could not read records for date; publishing this run only");
            (high.processed.clone(), trend.processed.clone())
        }
    };
    info!(
        date = %date_key(date),
        high = day_high.len(),
        trend = day_trend.len(),
        "Total items for date"
    );

    // ---- Publish ----
    let github = GitHubDiscussions::new(&settings.github, settings.discussion_category_id())?;
    let outcome = publish_and_notify(
        &github,
        notifier,
        date,
        &stats,
        &day_high,
        &day_trend,
        &settings.repository_url(),
    )
    .await;

    info!(
        high_items = day_high.len(),
        trend_items = day_trend.len(),
        duplicates = stats.duplicates,
        errors = high.errors.len() + trend.errors.len() + outcome.errors.len(),
        discussion = outcome.discussion_url.as_deref().unwrap_or("-"),
        notified = outcome.notified,
        "EIC daily collection complete"
    );
    Ok(code)
}
