//! Slack incoming-webhook notifications (Block Kit).
//!
//! Notifications are best effort. With no webhook configured every call is a
//! no-op returning `Ok(false)`.

use crate::config::{HTTP_TIMEOUT, SLACK_RETRY};
use crate::error::{EicError, Result};
use crate::models::Record;
use crate::outputs::markdown::reliability_indicator;
use crate::utils::truncate_chars;
use serde_json::{Value, json};
use tracing::{error, info, instrument, warn};

pub const MAX_HIGHLIGHTS: usize = 5;
const HIGHLIGHT_TITLE_CHARS: usize = 60;
const HIGHLIGHT_SUMMARY_CHARS: usize = 150;
const ERROR_MESSAGE_CHARS: usize = 1000;

#[derive(Debug, Clone)]
pub enum Notification {
    /// End-of-run summary.
    Daily {
        date: String,
        /// Discussion URL, or the repository URL when publishing failed.
        url: String,
        high_count: usize,
        trend_count: usize,
        highlights: Vec<Record>,
        discussion_failed: bool,
    },
    /// The date has no records at all.
    NoUpdates { date: String },
    /// A fatal failure after configuration was loaded.
    Error { date: String, message: String },
}

/// Something that can deliver a [`Notification`].
pub trait Notifier {
    /// `Ok(true)` when delivered, `Ok(false)` when disabled.
    async fn notify(&self, notification: &Notification) -> Result<bool>;
}

fn section(text: impl Into<String>) -> Value {
    json!({ "type": "section", "text": { "type": "mrkdwn", "text": text.into() } })
}

fn header(text: impl Into<String>) -> Value {
    json!({ "type": "header", "text": { "type": "plain_text", "text": text.into(), "emoji": true } })
}

fn context(text: impl Into<String>) -> Value {
    json!({ "type": "context", "elements": [{ "type": "mrkdwn", "text": text.into() }] })
}

fn divider() -> Value {
    json!({ "type": "divider" })
}

fn highlight_block(record: &Record) -> Value {
    let mut text = format!(
        "{} *<{}|{}>*\n_{}_",
        reliability_indicator(record.reliability_score),
        record.url,
        truncate_chars(&record.title, HIGHLIGHT_TITLE_CHARS),
        record.source_name
    );
    if !record.themes.is_empty() {
        text.push_str(" | ");
        text.push_str(&record.themes.iter().take(3).cloned().collect::<Vec<_>>().join(", "));
    }
    text.push('\n');
    text.push_str(&truncate_chars(&record.summary, HIGHLIGHT_SUMMARY_CHARS));
    text.push_str("...");
    section(text)
}

/// Build the webhook payload (`text` fallback plus `blocks`).
pub fn build_payload(notification: &Notification) -> Value {
    match notification {
        Notification::Daily {
            date,
            url,
            high_count,
            trend_count,
            highlights,
            discussion_failed,
        } => {
            let total = high_count + trend_count;
            let mut blocks = vec![
                header(format!("📰 EIC Daily Insights - {date}")),
                divider(),
                section(format!(
                    "*Collected*\n• 🏛️ High Trust: {high_count}\n• 📈 Trend: {trend_count}\n• 📊 Total: {total}"
                )),
            ];

            if *discussion_failed {
                blocks.push(context(
                    "⚠️ Failed to publish the GitHub Discussion. The data was stored normally.",
                ));
            }

            if !highlights.is_empty() {
                blocks.push(divider());
                blocks.push(section("*📌 Today's Highlights*"));
                blocks.extend(highlights.iter().take(MAX_HIGHLIGHTS).map(highlight_block));
            }

            blocks.push(divider());
            let link = if *discussion_failed {
                format!("<{url}|📂 View Repository>")
            } else {
                format!("<{url}|📋 View Full Discussion>")
            };
            blocks.push(section(link));
            blocks.push(context("Powered by EIC (External Insight Collector)"));

            json!({
                "text": format!("EIC Daily: {total} articles collected ({date})"),
                "blocks": blocks,
            })
        }
        Notification::NoUpdates { date } => json!({
            "text": format!("EIC Daily: no new articles ({date})"),
            "blocks": [
                header(format!("📰 EIC Daily Insights - {date}")),
                divider(),
                section("No new articles were collected today."),
                context("Powered by EIC (External Insight Collector)"),
            ],
        }),
        Notification::Error { date, message } => json!({
            "text": format!("⚠️ EIC Error ({date}): {message}"),
            "blocks": [
                header(format!("⚠️ EIC Error - {date}")),
                divider(),
                section(format!("```{}```", truncate_chars(message, ERROR_MESSAGE_CHARS))),
            ],
        }),
    }
}

#[derive(Debug, Clone)]
pub struct SlackNotifier {
    http: reqwest::Client,
    webhook: Option<String>,
}

impl SlackNotifier {
    pub fn new(webhook: Option<String>) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
        Ok(Self { http, webhook })
    }

    async fn post_once(&self, webhook: &str, payload: &Value) -> Result<()> {
        let response = self.http.post(webhook).json(payload).send().await?;
        if !response.status().is_success() {
            return Err(EicError::from_response(response).await);
        }
        Ok(())
    }
}

impl Notifier for SlackNotifier {
    #[instrument(level = "info", skip_all)]
    async fn notify(&self, notification: &Notification) -> Result<bool> {
        let Some(webhook) = self.webhook.as_deref() else {
            warn!("Slack webhook URL not configured, skipping notification");
            return Ok(false);
        };

        let payload = build_payload(notification);
        match SLACK_RETRY.run("slack", || self.post_once(webhook, &payload)).await {
            Ok(()) => {
                info!("Slack notification sent");
                Ok(true)
            }
            Err(e) => {
                error!(error = %e, "Slack notification failed");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceGroup;
    use crate::models::fixtures::{jst, record};

    fn texts(payload: &Value) -> Vec<String> {
        payload["blocks"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|b| {
                b["text"]["text"]
                    .as_str()
                    .or_else(|| b["elements"][0]["text"].as_str())
                    .map(str::to_string)
            })
            .collect()
    }

    fn daily(failed: bool, n: usize) -> Notification {
        Notification::Daily {
            date: "2024-01-15".to_string(),
            url: "https://github.com/o/r/discussions/1".to_string(),
            high_count: 2,
            trend_count: 3,
            highlights: (0..n)
                .map(|i| record(&format!("https://a.example/{i}"), SourceGroup::High, jst(2024, 1, 15, 9)))
                .collect(),
            discussion_failed: failed,
        }
    }

    #[test]
    fn test_daily_payload() {
        let payload = build_payload(&daily(false, 7));
        assert_eq!(payload["text"], "EIC Daily: 5 articles collected (2024-01-15)");
        let texts = texts(&payload);
        assert!(texts.iter().any(|t| t.contains("📊 Total: 5")));
        assert!(texts.iter().any(|t| t.contains("View Full Discussion")));
        assert!(!texts.iter().any(|t| t.contains("⚠️")));
        let highlights = texts.iter().filter(|t| t.contains("*<https://a.example/")).count();
        assert_eq!(highlights, MAX_HIGHLIGHTS);
    }

    #[test]
    fn test_failed_discussion_links_repository() {
        let texts = texts(&build_payload(&daily(true, 0)));
        assert!(texts.iter().any(|t| t.starts_with("⚠️ Failed to publish")));
        assert!(texts.iter().any(|t| t.contains("View Repository")));
        assert!(!texts.iter().any(|t| t.contains("Highlights")));
    }

    #[test]
    fn test_no_updates_payload_is_distinct() {
        let payload = build_payload(&Notification::NoUpdates {
            date: "2024-01-15".to_string(),
        });
        assert_eq!(payload["text"], "EIC Daily: no new articles (2024-01-15)");
    }

    #[test]
    fn test_error_payload_truncates_message() {
        let payload = build_payload(&Notification::Error {
            date: "2024-01-15".to_string(),
            message: "x".repeat(5000),
        });
        let texts = texts(&payload);
        let body = texts.iter().find(|t| t.starts_with("```")).unwrap();
        assert_eq!(body.chars().count(), ERROR_MESSAGE_CHARS + 6);
    }

    #[tokio::test]
    async fn test_disabled_without_webhook() {
        let notifier = SlackNotifier::new(None).unwrap();
        let sent = notifier
            .notify(&Notification::NoUpdates {
                date: "2024-01-15".to_string(),
            })
            .await
            .unwrap();
        assert!(!sent);
    }
}
