//! Article download and main-text extraction.
//!
//! The fetcher never fails loudly: every problem (transport, HTTP status,
//! empty extraction, too little text) ends in `None` and a log line, and the
//! orchestrator carries on with whatever the feed told it.

use crate::config::{CONTENT_FETCH_TIMEOUT, CONTENT_MAX_CHARS, CONTENT_MIN_CHARS, CONTENT_RETRY};
use crate::error::{EicError, Result};
use crate::utils::{truncate_chars, truncate_for_log};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE, HeaderMap, HeaderValue};
use scraper::node::Node;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, instrument, warn};

const USER_AGENT: &str = "Mozilla/5.0 (compatible; EIC-Bot/1.0)";

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("static regex"));

/// Containers tried in order; the first one with enough text wins.
static CONTAINERS: Lazy<Vec<Selector>> = Lazy::new(|| {
    ["article", "main", "[role=main]", "p", "body"]
        .iter()
        .map(|s| Selector::parse(s).expect("static selector"))
        .collect()
});

/// Something that can turn an article URL into plain text.
pub trait ContentFetcher {
    async fn fetch_and_extract(&self, url: &str) -> Option<String>;
}

#[derive(Debug, Clone)]
pub struct HtmlContentFetcher {
    http: reqwest::Client,
}

impl HtmlContentFetcher {
    pub fn new() -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("ja,en-US;q=0.9,en;q=0.8"));

        let http = reqwest::Client::builder()
            .timeout(CONTENT_FETCH_TIMEOUT)
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .build()?;
        Ok(Self { http })
    }

    async fn fetch_html(&self, url: &str) -> Result<String> {
        let response = self.http.get(url).send().await?;
        if !response.status().is_success() {
            return Err(EicError::from_response(response).await);
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();
        if !content_type.contains("text/html") && !content_type.contains("application/xhtml") {
            // Still try to process it
            warn!(%content_type, "Non-HTML content type");
        }

        Ok(response.text().await?)
    }
}

impl ContentFetcher for HtmlContentFetcher {
    #[instrument(level = "info", skip_all, fields(url = %truncate_for_log(url, 80)))]
    async fn fetch_and_extract(&self, url: &str) -> Option<String> {
        let html = match CONTENT_RETRY.run("content", || self.fetch_html(url)).await {
            Ok(html) => html,
            Err(e) => {
                warn!(error = %e, "Fetch failed");
                return None;
            }
        };

        let Some(text) = extract_main_text(&html) else {
            warn!("No content extracted");
            return None;
        };
        let text = apply_length_policy(text)?;
        debug!(chars = text.chars().count(), "Extracted content");
        Some(text)
    }
}

/// Collect the visible text below `element`, skipping script-like nodes.
fn visible_text(element: ElementRef<'_>) -> String {
    let mut out = String::new();
    for node in element.descendants() {
        let Node::Text(text) = node.value() else {
            continue;
        };
        let hidden = node.ancestors().any(|a| {
            a.value()
                .as_element()
                .is_some_and(|e| matches!(e.name(), "script" | "style" | "noscript" | "template"))
        });
        if !hidden {
            out.push_str(text);
            out.push(' ');
        }
    }
    out
}

fn collapse_whitespace(s: &str) -> String {
    WHITESPACE.replace_all(s, " ").trim().to_string()
}

/// Pick the main article text out of an HTML document.
pub fn extract_main_text(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let mut fallback: Option<String> = None;

    for selector in CONTAINERS.iter() {
        let joined: String = document.select(selector).map(visible_text).collect::<Vec<_>>().join(" ");
        let text = collapse_whitespace(&joined);
        if text.is_empty() {
            continue;
        }
        if text.chars().count() >= CONTENT_MIN_CHARS {
            return Some(text);
        }
        fallback.get_or_insert(text);
    }
    fallback
}

/// Drop text below the minimum length and cut it to the maximum.
pub fn apply_length_policy(text: String) -> Option<String> {
    let chars = text.chars().count();
    if chars < CONTENT_MIN_CHARS {
        warn!(chars, "Content too short");
        return None;
    }
    Some(truncate_chars(&text, CONTENT_MAX_CHARS))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn long_sentence(word: &str) -> String {
        std::iter::repeat(word).take(40).collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn test_prefers_article_and_skips_scripts() {
        let html = format!(
            r#"<html><head><title>t</title><style>body {{ color: red }}</style></head>
            <body><nav>Home About</nav>
            <article><h1>Headline</h1><script>var tracking = 1;</script>
            <p>{}</p></article>
            <footer>copyright</footer></body></html>"#,
            long_sentence("wages")
        );
        let text = extract_main_text(&html).unwrap();
        assert!(text.starts_with("Headline wages"));
        assert!(!text.contains("tracking"));
        assert!(!text.contains("Home About"));
        assert!(!text.contains("copyright"));
    }

    #[test]
    fn test_falls_back_to_paragraphs() {
        let html = format!(
            "<html><body><div><p>{}</p><p>second</p></div></body></html>",
            long_sentence("hiring")
        );
        let text = extract_main_text(&html).unwrap();
        assert!(text.ends_with("hiring second"));
    }

    #[test]
    fn test_whitespace_collapsed() {
        assert_eq!(collapse_whitespace("  a \n\n\t b  "), "a b");
    }

    #[test]
    fn test_length_policy() {
        assert_eq!(apply_length_policy("short".to_string()), None);
        let long = "x".repeat(CONTENT_MAX_CHARS + 500);
        assert_eq!(apply_length_policy(long).unwrap().chars().count(), CONTENT_MAX_CHARS);
        let ok = "y".repeat(CONTENT_MIN_CHARS);
        assert_eq!(apply_length_policy(ok.clone()), Some(ok));
    }

    #[test]
    fn test_empty_document_yields_none() {
        assert_eq!(extract_main_text("<html><body></body></html>"), None);
    }
}
