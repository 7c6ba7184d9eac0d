//! LLM enrichment over an OpenAI-compatible chat-completions API.
//!
//! The model receives a system prompt listing the theme vocabulary and a user
//! prompt with the source context and article text, and must answer with a
//! JSON object matching [`enrichment_schema`] (strict structured output).
//!
//! # Failure handling
//!
//! - Transport failures and 5xx/429 responses are retried by [`LLM_RETRY`]
//! - A response cut off mid-JSON is re-asked once
//! - Any other schema violation fails the candidate without retrying

use crate::config::{HTTP_TIMEOUT, LLM_RETRY, OpenAiSettings, Theme};
use crate::error::{EicError, Result};
use crate::models::Enrichment;
use crate::utils::{looks_truncated, truncate_for_log};
use itertools::Itertools;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt::Write;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

pub const MAX_RELIABILITY_DELTA: i32 = 10;
const TEMPERATURE: f32 = 0.3;
const MAX_TOKENS: u32 = 2000;

/// Source context sent along with the article text.
#[derive(Debug, Clone)]
pub struct SourceContext<'a> {
    pub source_name: &'a str,
    pub source_type: &'a str,
    pub publisher: &'a str,
    pub original_title: Option<&'a str>,
    pub language: &'a str,
}

/// Something that can enrich article text.
pub trait Enricher {
    async fn analyze(&self, text: &str, ctx: &SourceContext<'_>) -> Result<Enrichment>;
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
    json_schema: Value,
}

#[derive(Debug, Serialize)]
struct StructuredRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    response_format: ResponseFormat,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

/// The model's answer before post-processing.
#[derive(Debug, Deserialize)]
struct RawEnrichment {
    title: String,
    summary: String,
    key_points: Vec<String>,
    themes: Vec<String>,
    tags: Vec<String>,
    language: String,
    published_at: Option<String>,
    reliability_score_delta: i64,
    reliability_reason: String,
}

/// JSON schema for the structured response.
pub fn enrichment_schema() -> Value {
    json!({
        "name": "enriched_item",
        "strict": true,
        "schema": {
            "type": "object",
            "additionalProperties": false,
            "properties": {
                "title": {"type": "string", "description": "Article title, cleaned and normalized"},
                "summary": {"type": "string", "description": "Summary in Japanese, 200-400 characters"},
                "key_points": {"type": "array", "items": {"type": "string"}, "description": "Exactly 3 key takeaways"},
                "themes": {"type": "array", "items": {"type": "string"}, "description": "Theme keys from the vocabulary"},
                "tags": {"type": "array", "items": {"type": "string"}, "description": "Free-form tags"},
                "language": {"type": "string", "enum": ["ja", "en", "unknown"]},
                "published_at": {"type": ["string", "null"], "description": "ISO 8601 date or null if unknown"},
                "reliability_score_delta": {"type": "integer", "description": "Adjustment to the base reliability score (-10 to +10)"},
                "reliability_reason": {"type": "string", "description": "One sentence explaining the adjustment"}
            },
            "required": [
                "title", "summary", "key_points", "themes", "tags",
                "language", "published_at", "reliability_score_delta", "reliability_reason"
            ]
        }
    })
}

/// System prompt with the theme vocabulary embedded.
pub fn build_system_prompt(themes: &[Theme]) -> String {
    let mut themes_list = String::new();
    for theme in themes {
        let keywords = theme.keywords.iter().take(5).join(", ");
        let _ = writeln!(themes_list, "- {}: {} (e.g. {})", theme.key, theme.name, keywords);
    }

    format!(
        "You are an analyst covering human resources and the labour market.
Analyse the article and answer with JSON that follows the provided schema.

## Theme keys (themes)
Choose only from these keys:
{themes_list}
## Guidelines

### summary
- Japanese, roughly 200-400 characters
- If the body is empty or very short, infer a brief summary from the title and append \"(inferred: body unavailable)\"

### key_points
- Exactly three, one sentence each, in Japanese

### themes
- Zero or more keys from the list above; empty array if none apply

### tags
- Three to eight free-form tags describing the content

### language
- ja, en, or unknown

### published_at
- ISO 8601 only when the article states its publication date; otherwise null

### reliability_score_delta
- Integer from -10 to +10
  - High-quality survey data or research: +5 to +10
  - Standard reporting: 0
  - Subjective or weakly sourced: -3 to -7
  - Promotional or possibly misleading: -8 to -10

### reliability_reason
- One sentence justifying the delta
"
    )
}

/// User prompt carrying the source context and article text.
pub fn build_user_prompt(text: &str, ctx: &SourceContext<'_>) -> String {
    format!(
        "## Article information
Source: {}
Publisher: {}
Source type: {}
Language: {}
Original title: {}

## Article body
{}
",
        ctx.source_name,
        ctx.publisher,
        ctx.source_type,
        ctx.language,
        ctx.original_title.unwrap_or("(unknown)"),
        if text.is_empty() { "(body could not be retrieved)" } else { text },
    )
}

/// Parse and normalize a model response.
///
/// The delta is clamped to ±[`MAX_RELIABILITY_DELTA`], themes and tags are
/// de-duplicated, and themes outside a non-empty vocabulary are dropped.
pub fn parse_enrichment(raw: &str, vocabulary: &[String]) -> std::result::Result<Enrichment, serde_json::Error> {
    let parsed: RawEnrichment = serde_json::from_str(raw)?;

    let delta = parsed
        .reliability_score_delta
        .clamp(i64::from(-MAX_RELIABILITY_DELTA), i64::from(MAX_RELIABILITY_DELTA)) as i32;

    let themes = parsed
        .themes
        .into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| vocabulary.is_empty() || vocabulary.contains(t))
        .unique()
        .collect();
    let tags = parsed
        .tags
        .into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .unique()
        .collect();

    Ok(Enrichment {
        title: parsed.title.trim().to_string(),
        summary: parsed.summary.trim().to_string(),
        key_points: parsed.key_points,
        themes,
        tags,
        language: parsed.language,
        published_at: parsed.published_at.filter(|p| !p.trim().is_empty()),
        reliability_score_delta: delta,
        reliability_reason: parsed.reliability_reason,
    })
}

#[derive(Debug)]
pub struct OpenAiEnricher {
    http: reqwest::Client,
    settings: OpenAiSettings,
    system_prompt: String,
    vocabulary: Vec<String>,
}

impl OpenAiEnricher {
    pub fn new(settings: OpenAiSettings, themes: &[Theme]) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let bearer = HeaderValue::from_str(&format!("Bearer {}", settings.api_key))
            .map_err(|e| EicError::Config(format!("invalid OPENAI_API_KEY: {e}")))?;
        headers.insert(AUTHORIZATION, bearer);

        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            http,
            settings,
            system_prompt: build_system_prompt(themes),
            vocabulary: themes.iter().map(|t| t.key.clone()).collect(),
        })
    }

    pub fn model(&self) -> &str {
        &self.settings.model
    }

    /// One chat-completions round trip; returns the raw message content.
    async fn ask_once(&self, user_prompt: &str) -> Result<String> {
        let request = StructuredRequest {
            model: &self.settings.model,
            messages: vec![
                WireMessage { role: "system", content: &self.system_prompt },
                WireMessage { role: "user", content: user_prompt },
            ],
            response_format: ResponseFormat {
                format_type: "json_schema",
                json_schema: enrichment_schema(),
            },
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
        };

        let t0 = Instant::now();
        let response = self
            .http
            .post(format!("{}/chat/completions", self.settings.base_url))
            .json(&request)
            .send()
            .await?;
        if !response.status().is_success() {
            let err = EicError::from_response(response).await;
            warn!(elapsed_ms = t0.elapsed().as_millis(), error = %err, "API call failed");
            return Err(err);
        }

        let body = response.bytes().await?;
        let chat: ChatResponse = serde_json::from_slice(&body)?;
        debug!(elapsed_ms = t0.elapsed().as_millis(), "API call succeeded");
        chat.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| EicError::Malformed("empty response from model".to_string()))
    }

    /// [`Self::ask_once`] under the retry policy.
    #[instrument(level = "info", skip_all)]
    async fn ask_with_backoff(&self, user_prompt: &str) -> Result<String> {
        let t0 = Instant::now();
        let res = LLM_RETRY.run("enrich", || self.ask_once(user_prompt)).await;
        match &res {
            Ok(_) => info!(elapsed_ms_total = t0.elapsed().as_millis(), "ask_with_backoff succeeded"),
            Err(e) => error!(elapsed_ms_total = t0.elapsed().as_millis(), error = %e, "ask_with_backoff failed"),
        }
        res
    }
}

impl Enricher for OpenAiEnricher {
    #[instrument(level = "info", skip_all, fields(source = %ctx.source_name))]
    async fn analyze(&self, text: &str, ctx: &SourceContext<'_>) -> Result<Enrichment> {
        let user_prompt = build_user_prompt(text, ctx);

        let response = self.ask_with_backoff(&user_prompt).await?;
        let mut parsed = parse_enrichment(&response, &self.vocabulary);

        // If the parse failed due to EOF (truncation), re-ask ONCE
        if let Err(ref e) = parsed {
            if looks_truncated(e) {
                warn!(error = %e, "EOF while parsing; re-asking once");
                let retry = self.ask_with_backoff(&user_prompt).await?;
                parsed = parse_enrichment(&retry, &self.vocabulary);
            }
        }

        parsed.map_err(|e| {
            warn!(
                error = %e,
                response_preview = %truncate_for_log(&response, 300),
                "Model returned non-conforming JSON"
            );
            EicError::Malformed(e.to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> SourceContext<'static> {
        SourceContext {
            source_name: "Labour Ministry",
            source_type: "ministry",
            publisher: "MHLW",
            original_title: None,
            language: "ja",
        }
    }

    fn vocab() -> Vec<String> {
        vec!["recruiting".to_string(), "attrition".to_string()]
    }

    #[test]
    fn test_parse_enrichment_clamps_and_filters() {
        let raw = r#"{
            "title": "  Wage survey  ",
            "summary": "summary",
            "key_points": ["a", "b", "c", "d", "e"],
            "themes": ["recruiting", "astrology", "recruiting"],
            "tags": ["wages", "", "wages", "survey"],
            "language": "ja",
            "published_at": "",
            "reliability_score_delta": 25,
            "reliability_reason": "Official statistics"
        }"#;
        let e = parse_enrichment(raw, &vocab()).unwrap();
        assert_eq!(e.title, "Wage survey");
        assert_eq!(e.reliability_score_delta, 10);
        assert_eq!(e.themes, vec!["recruiting"]);
        assert_eq!(e.tags, vec!["wages", "survey"]);
        assert_eq!(e.published_at, None);
        assert_eq!(e.key_points.len(), 5, "key point count is fixed when the record is built");
    }

    #[test]
    fn test_negative_delta_clamped() {
        let raw = r#"{"title":"t","summary":"s","key_points":[],"themes":["x"],"tags":[],
            "language":"en","published_at":"2024-01-15","reliability_score_delta":-99,
            "reliability_reason":"ad"}"#;
        let e = parse_enrichment(raw, &[]).unwrap();
        assert_eq!(e.reliability_score_delta, -10);
        assert_eq!(e.themes, vec!["x"], "empty vocabulary keeps all themes");
        assert_eq!(e.published_at.as_deref(), Some("2024-01-15"));
    }

    #[test]
    fn test_truncated_response_detected() {
        let err = parse_enrichment(r#"{"title": "cut off"#, &[]).unwrap_err();
        assert!(looks_truncated(&err));
    }

    #[test]
    fn test_schema_violation_is_not_truncation() {
        let err = parse_enrichment(r#"{"title": 5}"#, &[]).unwrap_err();
        assert!(!looks_truncated(&err));
    }

    #[test]
    fn test_system_prompt_lists_themes() {
        let themes = vec![Theme {
            key: "recruiting".to_string(),
            name: "Recruiting".to_string(),
            keywords: vec!["hiring".into(), "job offers".into()],
        }];
        let prompt = build_system_prompt(&themes);
        assert!(prompt.contains("- recruiting: Recruiting (e.g. hiring, job offers)"));
    }

    #[test]
    fn test_user_prompt_placeholders() {
        let prompt = build_user_prompt("", &ctx());
        assert!(prompt.contains("Original title: (unknown)"));
        assert!(prompt.contains("(body could not be retrieved)"));
    }

    #[test]
    fn test_schema_requires_every_property() {
        let schema = enrichment_schema();
        let props = schema["schema"]["properties"].as_object().unwrap();
        let required = schema["schema"]["required"].as_array().unwrap();
        assert_eq!(props.len(), required.len());
    }

    #[test]
    fn test_unexpected_chat_body_is_not_retried() {
        let err: EicError = serde_json::from_slice::<ChatResponse>(br#"{"error": "overloaded"}"#)
            .unwrap_err()
            .into();
        assert!(matches!(err, EicError::Malformed(_)));
        assert!(!err.is_transient());
    }
}
