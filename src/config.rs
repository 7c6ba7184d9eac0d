//! Run configuration.
//!
//! [`Settings`] is built once from the parsed [`Cli`] and handed to every
//! component; nothing reads the environment after start-up. Source lists,
//! the theme vocabulary and the discussion category live as files in the
//! config directory:
//!
//! ```text
//! config/
//! ├── sources_high.yaml
//! ├── sources_trend.yaml
//! ├── themes.yaml
//! └── categories.json
//! ```

use crate::cli::Cli;
use crate::error::{EicError, Result};
use crate::models::SourceGroup;
use crate::retry::RetryPolicy;
use crate::utils::parse_date_key;
use chrono::NaiveDate;
use chrono_tz::Tz;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Timeout for a single article download.
pub const CONTENT_FETCH_TIMEOUT: Duration = Duration::from_secs(20);
/// Timeout for API and feed requests.
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
/// Extracted text shorter than this is treated as absent.
pub const CONTENT_MIN_CHARS: usize = 100;
/// Extracted text is cut to this many characters before enrichment.
pub const CONTENT_MAX_CHARS: usize = 12_000;
/// Entries taken from each individual feed.
pub const FEED_ENTRY_LIMIT: usize = 30;

pub const FEED_RETRY: RetryPolicy = RetryPolicy::new(2, Duration::from_secs(2));
pub const CONTENT_RETRY: RetryPolicy = RetryPolicy::new(2, Duration::from_secs(2));
pub const LLM_RETRY: RetryPolicy = RetryPolicy::new(3, Duration::from_secs(2));
pub const GITHUB_RETRY: RetryPolicy = RetryPolicy::new(3, Duration::from_secs(2));
pub const SLACK_RETRY: RetryPolicy = RetryPolicy::new(2, Duration::from_secs(2));

#[derive(Debug, Clone)]
pub struct OpenAiSettings {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
}

#[derive(Debug, Clone)]
pub struct GitHubSettings {
    pub token: String,
    pub owner: String,
    pub repo: String,
    pub category_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub data_dir: PathBuf,
    pub config_dir: PathBuf,
    pub timezone: Tz,
    pub date_override: Option<NaiveDate>,
    pub openai: OpenAiSettings,
    pub github: GitHubSettings,
    pub slack_webhook_url: Option<String>,
    pub max_high_items: usize,
    pub max_trend_items: usize,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

impl Settings {
    /// Validate the CLI and build settings.
    ///
    /// Credentials, the timezone and an optional `--date` override are all
    /// checked before returning.
    ///
    /// # Arguments
    ///
    /// * `cli` - Parsed arguments, already merged with their env fallbacks
    ///
    /// # Returns
    ///
    /// The settings, or every configuration error found (not just the first).
    pub fn from_cli(cli: Cli) -> std::result::Result<Settings, Vec<String>> {
        let mut errors = Vec::new();

        let openai_api_key = non_empty(cli.openai_api_key);
        if openai_api_key.is_none() {
            errors.push("OPENAI_API_KEY is not set".to_string());
        }
        let github_token = non_empty(cli.github_token);
        if github_token.is_none() {
            errors.push("GITHUB_TOKEN is not set".to_string());
        }

        let timezone = match cli.timezone.parse::<Tz>() {
            Ok(tz) => Some(tz),
            Err(_) => {
                errors.push(format!("EIC_TIMEZONE '{}' is not a valid IANA timezone", cli.timezone));
                None
            }
        };

        let date_override = match cli.date.as_deref() {
            None => None,
            Some(raw) => match parse_date_key(raw) {
                Some(date) => Some(date),
                None => {
                    errors.push(format!("--date '{raw}' is not a YYYY-MM-DD date"));
                    None
                }
            },
        };

        if cli.max_high_items == 0 && cli.max_trend_items == 0 {
            warn!("Both item caps are zero; the run will only publish existing records");
        }

        let (Some(api_key), Some(token), Some(timezone)) = (openai_api_key, github_token, timezone)
        else {
            return Err(errors);
        };
        if !errors.is_empty() {
            return Err(errors);
        }

        Ok(Settings {
            data_dir: PathBuf::from(cli.data_dir),
            config_dir: PathBuf::from(cli.config_dir),
            timezone,
            date_override,
            openai: OpenAiSettings {
                api_key,
                model: cli.openai_model,
                base_url: cli.openai_base_url.trim_end_matches('/').to_string(),
            },
            github: GitHubSettings {
                token,
                owner: cli.github_repo_owner,
                repo: cli.github_repo_name,
                category_id: non_empty(cli.discussion_category_id),
            },
            slack_webhook_url: non_empty(cli.slack_webhook_url),
            max_high_items: cli.max_high_items,
            max_trend_items: cli.max_trend_items,
        })
    }

    pub fn index_path(&self) -> PathBuf {
        self.data_dir.join("index.json")
    }

    pub fn items_dir(&self) -> PathBuf {
        self.data_dir.join("items")
    }

    pub fn max_items(&self, group: SourceGroup) -> usize {
        match group {
            SourceGroup::High => self.max_high_items,
            SourceGroup::Trend => self.max_trend_items,
        }
    }

    /// Link used in notifications when no discussion URL is available.
    pub fn repository_url(&self) -> String {
        format!("https://github.com/{}/{}", self.github.owner, self.github.repo)
    }

    /// Discussion category from the CLI/env, else from `categories.json`.
    pub fn discussion_category_id(&self) -> Option<String> {
        self.github
            .category_id
            .clone()
            .or_else(|| load_category_id(&self.config_dir))
    }
}

/// One feed entry in `sources_{high,trend}.yaml`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SourceConfig {
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_source_type")]
    pub source_type: String,
    #[serde(default)]
    pub publisher: String,
    #[serde(default = "default_language")]
    pub language: String,
}

fn default_source_type() -> String {
    "other".to_string()
}

fn default_language() -> String {
    "unknown".to_string()
}

#[derive(Debug, Default, Deserialize)]
struct SourcesFile {
    #[serde(default)]
    sources: Vec<SourceConfig>,
}

/// One entry of the controlled theme vocabulary.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Theme {
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub keywords: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ThemesFile {
    #[serde(default)]
    themes: Vec<Theme>,
}

#[derive(Debug, Default, Deserialize)]
struct CategoriesFile {
    #[serde(default)]
    daily_digest_category_id: String,
}

fn read_config(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .map_err(|e| EicError::Config(format!("cannot read {}: {e}", path.display())))
}

/// Load the feed list of a source group.
pub fn load_sources(config_dir: &Path, group: SourceGroup) -> Result<Vec<SourceConfig>> {
    let path = config_dir.join(format!("sources_{}.yaml", group.key()));
    let raw = read_config(&path)?;
    let file: Option<SourcesFile> = serde_yaml::from_str(&raw)
        .map_err(|e| EicError::Config(format!("invalid {}: {e}", path.display())))?;
    let sources = file.unwrap_or_default().sources;
    debug!(group = %group, count = sources.len(), "Loaded sources");
    Ok(sources)
}

/// Load the theme vocabulary.
pub fn load_themes(config_dir: &Path) -> Result<Vec<Theme>> {
    let path = config_dir.join("themes.yaml");
    let raw = read_config(&path)?;
    let file: Option<ThemesFile> = serde_yaml::from_str(&raw)
        .map_err(|e| EicError::Config(format!("invalid {}: {e}", path.display())))?;
    Ok(file.unwrap_or_default().themes)
}

/// Read `daily_digest_category_id` from `categories.json`, if present.
pub fn load_category_id(config_dir: &Path) -> Option<String> {
    let path = config_dir.join("categories.json");
    let raw = std::fs::read_to_string(&path).ok()?;
    match serde_json::from_str::<CategoriesFile>(&raw) {
        Ok(file) => non_empty(Some(file.daily_digest_category_id)),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Invalid categories.json");
            None
        }
    }
}
