//! Command-line interface definitions.
//!
//! Every option can be given as a flag or through the environment (a `.env`
//! file in the working directory is loaded first).

use clap::Parser;

/// Command-line arguments for the daily collection run.
///
/// # Examples
///
/// ```sh
/// # Regular daily run, credentials from the environment
/// eic_digest
///
/// # Re-publish an earlier day
/// eic_digest --date 2024-01-15
///
/// # Custom data and config locations
/// eic_digest -d /var/lib/eic -c /etc/eic
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Override the run date (YYYY-MM-DD, in the configured timezone)
    #[arg(long)]
    pub date: Option<String>,

    /// Directory holding index.json and items/
    #[arg(short, long, env = "EIC_DATA_DIR", default_value = "data")]
    pub data_dir: String,

    /// Directory holding sources_*.yaml, themes.yaml and categories.json
    #[arg(short, long, env = "EIC_CONFIG_DIR", default_value = "config")]
    pub config_dir: String,

    /// Timezone used for run dates and partition keys
    #[arg(long, env = "EIC_TIMEZONE", default_value = "Asia/Tokyo")]
    pub timezone: String,

    /// API key for the OpenAI-compatible endpoint
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,

    /// Model used for enrichment
    #[arg(long, env = "OPENAI_MODEL", default_value = "gpt-4.1-mini")]
    pub openai_model: String,

    /// Base URL of the OpenAI-compatible API
    #[arg(long, env = "OPENAI_BASE_URL", default_value = "https://api.openai.com/v1")]
    pub openai_base_url: String,

    /// GitHub token with discussions write access
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    pub github_token: Option<String>,

    /// Owner of the repository that hosts the daily discussions
    #[arg(long, env = "GITHUB_REPO_OWNER", default_value = "")]
    pub github_repo_owner: String,

    /// Name of the repository that hosts the daily discussions
    #[arg(long, env = "GITHUB_REPO_NAME", default_value = "")]
    pub github_repo_name: String,

    /// Discussions category node ID (falls back to categories.json)
    #[arg(long, env = "EIC_DISCUSSION_CATEGORY_ID")]
    pub discussion_category_id: Option<String>,

    /// Slack incoming webhook; notifications are disabled when unset
    #[arg(long, env = "SLACK_WEBHOOK_URL", hide_env_values = true)]
    pub slack_webhook_url: Option<String>,

    /// Maximum records processed from high-trust sources per run
    #[arg(long, default_value_t = 20)]
    pub max_high_items: usize,

    /// Maximum records processed from trend sources per run
    #[arg(long, default_value_t = 20)]
    pub max_trend_items: usize,
}
